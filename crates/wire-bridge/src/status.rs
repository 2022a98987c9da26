//! Periodic status reporting.

use crate::relay::RelayStats;
use bridge_tunnel::{RateMeter, TrafficRates, TrafficSnapshot, TunnelStats};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Source of the Ethernet link state.
pub trait LinkState: Send + 'static {
    fn is_up(&self) -> bool;
}

/// One status sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusLine {
    pub link_up: bool,
    pub counters: TrafficSnapshot,
    pub rates: TrafficRates,
    pub eth_rx_dropped: u32,
    pub eth_tx_dropped: u32,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "eth {} | tx {} ({:.0} pps) rx {} ({:.0} pps) drop {} | eth drop rx {} tx {}",
            if self.link_up { "up" } else { "down" },
            self.counters.sent,
            self.rates.sent_per_sec,
            self.counters.received,
            self.rates.received_per_sec,
            self.counters.dropped,
            self.eth_rx_dropped,
            self.eth_tx_dropped,
        )
    }
}

/// Samples counters and link state on an interval and logs them.
///
/// A line is logged on every `log_every`-th sample and whenever the link
/// state changes.
pub struct StatusReporter<L> {
    tunnel: Arc<TunnelStats>,
    relay: Arc<RelayStats>,
    link: L,
    log_every: u32,
    meter: RateMeter,
    last_link: Option<bool>,
    ticks: u32,
}

impl<L: LinkState> StatusReporter<L> {
    pub fn new(tunnel: Arc<TunnelStats>, relay: Arc<RelayStats>, link: L, log_every: u32) -> Self {
        Self {
            tunnel,
            relay,
            link,
            log_every: log_every.max(1),
            meter: RateMeter::new(),
            last_link: None,
            ticks: 0,
        }
    }

    /// Take a sample `elapsed` after the previous one.
    ///
    /// Returns the sample and whether it should be logged.
    pub fn sample(&mut self, elapsed: Duration) -> (StatusLine, bool) {
        let counters = self.tunnel.snapshot();
        let rates = self.meter.update(counters, elapsed);
        let link_up = self.link.is_up();

        let link_changed = self.last_link.replace(link_up) != Some(link_up);
        self.ticks = self.ticks.wrapping_add(1);
        let periodic = self.ticks % self.log_every == 0;

        let line = StatusLine {
            link_up,
            counters,
            rates,
            eth_rx_dropped: self.relay.eth_rx_dropped(),
            eth_tx_dropped: self.relay.eth_tx_dropped(),
        };
        (line, link_changed || periodic)
    }

    /// Run forever, sampling every `interval`.
    pub async fn run(mut self, interval: Duration) {
        let mut timer = time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            timer.tick().await;
            let now = Instant::now();
            let (line, log_it) = self.sample(now - last);
            last = now;

            if log_it {
                if line.link_up {
                    log::info!("{}", line);
                } else {
                    log::warn!("{}", line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    struct FakeLink(Arc<AtomicBool>);

    impl LinkState for FakeLink {
        fn is_up(&self) -> bool {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn reporter(log_every: u32) -> (StatusReporter<FakeLink>, Arc<AtomicBool>) {
        let up = Arc::new(AtomicBool::new(true));
        let reporter = StatusReporter::new(
            Arc::new(TunnelStats::new()),
            Arc::new(RelayStats::new()),
            FakeLink(up.clone()),
            log_every,
        );
        (reporter, up)
    }

    const TICK: Duration = Duration::from_millis(250);

    #[test]
    fn test_first_sample_is_logged() {
        let (mut reporter, _) = reporter(20);
        let (line, log_it) = reporter.sample(TICK);
        assert!(log_it);
        assert!(line.link_up);
        assert_eq!(line.rates, TrafficRates::default());
    }

    #[test]
    fn test_logs_every_n_samples() {
        let (mut reporter, _) = reporter(4);
        let logged: Vec<bool> = (0..9).map(|_| reporter.sample(TICK).1).collect();
        // First sample reports the initial link state.
        assert_eq!(
            logged,
            vec![true, false, false, true, false, false, false, true, false]
        );
    }

    #[test]
    fn test_link_change_is_logged() {
        let (mut reporter, up) = reporter(100);
        reporter.sample(TICK);
        assert!(!reporter.sample(TICK).1);

        up.store(false, Ordering::Relaxed);
        let (line, log_it) = reporter.sample(TICK);
        assert!(log_it);
        assert!(!line.link_up);
        assert!(!reporter.sample(TICK).1);

        up.store(true, Ordering::Relaxed);
        assert!(reporter.sample(TICK).1);
    }

    #[test]
    fn test_status_line_format() {
        let line = StatusLine {
            link_up: true,
            counters: TrafficSnapshot {
                sent: 40,
                received: 12,
                dropped: 3,
            },
            rates: TrafficRates {
                sent_per_sec: 160.0,
                received_per_sec: 48.0,
            },
            eth_rx_dropped: 1,
            eth_tx_dropped: 2,
        };
        assert_eq!(
            line.to_string(),
            "eth up | tx 40 (160 pps) rx 12 (48 pps) drop 3 | eth drop rx 1 tx 2"
        );
    }
}
