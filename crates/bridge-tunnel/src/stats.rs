//! Tunnel traffic counters.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Traffic counters for one tunnel endpoint.
///
/// Counters are 32-bit and wrap. They are written from the tunnel loops and
/// the submitting thread, and read by the status reporter with relaxed
/// atomic loads.
#[derive(Debug, Default)]
pub struct TunnelStats {
    /// Datagrams successfully handed to the socket.
    sent: AtomicU32,
    /// Datagrams received from the socket.
    received: AtomicU32,
    /// Datagrams or frames discarded for any reason.
    dropped: AtomicU32,
}

impl TunnelStats {
    /// Create a new stats instance with all counters zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Datagrams handed to the socket.
    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Datagrams received from the socket.
    pub fn received(&self) -> u32 {
        self.received.load(Ordering::Relaxed)
    }

    /// Datagrams and frames discarded.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters at once.
    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            sent: self.sent(),
            received: self.received(),
            dropped: self.dropped(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficSnapshot {
    pub sent: u32,
    pub received: u32,
    pub dropped: u32,
}

/// Datagram rates derived from two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrafficRates {
    pub sent_per_sec: f64,
    pub received_per_sec: f64,
}

/// Turns successive counter snapshots into per-second rates.
///
/// The first sample only establishes a baseline and reports zero rates.
#[derive(Debug, Default)]
pub struct RateMeter {
    last: Option<TrafficSnapshot>,
}

impl RateMeter {
    /// Create a meter with no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `snapshot`, taken `elapsed` after the previous one.
    pub fn update(&mut self, snapshot: TrafficSnapshot, elapsed: Duration) -> TrafficRates {
        let previous = self.last.replace(snapshot);
        let Some(previous) = previous else {
            return TrafficRates::default();
        };

        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return TrafficRates::default();
        }

        // Counters wrap, so deltas use wrapping arithmetic.
        let sent = snapshot.sent.wrapping_sub(previous.sent);
        let received = snapshot.received.wrapping_sub(previous.received);
        TrafficRates {
            sent_per_sec: f64::from(sent) / secs,
            received_per_sec: f64::from(received) / secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let stats = TunnelStats::new();
        assert_eq!(stats.snapshot(), TrafficSnapshot::default());

        stats.record_sent();
        stats.record_sent();
        stats.record_received();
        stats.record_dropped();
        assert_eq!(
            stats.snapshot(),
            TrafficSnapshot {
                sent: 2,
                received: 1,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_counters_wrap() {
        let stats = TunnelStats::new();
        stats.dropped.store(u32::MAX, Ordering::Relaxed);
        stats.record_dropped();
        assert_eq!(stats.dropped(), 0);
    }

    #[test]
    fn test_rate_meter_baseline() {
        let mut meter = RateMeter::new();
        let rates = meter.update(
            TrafficSnapshot {
                sent: 100,
                received: 50,
                dropped: 0,
            },
            Duration::from_millis(250),
        );
        assert_eq!(rates, TrafficRates::default());
    }

    #[test]
    fn test_rate_meter_rates() {
        let mut meter = RateMeter::new();
        meter.update(TrafficSnapshot::default(), Duration::ZERO);
        let rates = meter.update(
            TrafficSnapshot {
                sent: 50,
                received: 25,
                dropped: 3,
            },
            Duration::from_millis(500),
        );
        assert_eq!(rates.sent_per_sec, 100.0);
        assert_eq!(rates.received_per_sec, 50.0);
    }

    #[test]
    fn test_rate_meter_across_wrap() {
        let mut meter = RateMeter::new();
        meter.update(
            TrafficSnapshot {
                sent: u32::MAX - 9,
                received: 0,
                dropped: 0,
            },
            Duration::ZERO,
        );
        let rates = meter.update(
            TrafficSnapshot {
                sent: 10,
                received: 0,
                dropped: 0,
            },
            Duration::from_secs(1),
        );
        assert_eq!(rates.sent_per_sec, 20.0);
    }

    #[test]
    fn test_rate_meter_zero_elapsed() {
        let mut meter = RateMeter::new();
        meter.update(TrafficSnapshot::default(), Duration::ZERO);
        let rates = meter.update(
            TrafficSnapshot {
                sent: 5,
                received: 5,
                dropped: 0,
            },
            Duration::ZERO,
        );
        assert_eq!(rates, TrafficRates::default());
    }
}
