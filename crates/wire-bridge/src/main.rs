//! wire-bridge
//!
//! Bridges a host TAP interface to a peer over a UDP tunnel. Ethernet frames
//! are fragmented to fit the tunnel MTU and reassembled on the other side.

#[cfg(not(unix))]
compile_error!("wire-bridge only supports Linux and macOS");

mod relay;
mod status;
mod tap;

use anyhow::{Context, Result};
use bridge_common::config::{load_bridge_config, Overrides, ResolvedBridgeConfig, Role};
use bridge_tunnel::{TunnelEndpoint, TunnelResult};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use relay::{run_tap_reader, run_tap_writer, tap_sink, RelayStats, TAP_WRITE_QUEUE};
use status::StatusReporter;
use tap::{InterfaceLink, TapConfig, TapDevice};

#[derive(Parser)]
#[command(name = "wire-bridge")]
#[command(version)]
#[command(about = "Ethernet-over-UDP bridge with MTU fragmentation")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone)]
struct BridgeArgs {
    /// Path to config file (default: ~/.config/wire-bridge/bridge.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Link role: ap (192.168.50.1) or sta (192.168.50.2)
    #[arg(long)]
    role: Option<Role>,

    /// UDP port used on both ends (default: 5005)
    #[arg(short, long)]
    port: Option<u16>,

    /// Peer address as ip or ip:port (default: the other role's address)
    #[arg(long)]
    peer: Option<String>,

    /// Maximum fragment payload in bytes (default: 1200, valid range: 1-1600)
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=1600))]
    mtu: Option<u16>,

    /// TAP interface name (default: wb0)
    #[arg(long)]
    tap_name: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the TAP device and run the bridge
    Run(BridgeArgs),
    /// Resolve and validate the configuration, then print it
    CheckConfig(BridgeArgs),
}

impl BridgeArgs {
    fn resolve(&self) -> Result<ResolvedBridgeConfig> {
        let file = load_bridge_config(self.config.as_deref())?;
        let overrides = Overrides {
            role: self.role,
            port: self.port,
            peer: self.peer.clone(),
            mtu: self.mtu,
            tap_name: self.tap_name.clone(),
        };
        file.resolve(&overrides)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match &args.command {
        Command::Run(bridge) => {
            let config = bridge.resolve()?;
            run_bridge(config).await
        }
        Command::CheckConfig(bridge) => {
            let config = bridge.resolve()?;
            print_config(&config);
            Ok(())
        }
    }
}

fn print_config(config: &ResolvedBridgeConfig) {
    println!("role:                {}", config.role);
    println!("bind:                {}", config.tunnel.bind_addr);
    println!("peer:                {}", config.tunnel.peer_addr);
    println!("tunnel mtu:          {}", config.tunnel.mtu);
    println!("queue depth:         {}", config.tunnel.queue_depth);
    println!("reassembly timeout:  {} ms", config.tunnel.reassembly_timeout_ms);
    println!("tap:                 {} (mtu {})", config.tap_name, config.tap_mtu);
    println!(
        "status:              every {} ms, logged every {} samples",
        config.status_interval.as_millis(),
        config.status_log_every
    );
}

async fn run_bridge(config: ResolvedBridgeConfig) -> Result<()> {
    log::info!(
        "Starting wire-bridge as {} ({} -> {})",
        config.role,
        config.role.local_ip(),
        config.tunnel.peer_addr
    );

    let tap_config = TapConfig::new(config.tap_name.clone(), config.tap_mtu);
    let device = TapDevice::create(&tap_config)?;
    let link = InterfaceLink::new(device.name());
    let (tap_reader, tap_writer) = device.split()?;
    let buffer_size = tap_reader.buffer_size();

    let relay_stats = Arc::new(RelayStats::new());
    let (sink, tap_rx) = tap_sink(TAP_WRITE_QUEUE, relay_stats.clone());

    let mut endpoint = TunnelEndpoint::start(config.tunnel.clone(), sink)
        .await
        .context("Failed to start tunnel endpoint")?;

    let reader = tokio::spawn(run_tap_reader(
        tap_reader,
        buffer_size,
        endpoint.handle(),
        relay_stats.clone(),
    ));
    let writer = tokio::spawn(run_tap_writer(tap_rx, tap_writer));
    let reporter = StatusReporter::new(
        endpoint.stats().clone(),
        relay_stats,
        link,
        config.status_log_every,
    );
    let status = tokio::spawn(reporter.run(config.status_interval));

    let result = tokio::select! {
        res = endpoint.run_until_stopped() => res.context("Tunnel stopped"),
        res = reader => task_result(res, "TAP reader"),
        res = writer => task_result(res, "TAP writer"),
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    status.abort();
    endpoint.shutdown();
    log::info!(
        "Final counters: sent {} received {} dropped {}",
        endpoint.sent(),
        endpoint.received(),
        endpoint.dropped()
    );
    result
}

/// Flatten a relay task's join result, propagating panics.
fn task_result(
    res: Result<TunnelResult<()>, tokio::task::JoinError>,
    task_name: &str,
) -> Result<()> {
    match res {
        Ok(inner) => inner.with_context(|| format!("{} stopped", task_name)),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(anyhow::anyhow!("{} task failed: {}", task_name, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_flags() {
        let args = Args::try_parse_from([
            "wire-bridge",
            "run",
            "--role",
            "sta",
            "--port",
            "6000",
            "--mtu",
            "800",
            "--tap-name",
            "wb1",
        ])
        .unwrap();

        let Command::Run(bridge) = args.command else {
            panic!("expected run command");
        };
        assert_eq!(bridge.role, Some(Role::Sta));
        assert_eq!(bridge.port, Some(6000));
        assert_eq!(bridge.mtu, Some(800));
        assert_eq!(bridge.tap_name.as_deref(), Some("wb1"));
    }

    #[test]
    fn test_cli_rejects_bad_values() {
        assert!(Args::try_parse_from(["wire-bridge", "run", "--role", "mesh"]).is_err());
        assert!(Args::try_parse_from(["wire-bridge", "run", "--mtu", "0"]).is_err());
        assert!(Args::try_parse_from(["wire-bridge", "run", "--mtu", "1601"]).is_err());
    }
}
