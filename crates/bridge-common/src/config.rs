//! Configuration file support for wire-bridge.
//!
//! Configuration structure:
//! - `role`: `"ap"` or `"sta"`, selects this side's address on the link
//! - `[tunnel]`: UDP port, peer override and tunnel tuning
//! - `[tap]`: Ethernet TAP device settings
//! - `[status]`: status reporting cadence
//!
//! Every field is optional. [`BridgeConfig::resolve`] applies command-line
//! overrides and defaults, then validates the result.

use anyhow::{Context, Result};
use bridge_tunnel::config::{
    DEFAULT_QUEUE_DEPTH, DEFAULT_REASSEMBLY_TIMEOUT_MS, DEFAULT_TUNNEL_MTU, DEFAULT_TUNNEL_PORT,
};
use bridge_tunnel::TunnelConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Link address of the access-point side.
pub const AP_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 1);

/// Link address of the station side.
pub const STA_ADDR: Ipv4Addr = Ipv4Addr::new(192, 168, 50, 2);

/// Default TAP device name.
pub const DEFAULT_TAP_NAME: &str = "wb0";

/// Default TAP device MTU (standard Ethernet payload).
pub const DEFAULT_TAP_MTU: u16 = 1500;

/// Default status sampling interval in milliseconds.
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 250;

/// Default number of status samples between log lines.
pub const DEFAULT_STATUS_LOG_EVERY: u32 = 20;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Which end of the wireless link this bridge is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Access point side.
    Ap,
    /// Station side.
    Sta,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Ap => "ap",
            Role::Sta => "sta",
        }
    }

    /// This side's link address.
    pub fn local_ip(&self) -> Ipv4Addr {
        match self {
            Role::Ap => AP_ADDR,
            Role::Sta => STA_ADDR,
        }
    }

    /// The other side's link address.
    pub fn peer_ip(&self) -> Ipv4Addr {
        match self {
            Role::Ap => STA_ADDR,
            Role::Sta => AP_ADDR,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ap" => Ok(Role::Ap),
            "sta" => Ok(Role::Sta),
            _ => Err(format!("Unknown role '{}'. Valid roles: ap, sta", s)),
        }
    }
}

/// Tunnel section (TOML: `[tunnel]`).
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TunnelSection {
    /// UDP port, used locally and on the peer (default: 5005).
    pub port: Option<u16>,
    /// Local bind address (default: 0.0.0.0).
    pub bind: Option<IpAddr>,
    /// Peer address as `ip` or `ip:port`. Defaults to the other role's
    /// link address.
    pub peer: Option<String>,
    /// Maximum fragment payload (1-1600, default: 1200). Must match the peer.
    pub mtu: Option<u16>,
    /// Outbound queue depth in frames (default: 16).
    pub queue_depth: Option<usize>,
    /// Partial frame timeout in milliseconds (default: 50).
    pub reassembly_timeout_ms: Option<u64>,
}

/// TAP device section (TOML: `[tap]`).
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TapSection {
    /// Interface name (default: wb0).
    pub name: Option<String>,
    /// Interface MTU (default: 1500).
    pub mtu: Option<u16>,
}

/// Status reporting section (TOML: `[status]`).
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct StatusSection {
    /// Sampling interval in milliseconds (default: 250).
    pub interval_ms: Option<u64>,
    /// Log a status line every N samples (default: 20).
    pub log_every: Option<u32>,
}

/// wire-bridge configuration file.
#[derive(Deserialize, Default, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub role: Option<Role>,
    pub tunnel: Option<TunnelSection>,
    pub tap: Option<TapSection>,
    pub status: Option<StatusSection>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub role: Option<Role>,
    pub port: Option<u16>,
    pub peer: Option<String>,
    pub mtu: Option<u16>,
    pub tap_name: Option<String>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedBridgeConfig {
    pub role: Role,
    pub tunnel: TunnelConfig,
    pub tap_name: String,
    pub tap_mtu: u16,
    pub status_interval: Duration,
    pub status_log_every: u32,
}

impl BridgeConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid wire-bridge configuration")
    }

    /// Apply overrides and defaults, then validate.
    pub fn resolve(&self, overrides: &Overrides) -> Result<ResolvedBridgeConfig> {
        let role = overrides.role.or(self.role).ok_or_else(|| {
            anyhow::anyhow!("Role is not set. Use role = \"ap\" | \"sta\" in the config or --role")
        })?;

        let tunnel = self.tunnel.clone().unwrap_or_default();
        let tap = self.tap.clone().unwrap_or_default();
        let status = self.status.clone().unwrap_or_default();

        let port = overrides.port.or(tunnel.port).unwrap_or(DEFAULT_TUNNEL_PORT);
        let bind_ip = tunnel.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let peer_addr = match overrides.peer.as_deref().or(tunnel.peer.as_deref()) {
            Some(peer) => parse_peer(peer, port)?,
            None => SocketAddr::new(IpAddr::V4(role.peer_ip()), port),
        };

        let tunnel_config = TunnelConfig {
            bind_addr: SocketAddr::new(bind_ip, port),
            peer_addr,
            mtu: overrides.mtu.or(tunnel.mtu).unwrap_or(DEFAULT_TUNNEL_MTU),
            queue_depth: tunnel.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
            reassembly_timeout_ms: tunnel
                .reassembly_timeout_ms
                .unwrap_or(DEFAULT_REASSEMBLY_TIMEOUT_MS),
        };
        tunnel_config
            .validate()
            .map_err(|e| anyhow::anyhow!("[tunnel] {}", e))?;

        let tap_name = overrides
            .tap_name
            .clone()
            .or(tap.name)
            .unwrap_or_else(|| DEFAULT_TAP_NAME.to_string());
        validate_tap_name(&tap_name)?;

        let tap_mtu = tap.mtu.unwrap_or(DEFAULT_TAP_MTU);
        validate_tap_mtu(tap_mtu)?;

        let interval_ms = status.interval_ms.unwrap_or(DEFAULT_STATUS_INTERVAL_MS);
        if interval_ms == 0 {
            anyhow::bail!("[status] interval_ms must be at least 1");
        }
        let log_every = status.log_every.unwrap_or(DEFAULT_STATUS_LOG_EVERY);
        if log_every == 0 {
            anyhow::bail!("[status] log_every must be at least 1");
        }

        Ok(ResolvedBridgeConfig {
            role,
            tunnel: tunnel_config,
            tap_name,
            tap_mtu,
            status_interval: Duration::from_millis(interval_ms),
            status_log_every: log_every,
        })
    }
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Parse a peer given as `ip:port` or a bare `ip` (using `default_port`).
fn parse_peer(value: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = value.parse().with_context(|| {
        format!(
            "Invalid peer '{}'. Expected format: 192.168.50.2 or 192.168.50.2:5005",
            value
        )
    })?;
    Ok(SocketAddr::new(ip, default_port))
}

/// Linux interface names are at most 15 bytes and may not contain '/' or
/// whitespace.
fn validate_tap_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 15 {
        anyhow::bail!(
            "[tap] Invalid interface name '{}': must be 1-15 characters",
            name
        );
    }
    if name.contains('/') || name.chars().any(char::is_whitespace) {
        anyhow::bail!(
            "[tap] Invalid interface name '{}': must not contain '/' or whitespace",
            name
        );
    }
    Ok(())
}

/// Validate TAP MTU is within acceptable range (576-1582).
///
/// The upper bound keeps a full frame (MTU + 18 bytes of Ethernet header and
/// VLAN tag) within what the tunnel carries.
fn validate_tap_mtu(mtu: u16) -> Result<()> {
    if !(576..=1582).contains(&mtu) {
        anyhow::bail!("[tap] MTU {} is out of range. Valid range: 576-1582", mtu);
    }
    Ok(())
}

// ============================================================================
// Loading
// ============================================================================

pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path_str == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    path.to_path_buf()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config").join("wire-bridge").join("bridge.toml"))
}

fn load_config(path: &Path) -> Result<BridgeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    BridgeConfig::from_toml(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load the configuration file.
///
/// An explicit path must exist. Without one, the default location
/// (`~/.config/wire-bridge/bridge.toml`) is used if present; otherwise an
/// empty configuration is returned and command-line flags must supply the
/// role.
pub fn load_bridge_config(path: Option<&Path>) -> Result<BridgeConfig> {
    match path {
        Some(p) => load_config(&expand_tilde(p)),
        None => match default_config_path() {
            Some(p) if p.exists() => load_config(&p),
            _ => {
                log::debug!("No config file found, using defaults");
                Ok(BridgeConfig::default())
            }
        },
    }
}
