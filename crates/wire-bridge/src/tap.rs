//! Layer-2 TAP device creation and link-state probing.
//!
//! The TAP interface is the host-side stand-in for the Ethernet port: frames
//! the host writes to it are read here and carried over the tunnel, and
//! frames arriving from the tunnel are written back to it.

use crate::status::LinkState;
use anyhow::{Context, Result};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tun::{AbstractDevice, AsyncDevice, Configuration, DeviceReader, DeviceWriter};

/// Ethernet header plus one VLAN tag.
const ETHERNET_OVERHEAD: usize = 18;

/// TAP device configuration.
#[derive(Debug, Clone)]
pub struct TapConfig {
    /// Interface name (e.g., "wb0").
    pub name: String,
    /// Interface MTU (Ethernet payload size).
    pub mtu: u16,
}

impl TapConfig {
    pub fn new(name: impl Into<String>, mtu: u16) -> Self {
        Self {
            name: name.into(),
            mtu,
        }
    }

    /// Largest frame the device can hand us.
    pub fn max_frame_len(&self) -> usize {
        usize::from(self.mtu) + ETHERNET_OVERHEAD
    }
}

/// A TAP device with async I/O.
pub struct TapDevice {
    device: AsyncDevice,
    name: String,
    mtu: u16,
}

impl TapDevice {
    /// Create the TAP device and bring it up.
    ///
    /// No address is assigned: the interface is meant to be bridged or
    /// addressed by the host's own network configuration.
    pub fn create(config: &TapConfig) -> Result<Self> {
        let mut tun_config = Configuration::default();
        tun_config
            .tun_name(&config.name)
            .layer(tun::Layer::L2)
            .mtu(config.mtu)
            .up();

        #[cfg(target_os = "linux")]
        tun_config.platform_config(|platform_config| {
            platform_config.ensure_root_privileges(true);
        });

        let device = tun::create_as_async(&tun_config)
            .with_context(|| format!("Failed to create TAP device '{}'", config.name))?;

        let name = device
            .tun_name()
            .context("Failed to get TAP device name")?;

        log::info!("Created TAP device: {} (mtu {})", name, config.mtu);

        Ok(Self {
            device,
            name,
            mtu: config.mtu,
        })
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Read buffer size: one full Ethernet frame plus any packet info prefix.
    pub fn buffer_size(&self) -> usize {
        usize::from(self.mtu) + ETHERNET_OVERHEAD + tun::PACKET_INFORMATION_LENGTH
    }

    /// Split the device into read and write halves.
    /// Note: The tun crate returns (writer, reader) order from split().
    pub fn split(self) -> Result<(TapReader, TapWriter)> {
        let buffer_size = self.buffer_size();

        let (writer, reader) = self
            .device
            .split()
            .context("Failed to split TAP device")?;

        Ok((
            TapReader {
                reader,
                buffer_size,
            },
            TapWriter { writer },
        ))
    }
}

/// Read half of a split TAP device. Each read yields one Ethernet frame.
pub struct TapReader {
    reader: DeviceReader,
    buffer_size: usize,
}

impl TapReader {
    /// Get the recommended buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl AsyncRead for TapReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

/// Write half of a split TAP device. Each write emits one Ethernet frame.
pub struct TapWriter {
    writer: DeviceWriter,
}

impl AsyncWrite for TapWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}

// ============================================================================
// Link State
// ============================================================================

/// Carrier state of a network interface, read from sysfs.
#[derive(Debug, Clone)]
pub struct InterfaceLink {
    operstate: PathBuf,
}

impl InterfaceLink {
    pub fn new(name: &str) -> Self {
        Self::with_path(PathBuf::from("/sys/class/net").join(name).join("operstate"))
    }

    fn with_path(operstate: PathBuf) -> Self {
        Self { operstate }
    }
}

impl LinkState for InterfaceLink {
    fn is_up(&self) -> bool {
        match std::fs::read_to_string(&self.operstate) {
            Ok(state) => is_operstate_up(&state),
            Err(e) => {
                log::trace!("Cannot read {}: {}", self.operstate.display(), e);
                false
            }
        }
    }
}

/// TAP devices report "unknown" while carrying traffic, so it counts as up.
fn is_operstate_up(state: &str) -> bool {
    matches!(state.trim(), "up" | "unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operstate_parsing() {
        assert!(is_operstate_up("up\n"));
        assert!(is_operstate_up("unknown\n"));
        assert!(!is_operstate_up("down\n"));
        assert!(!is_operstate_up("lowerlayerdown\n"));
        assert!(!is_operstate_up("dormant\n"));
    }

    #[test]
    fn test_interface_link_reads_file() {
        let path = std::env::temp_dir().join(format!("wb-operstate-{}", std::process::id()));
        let link = InterfaceLink::with_path(path.clone());

        assert!(!link.is_up(), "missing file means down");

        std::fs::write(&path, "up\n").unwrap();
        assert!(link.is_up());

        std::fs::write(&path, "down\n").unwrap();
        assert!(!link.is_up());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_tap_config_frame_len() {
        let config = TapConfig::new("wb0", 1500);
        assert_eq!(config.max_frame_len(), 1518);
        assert!(config.max_frame_len() <= bridge_tunnel::MAX_FRAME);
    }
}
