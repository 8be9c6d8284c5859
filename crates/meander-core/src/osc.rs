//! OSC (Open Sound Control) publisher for show-control hardware.
//!
//! Lighting and audio desks listen for OSC 1.0 datagrams over UDP. Two cues
//! are sent:
//!
//! - `/meander/state` `[s kind, s name]` whenever the active state changes
//! - `/meander/countdown` `[s name, i seconds]` on every vote countdown tick
//!
//! OSC is a side channel: every send is fire-and-forget and failures are
//! logged, never returned to the sequencing path.

use anyhow::{Context, Result};
use rosc::{encoder, OscMessage, OscPacket, OscType};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

use crate::graph::NodeKind;

/// OSC address for active-state cues.
pub const STATE_ADDR: &str = "/meander/state";
/// OSC address for countdown cues.
pub const COUNTDOWN_ADDR: &str = "/meander/countdown";

/// Connection settings for the OSC publisher.
#[derive(Debug, Clone)]
pub struct OscTarget {
    /// Destination in "host:port" format (e.g., "192.168.1.50:53000").
    pub addr: String,
    /// Multicast TTL, only applied when the destination is a multicast group.
    pub multicast_ttl: u32,
}

impl OscTarget {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            multicast_ttl: 1,
        }
    }
}

/// UDP-based OSC publisher.
#[derive(Clone)]
pub struct OscPublisher {
    /// The underlying UDP socket (None in noop mode).
    sock: Option<Arc<UdpSocket>>,
    /// Resolved destination.
    dest: Option<SocketAddr>,
    /// Destination as configured, for logging.
    pub addr: String,
}

impl OscPublisher {
    /// Create a publisher bound to an ephemeral port.
    ///
    /// The destination is resolved once; a multicast destination gets the
    /// configured TTL and loopback enabled so a desk on the same host hears it.
    pub fn new(target: &OscTarget) -> Result<Self> {
        let dest = target
            .addr
            .to_socket_addrs()
            .with_context(|| format!("Invalid OSC target '{}'", target.addr))?
            .next()
            .with_context(|| format!("OSC target '{}' did not resolve", target.addr))?;

        let bind = if dest.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let sock = UdpSocket::bind(bind).context("Failed to bind OSC socket")?;
        sock.set_nonblocking(true)?;

        if dest.ip().is_multicast() {
            match dest {
                SocketAddr::V4(_) => {
                    sock.set_multicast_ttl_v4(target.multicast_ttl)?;
                    sock.set_multicast_loop_v4(true)?;
                }
                SocketAddr::V6(_) => sock.set_multicast_loop_v6(true)?,
            }
            log::info!(
                "[OSC] Publishing to multicast group {} (ttl {})",
                dest,
                target.multicast_ttl
            );
        } else {
            log::info!("[OSC] Publishing to {}", dest);
        }

        Ok(Self {
            sock: Some(Arc::new(sock)),
            dest: Some(dest),
            addr: target.addr.clone(),
        })
    }

    /// Create a no-op publisher for when OSC output is disabled.
    ///
    /// All sends succeed and do nothing.
    pub fn noop() -> Self {
        Self {
            sock: None,
            dest: None,
            addr: "noop".to_string(),
        }
    }

    /// Check if this publisher is in noop mode.
    pub fn is_noop(&self) -> bool {
        self.sock.is_none()
    }

    /// Cue the active-state change.
    pub fn state_changed(&self, kind: NodeKind, name: &str) {
        self.send_best_effort(
            STATE_ADDR,
            vec![
                OscType::String(kind.as_str().to_string()),
                OscType::String(name.to_string()),
            ],
        );
    }

    /// Cue one countdown tick.
    pub fn fork_countdown(&self, name: &str, seconds_remaining: u32) {
        let seconds = i32::try_from(seconds_remaining).unwrap_or(i32::MAX);
        self.send_best_effort(
            COUNTDOWN_ADDR,
            vec![OscType::String(name.to_string()), OscType::Int(seconds)],
        );
    }

    fn send_best_effort(&self, path: &str, args: Vec<OscType>) {
        if let Err(e) = self.send_msg(path, args) {
            log::warn!("[OSC] Failed to send {} to {}: {}", path, self.addr, e);
        }
    }

    /// Send an OSC message with the given path and arguments.
    pub fn send_msg(&self, path: &str, args: Vec<OscType>) -> Result<()> {
        let (sock, dest) = match (&self.sock, self.dest) {
            (Some(s), Some(d)) => (s, d),
            _ => return Ok(()), // noop mode
        };
        let buf = encode_message(path, args)?;
        sock.send_to(&buf, dest)?;
        Ok(())
    }
}

/// Encode one OSC message into its datagram bytes.
pub fn encode_message(path: &str, args: Vec<OscType>) -> Result<Vec<u8>> {
    let packet = OscPacket::Message(OscMessage {
        addr: path.into(),
        args,
    });
    Ok(encoder::encode(&packet)?)
}

impl std::fmt::Debug for OscPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OscPublisher")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}
