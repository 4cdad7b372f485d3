//! Hand pose sources.
//!
//! The sensor-fusion server lives outside this process; the core only
//! sees a `HandTracker` that answers "latest pose or absent" within a
//! bounded wait.  `UdpTracker` speaks a line-datagram protocol
//! (`x y z` or `lost`); `ChannelTracker` feeds scripted poses in tests.

use std::net::UdpSocket;
use std::time::Duration;

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::pose::{HandPresence, Pose3D};

/// A "latest pose or absent" accessor, polled once per frame.
///
/// Implementations must return within roughly `timeout`; no response
/// inside the window is reported as the last known presence (or
/// `Absent` if nothing has ever been seen).
pub trait HandTracker {
    fn pos(&mut self, timeout: Duration) -> HandPresence;
}

// ── UDP tracker ────────────────────────────────────────────

/// Datagram-fed tracker.
///
/// Each datagram is one observation: `x y z` (three ascii floats,
/// whitespace separated) for a tracked joint, or `lost` when the
/// upstream server drops the hand.  Malformed datagrams are ignored.
pub struct UdpTracker {
    socket: UdpSocket,
    latest: HandPresence,
    buf: [u8; 256],
}

impl UdpTracker {
    /// Bind to `addr` (e.g. `127.0.0.1:7110`).
    pub fn bind(addr: &str) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        info!("tracker listening on {}", socket.local_addr()?);
        Ok(Self {
            socket,
            latest: HandPresence::Absent,
            buf: [0; 256],
        })
    }

    /// Drain all datagrams currently queued, keeping the newest
    /// observation.  Waits at most `timeout` for the first one.
    fn pump(&mut self, timeout: Duration) {
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .ok();
        let mut first = true;
        loop {
            match self.socket.recv(&mut self.buf) {
                Ok(n) => {
                    if let Some(obs) = parse_datagram(&self.buf[..n]) {
                        if obs.is_present() != self.latest.is_present() {
                            debug!("hand presence changed: {:?}", obs.is_present());
                        }
                        self.latest = obs;
                    }
                    // Only the first recv blocks; the rest just drain.
                    if first {
                        self.socket
                            .set_read_timeout(Some(Duration::from_millis(1)))
                            .ok();
                        first = false;
                    }
                }
                Err(_) => return,
            }
        }
    }
}

impl HandTracker for UdpTracker {
    fn pos(&mut self, timeout: Duration) -> HandPresence {
        self.pump(timeout);
        self.latest
    }
}

/// Parse one observation datagram.  Returns None for malformed input.
fn parse_datagram(data: &[u8]) -> Option<HandPresence> {
    let text = std::str::from_utf8(data).ok()?.trim();
    if text.eq_ignore_ascii_case("lost") {
        return Some(HandPresence::Absent);
    }
    let mut parts = text.split_whitespace();
    let x = parts.next()?.parse::<f64>().ok()?;
    let y = parts.next()?.parse::<f64>().ok()?;
    let z = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        warn!("trailing fields in pose datagram: {:?}", text);
        return None;
    }
    Some(HandPresence::Present(Pose3D::new(x, y, z)))
}

// ── Channel tracker ────────────────────────────────────────

/// Tracker fed from a channel of scripted observations.  Used by tests
/// and by in-process pose producers.  When the script runs dry the
/// last observation repeats; a disconnected channel reads as `Absent`.
pub struct ChannelTracker {
    rx: Receiver<HandPresence>,
    latest: HandPresence,
    disconnected: bool,
}

impl ChannelTracker {
    pub fn new(rx: Receiver<HandPresence>) -> Self {
        Self {
            rx,
            latest: HandPresence::Absent,
            disconnected: false,
        }
    }
}

impl HandTracker for ChannelTracker {
    fn pos(&mut self, timeout: Duration) -> HandPresence {
        if self.disconnected {
            return HandPresence::Absent;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(obs) => self.latest = obs,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                self.disconnected = true;
                self.latest = HandPresence::Absent;
            }
        }
        self.latest
    }
}

// ── Tests ──────────────────────────────────────────────────
