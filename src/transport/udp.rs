//! A UDP frame transport.
//!
//! Non-blocking: `poll_inbound` drains whatever datagrams have arrived and
//! returns immediately, matching the pump contract. Peers are configured
//! up front or learned from inbound traffic; a send fans out to every
//! known peer, since the mesh addresses by destination hash rather than by
//! socket address.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, trace, warn};

use crate::core::{FrameTransport, TargetHint};

/// Largest datagram accepted from the wire.
const MAX_DATAGRAM: usize = 65_535;

/// A broadcast-style frame transport over UDP.
pub struct UdpTransport {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
    label: String,
}

impl UdpTransport {
    /// Bind a socket and remember the initial peer set.
    pub fn bind(bind: impl ToSocketAddrs, peers: &[SocketAddr]) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        let label = match socket.local_addr() {
            Ok(addr) => format!("udp/{addr}"),
            Err(_) => "udp".to_string(),
        };
        debug!(transport = %label, peers = peers.len(), "udp transport up");

        Ok(Self {
            socket,
            peers: peers.to_vec(),
            label,
        })
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Add a peer if it is not already known.
    pub fn add_peer(&mut self, peer: SocketAddr) {
        if !self.peers.contains(&peer) {
            trace!(transport = %self.label, %peer, "learned peer");
            self.peers.push(peer);
        }
    }
}

impl FrameTransport for UdpTransport {
    fn send(&mut self, raw: &[u8], _hint: TargetHint) {
        for peer in &self.peers {
            if let Err(err) = self.socket.send_to(raw, peer) {
                // Best effort; the mesh treats every carrier as lossy.
                trace!(transport = %self.label, %peer, %err, "send failed");
            }
        }
    }

    fn poll_inbound(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    self.add_peer(from);
                    frames.push(buf[..len].to_vec());
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(transport = %self.label, %err, "recv failed");
                    break;
                }
            }
        }

        frames
    }

    fn name(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_roundtrip() {
        let mut a = UdpTransport::bind("127.0.0.1:0", &[]).unwrap();
        let b_addr;
        let mut b = {
            let t = UdpTransport::bind("127.0.0.1:0", &[]).unwrap();
            b_addr = t.local_addr().unwrap();
            t
        };
        a.add_peer(b_addr);

        a.send(b"frame", TargetHint::Broadcast);

        // Give the loopback a moment.
        let mut received = Vec::new();
        for _ in 0..50 {
            received = b.poll_inbound();
            if !received.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(received, vec![b"frame".to_vec()]);

        // b learned a's address from the datagram.
        let a_addr = a.local_addr().unwrap();
        assert!(b.peers.contains(&a_addr));
    }

    #[test]
    fn test_poll_empty_does_not_block() {
        let mut t = UdpTransport::bind("127.0.0.1:0", &[]).unwrap();
        assert!(t.poll_inbound().is_empty());
    }
}
