//! The link client.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use drift_protocol::prelude::*;
use tracing::info;

/// Pulse cadence for the client loop.
const PULSE_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(
    destination: &str,
    bind: SocketAddr,
    peers: &[SocketAddr],
    query: &str,
    timeout: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let destination =
        AddressHash::from_hex(destination).ok_or("destination must be 32 hex characters")?;
    let deadline = Instant::now() + Duration::from_secs(timeout);

    let mut node = Node::new(NodeConfig {
        name: "echo-client".into(),
        ..NodeConfig::default()
    });
    node.attach(Box::new(UdpTransport::bind(bind, peers)?));

    // Wait for an announce unless the destination is already routable.
    info!(%destination, "waiting for path");
    while !node.has_path(&destination) {
        if Instant::now() >= deadline {
            return Err("no announce received for destination".into());
        }
        node.pulse();
        node.drain_events();
        std::thread::sleep(PULSE_INTERVAL);
    }
    info!(hops = node.hops_to(&destination), "path known");

    let link = node.link(destination);
    let mut sent = false;

    loop {
        if Instant::now() >= deadline {
            node.teardown(&link);
            node.pulse();
            return Err("timed out waiting for reply".into());
        }

        node.pulse();

        if !sent && node.link_status(&link) == Some(LinkStatus::Active) {
            info!(rtt = ?node.link_rtt(&link), "link active, sending query");
            node.link_send(&link, query.as_bytes())?;
            sent = true;
        }

        for event in node.drain_events() {
            match event {
                Event::LinkData { data, .. } => {
                    println!("[REPLY] {}", String::from_utf8_lossy(&data));
                    node.teardown(&link);
                }
                Event::LinkStateChanged {
                    status: LinkStatus::Closed,
                    reason,
                    ..
                } => {
                    info!(?reason, "link closed");
                    node.pulse();
                    return Ok(());
                }
                _ => {}
            }
        }

        std::thread::sleep(PULSE_INTERVAL);
    }
}
