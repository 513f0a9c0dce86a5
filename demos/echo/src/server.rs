//! The echo responder.

use std::net::SocketAddr;
use std::path::Path;
use std::time::{Duration, Instant};

use drift_protocol::prelude::*;
use tracing::info;

/// Pulse cadence for the responder loop.
const PULSE_INTERVAL: Duration = Duration::from_millis(100);

/// Name of the persisted identity file.
const IDENTITY_NAME: &str = "echo_server_identity";

pub fn run(
    bind: SocketAddr,
    peers: &[SocketAddr],
    identity_dir: &Path,
    announce_interval: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileIdentityStore::new(identity_dir);
    let identity = match Identity::from_store(&store, IDENTITY_NAME)? {
        Some(identity) => {
            info!(fingerprint = %identity.fingerprint(), "loaded identity");
            identity
        }
        None => {
            let identity = Identity::generate();
            identity.save_to_store(&store, IDENTITY_NAME)?;
            info!(fingerprint = %identity.fingerprint(), "created identity");
            identity
        }
    };

    let mut node = Node::new(NodeConfig {
        name: "echo-server".into(),
        ..NodeConfig::default()
    });
    node.attach(Box::new(UdpTransport::bind(bind, peers)?));

    let mut echo = Destination::encrypted_in(
        identity,
        DestinationName::new("example_utilities", "echo.request"),
    );
    echo.set_proof_strategy(ProofStrategy::ProveAll);
    let echo = node.register(echo);

    info!(destination = %echo, "echo server running");

    let announce_interval = Duration::from_secs(announce_interval);
    let mut last_announce: Option<Instant> = None;

    loop {
        let due = match last_announce {
            Some(at) => at.elapsed() >= announce_interval,
            None => true,
        };
        if due {
            node.announce(echo, Some(b"echo server".as_slice()));
            last_announce = Some(Instant::now());
            info!(destination = %echo, "sent announce");
        }

        node.pulse();

        for event in node.drain_events() {
            match event {
                Event::PacketReceived { packet_hash, .. } => {
                    info!(packet = %packet_hash, "received packet from echo client, proof sent");
                }
                Event::LinkStateChanged { link, status, .. } => {
                    info!(%link, ?status, "link state changed");
                }
                Event::LinkData { link, data } => {
                    info!(%link, bytes = data.len(), "echoing link data");
                    // Reply over the same link; a torn-down link just drops.
                    let _ = node.link_send(&link, &data);
                }
                _ => {}
            }
        }

        std::thread::sleep(PULSE_INTERVAL);
    }
}
