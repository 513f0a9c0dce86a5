//! # DRIFT Protocol
//!
//! **D**atagram **R**outing **I**n **F**ragmented **T**opologies
//!
//! DRIFT is a mesh-network transport core for unreliable, multi-hop,
//! possibly disconnected networks. It provides:
//!
//! - **Identity**: Ed25519 + X25519 keypairs addressed by fingerprint
//! - **Addressing**: destinations derived deterministically from an
//!   application namespace, unguessable when bound to an identity
//! - **Discovery**: signed, flooded announces feeding a per-node path table
//! - **Links**: forward-secret encrypted channels with an explicit
//!   lifecycle state machine and keepalives
//! - **Receipts**: per-packet delivery proofs with timeout and round-trip
//!   measurement
//!
//! The core performs no I/O and no internal threading. Physical carriers
//! are injected as [`crate::core::FrameTransport`] collaborators, time
//! comes from an injected [`crate::core::Clock`], and everything advances
//! through the single non-blocking [`transport::Node::pulse`] entry point.
//!
//! ## Example
//!
//! ```rust
//! use drift_protocol::prelude::*;
//!
//! let bus = MemoryBus::new();
//!
//! let mut server = Node::new(NodeConfig::default());
//! server.attach(Box::new(bus.endpoint()));
//! let mut client = Node::new(NodeConfig::default());
//! client.attach(Box::new(bus.endpoint()));
//!
//! // The responder announces an encrypted destination; the client
//! // discovers it after a pulse.
//! let echo = server.register(Destination::encrypted_in(
//!     Identity::generate(),
//!     DestinationName::new("example_utilities", "echo.request"),
//! ));
//! server.set_proof_strategy(&echo, ProofStrategy::ProveAll);
//! server.announce(echo, None);
//!
//! server.pulse();
//! client.pulse();
//! assert!(client.has_path(&echo));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod announce;
pub mod core;
pub mod crypto;
pub mod destination;
pub mod hash;
pub mod link;
pub mod packet;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{
        Clock, DriftError, FileIdentityStore, FrameTransport, IdentityStore, ManualClock,
        SystemClock, TargetHint, TransportHandle,
    };
    pub use crate::crypto::{Identity, PublicIdentity};
    pub use crate::destination::{
        Addressing, Destination, DestinationName, Direction, Privacy, ProofStrategy,
    };
    pub use crate::hash::{AddressHash, PacketHash};
    pub use crate::link::{LinkClosedReason, LinkId, LinkStatus};
    pub use crate::packet::receipt::{Receipt, ReceiptStatus};
    pub use crate::transport::memory::{MemoryBus, MemoryTransport};
    pub use crate::transport::udp::UdpTransport;
    pub use crate::transport::{Event, Node, NodeConfig};
}

// Re-export commonly used items at crate root
pub use crate::core::DriftError;
pub use crate::crypto::Identity;
pub use crate::destination::{Destination, DestinationName, ProofStrategy};
pub use crate::hash::{AddressHash, PacketHash};
pub use crate::link::{LinkId, LinkStatus};
pub use crate::transport::{Event, Node, NodeConfig};
