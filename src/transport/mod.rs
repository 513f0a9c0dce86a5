//! The transport pump and its collaborators.
//!
//! [`Node`] is the single scheduling point: the host calls
//! [`Node::pulse`] on a regular cadence (sub-second recommended) and
//! drains typed [`Event`]s at its own pace. Two frame transports ship with
//! the crate: an in-memory bus for tests and local setups, and a
//! non-blocking UDP carrier for the demo binaries.

mod events;
pub mod memory;
mod node;
pub mod udp;

pub use events::Event;
pub use node::{Node, NodeConfig};
