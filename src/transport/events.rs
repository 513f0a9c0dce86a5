//! Typed events drained by the host application.
//!
//! The core never invokes caller code from inside `pulse()`. Instead it
//! enqueues one event per observation (for link state, exactly one
//! event per transition, never per frame) and the caller drains the queue
//! at its own cadence.

use crate::hash::{AddressHash, PacketHash};
use crate::link::{LinkClosedReason, LinkId, LinkStatus};
use crate::packet::receipt::Receipt;

/// Something the node observed that the application may care about.
#[derive(Debug, Clone)]
pub enum Event {
    /// A valid, previously unseen announce arrived.
    AnnounceReceived {
        /// The announced destination.
        destination: AddressHash,
        /// Hops between this node and the announcer.
        hops: u8,
        /// Application data carried by the announce.
        app_data: Vec<u8>,
    },

    /// A packet reached one of this node's registered destinations.
    PacketReceived {
        /// The local destination (or link id, for in-link packets).
        destination: AddressHash,
        /// The packet's identifying hash.
        packet_hash: PacketHash,
        /// Decoded application data.
        data: Vec<u8>,
    },

    /// A link changed lifecycle state.
    LinkStateChanged {
        /// The link.
        link: LinkId,
        /// The state entered.
        status: LinkStatus,
        /// Why, when the state is Closed.
        reason: Option<LinkClosedReason>,
    },

    /// Application data arrived over an active link.
    LinkData {
        /// The link.
        link: LinkId,
        /// Decrypted payload.
        data: Vec<u8>,
    },

    /// A tracked packet resolved to Delivered or Failed.
    ReceiptResolved {
        /// The resolved receipt, including status and measured RTT.
        receipt: Receipt,
    },
}
