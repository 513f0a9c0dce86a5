//! Protocol constants for DRIFT.
//!
//! These values are fixed by the protocol and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Routable address size (truncated SHA-256 digest).
pub const ADDRESS_HASH_SIZE: usize = 16;

/// Packet hash size (BLAKE2s-256 digest).
pub const PACKET_HASH_SIZE: usize = 32;

/// Ed25519 / X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Serialized identity size (signing seed + encryption secret).
pub const IDENTITY_SIZE: usize = 64;

/// Serialized public identity size (signing public + encryption public).
pub const PUBLIC_IDENTITY_SIZE: usize = 2 * PUBLIC_KEY_SIZE;

/// XChaCha20-Poly1305 session key size.
pub const SESSION_KEY_SIZE: usize = 32;

/// XChaCha20 nonce size.
pub const AEAD_NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size.
pub const AEAD_TAG_SIZE: usize = 16;

/// Per-packet nonce size (guarantees distinct packet hashes).
pub const PACKET_NONCE_SIZE: usize = 16;

// =============================================================================
// FRAME TYPES
// =============================================================================

/// Signed presence record, flooded for route discovery.
pub const FRAME_TYPE_ANNOUNCE: u8 = 0x01;

/// Link handshake initiation.
pub const FRAME_TYPE_LINK_REQUEST: u8 = 0x02;

/// Link handshake completion.
pub const FRAME_TYPE_LINK_RESPONSE: u8 = 0x03;

/// Encrypted link traffic.
pub const FRAME_TYPE_LINK_DATA: u8 = 0x04;

/// Authenticated link teardown.
pub const FRAME_TYPE_LINK_TEARDOWN: u8 = 0x05;

/// Single datagram addressed to a destination.
pub const FRAME_TYPE_PACKET: u8 = 0x06;

/// Signed delivery proof for a packet.
pub const FRAME_TYPE_PROOF: u8 = 0x07;

// =============================================================================
// PACKET FLAGS
// =============================================================================

/// Sender requests a delivery proof for this packet.
pub const PACKET_FLAG_WANT_PROOF: u8 = 0x01;

/// Packet data is sealed to the destination identity.
pub const PACKET_FLAG_SEALED: u8 = 0x02;

// =============================================================================
// ROUTING
// =============================================================================

/// Maximum hop count an announce may travel.
pub const DEFAULT_MAX_HOPS: u8 = 16;

/// Silence interval after which a path table entry expires.
pub const DEFAULT_PATH_EXPIRY: Duration = Duration::from_secs(3600);

/// Path table capacity; overflow evicts the oldest entry.
pub const DEFAULT_MAX_PATHS: usize = 1024;

/// Lifetime of announce duplicate-suppression records.
pub const DEFAULT_SEEN_TTL: Duration = Duration::from_secs(300);

/// Duplicate-suppression cache capacity.
pub const DEFAULT_MAX_SEEN: usize = 4096;

// =============================================================================
// LINK TIMING
// =============================================================================

/// Handshake deadline: a Pending link with no response closes after this.
pub const LINK_ESTABLISHMENT_TIMEOUT: Duration = Duration::from_secs(6);

/// Send a keepalive probe after this much idle time on an Active link.
pub const LINK_KEEPALIVE: Duration = Duration::from_secs(15);

/// An Active link with no traffic for this long becomes Stale.
pub const LINK_STALE_AFTER: Duration = Duration::from_secs(30);

/// A Stale link with no traffic for this long (total) closes.
pub const LINK_CLOSE_AFTER: Duration = Duration::from_secs(60);

// =============================================================================
// RECEIPT TIMING
// =============================================================================

/// Base proof deadline before any round-trip sample exists.
pub const PROOF_TIMEOUT_BASE: Duration = Duration::from_secs(6);

/// Additional proof deadline per hop toward the destination.
pub const PROOF_TIMEOUT_PER_HOP: Duration = Duration::from_secs(2);

/// Resolved receipts kept for querying; overflow evicts the oldest.
pub const DEFAULT_MAX_RECEIPTS: usize = 1024;
