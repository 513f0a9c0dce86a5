//! Wire frames, single packets, and delivery proofs.
//!
//! Every frame on the wire shares one header:
//!
//! ```text
//! +--------+--------+----------------------+-------------+
//! | Type   | Hops   | Destination          | Payload     |
//! | 1 byte | 1 byte | 16 bytes             | variable    |
//! +--------+--------+----------------------+-------------+
//! ```
//!
//! The destination field demultiplexes inbound frames: destination
//! addresses, link ids, and truncated packet hashes (for proofs) all live
//! in the same 16-byte space.

pub mod receipt;

use rand::RngCore;

use crate::core::{
    CryptoError, FrameError, ADDRESS_HASH_SIZE, FRAME_TYPE_ANNOUNCE, FRAME_TYPE_LINK_DATA,
    FRAME_TYPE_LINK_REQUEST, FRAME_TYPE_LINK_RESPONSE, FRAME_TYPE_LINK_TEARDOWN,
    FRAME_TYPE_PACKET, FRAME_TYPE_PROOF, PACKET_FLAG_SEALED, PACKET_FLAG_WANT_PROOF,
    PACKET_HASH_SIZE, PACKET_NONCE_SIZE, SIGNATURE_SIZE,
};
use crate::crypto::{self, Identity, PublicIdentity};
use crate::hash::{AddressHash, PacketHash};

/// Frame header size (type + hops + destination).
pub const FRAME_HEADER_SIZE: usize = 2 + ADDRESS_HASH_SIZE;

/// Minimum size of a packet payload (nonce + flags).
pub const MIN_PACKET_PAYLOAD: usize = PACKET_NONCE_SIZE + 1;

/// Size of a proof payload (packet hash + signature).
pub const PROOF_PAYLOAD_SIZE: usize = PACKET_HASH_SIZE + SIGNATURE_SIZE;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Signed presence record, flooded for route discovery.
    Announce = FRAME_TYPE_ANNOUNCE,
    /// Link handshake initiation.
    LinkRequest = FRAME_TYPE_LINK_REQUEST,
    /// Link handshake completion.
    LinkResponse = FRAME_TYPE_LINK_RESPONSE,
    /// Encrypted link traffic.
    LinkData = FRAME_TYPE_LINK_DATA,
    /// Authenticated link teardown.
    LinkTeardown = FRAME_TYPE_LINK_TEARDOWN,
    /// Single datagram addressed to a destination.
    Packet = FRAME_TYPE_PACKET,
    /// Signed delivery proof for a packet.
    Proof = FRAME_TYPE_PROOF,
}

impl FrameType {
    /// Parse frame type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FRAME_TYPE_ANNOUNCE => Some(Self::Announce),
            FRAME_TYPE_LINK_REQUEST => Some(Self::LinkRequest),
            FRAME_TYPE_LINK_RESPONSE => Some(Self::LinkResponse),
            FRAME_TYPE_LINK_DATA => Some(Self::LinkData),
            FRAME_TYPE_LINK_TEARDOWN => Some(Self::LinkTeardown),
            FRAME_TYPE_PACKET => Some(Self::Packet),
            FRAME_TYPE_PROOF => Some(Self::Proof),
            _ => None,
        }
    }

    /// The wire byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded wire frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Hops traveled so far; only announces are ever forwarded.
    pub hops: u8,
    /// Demultiplexing address.
    pub destination: AddressHash,
    /// Type-specific payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame with a zero hop count.
    pub fn new(frame_type: FrameType, destination: AddressHash, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            hops: 0,
            destination,
            payload,
        }
    }

    /// Serialize for transmission.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.push(self.frame_type.as_byte());
        buf.push(self.hops);
        buf.extend_from_slice(self.destination.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a frame from raw bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < FRAME_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: FRAME_HEADER_SIZE,
                actual: raw.len(),
            });
        }

        let frame_type = FrameType::from_byte(raw[0]).ok_or(FrameError::InvalidType(raw[0]))?;
        let destination = AddressHash::from_slice(&raw[2..FRAME_HEADER_SIZE])
            .ok_or(FrameError::Malformed("destination"))?;

        Ok(Self {
            frame_type,
            hops: raw[1],
            destination,
            payload: raw[FRAME_HEADER_SIZE..].to_vec(),
        })
    }
}

/// The payload of a `Packet` frame.
///
/// ```text
/// +------------------+--------+----------------+
/// | Nonce            | Flags  | Data           |
/// | 16 bytes         | 1 byte | variable       |
/// +------------------+--------+----------------+
/// ```
///
/// The random nonce makes packet hashes distinct even for identical
/// payloads to the same destination.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Random per-packet nonce.
    pub nonce: [u8; PACKET_NONCE_SIZE],
    /// Packet flags.
    pub flags: u8,
    /// Wire data; sealed when [`PACKET_FLAG_SEALED`] is set.
    pub data: Vec<u8>,
}

impl Packet {
    /// Whether the sender requested a delivery proof.
    pub fn wants_proof(&self) -> bool {
        self.flags & PACKET_FLAG_WANT_PROOF != 0
    }

    /// Whether the data is sealed to the destination identity.
    pub fn is_sealed(&self) -> bool {
        self.flags & PACKET_FLAG_SEALED != 0
    }

    /// Serialize into a frame payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_PACKET_PAYLOAD + self.data.len());
        buf.extend_from_slice(&self.nonce);
        buf.push(self.flags);
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Parse from a frame payload.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < MIN_PACKET_PAYLOAD {
            return Err(FrameError::TooShort {
                expected: MIN_PACKET_PAYLOAD,
                actual: payload.len(),
            });
        }

        let mut nonce = [0u8; PACKET_NONCE_SIZE];
        nonce.copy_from_slice(&payload[..PACKET_NONCE_SIZE]);

        Ok(Self {
            nonce,
            flags: payload[PACKET_NONCE_SIZE],
            data: payload[MIN_PACKET_PAYLOAD..].to_vec(),
        })
    }

    /// The hash identifying this packet toward `destination`.
    ///
    /// Computed over the wire data, so sender and receiver agree whether or
    /// not the data is sealed.
    pub fn hash(&self, destination: &AddressHash) -> PacketHash {
        packet_hash(destination, &self.nonce, &self.data)
    }
}

/// Digest of (destination ‖ nonce ‖ wire data).
pub fn packet_hash(
    destination: &AddressHash,
    nonce: &[u8; PACKET_NONCE_SIZE],
    data: &[u8],
) -> PacketHash {
    PacketHash::digest(&[destination.as_bytes(), nonce, data])
}

/// Build a cleartext packet toward `destination`.
pub fn build_plain(
    destination: &AddressHash,
    data: &[u8],
    want_proof: bool,
) -> (Packet, PacketHash) {
    let packet = Packet {
        nonce: fresh_nonce(),
        flags: if want_proof { PACKET_FLAG_WANT_PROOF } else { 0 },
        data: data.to_vec(),
    };
    let hash = packet.hash(destination);
    (packet, hash)
}

/// Build a packet sealed to the destination identity.
pub fn build_sealed(
    destination: &AddressHash,
    recipient: &PublicIdentity,
    data: &[u8],
    want_proof: bool,
) -> Result<(Packet, PacketHash), CryptoError> {
    let nonce = fresh_nonce();
    let mut aad = Vec::with_capacity(ADDRESS_HASH_SIZE + PACKET_NONCE_SIZE);
    aad.extend_from_slice(destination.as_bytes());
    aad.extend_from_slice(&nonce);

    let sealed = crypto::seal(recipient.kex_public(), &aad, data)?;
    let mut flags = PACKET_FLAG_SEALED;
    if want_proof {
        flags |= PACKET_FLAG_WANT_PROOF;
    }

    let packet = Packet {
        nonce,
        flags,
        data: sealed,
    };
    let hash = packet.hash(destination);
    Ok((packet, hash))
}

/// Recover the application data from a received packet.
///
/// Sealed packets require the destination's identity.
pub fn open_packet(
    packet: &Packet,
    destination: &AddressHash,
    identity: Option<&Identity>,
) -> Result<Vec<u8>, CryptoError> {
    if !packet.is_sealed() {
        return Ok(packet.data.clone());
    }

    let identity = identity.ok_or(CryptoError::DecryptionFailed)?;
    let mut aad = Vec::with_capacity(ADDRESS_HASH_SIZE + PACKET_NONCE_SIZE);
    aad.extend_from_slice(destination.as_bytes());
    aad.extend_from_slice(&packet.nonce);

    crypto::open(identity, &aad, &packet.data)
}

/// Build a proof payload: the packet hash and a signature over it.
pub fn build_proof(identity: &Identity, hash: &PacketHash) -> Vec<u8> {
    let mut payload = Vec::with_capacity(PROOF_PAYLOAD_SIZE);
    payload.extend_from_slice(hash.as_bytes());
    payload.extend_from_slice(&identity.sign(hash.as_bytes()));
    payload
}

/// Split a proof payload into packet hash and signature.
pub fn decode_proof(payload: &[u8]) -> Result<(PacketHash, &[u8]), FrameError> {
    if payload.len() != PROOF_PAYLOAD_SIZE {
        return Err(FrameError::TooShort {
            expected: PROOF_PAYLOAD_SIZE,
            actual: payload.len(),
        });
    }

    let hash = PacketHash::from_slice(&payload[..PACKET_HASH_SIZE])
        .ok_or(FrameError::Malformed("packet hash"))?;
    Ok((hash, &payload[PACKET_HASH_SIZE..]))
}

fn fresh_nonce() -> [u8; PACKET_NONCE_SIZE] {
    let mut nonce = [0u8; PACKET_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}
