//! Digest types used for addressing and packet identification.
//!
//! Routable addresses are 16-byte truncated SHA-256 digests; packet hashes
//! are full-width BLAKE2s-256 digests of wire content.

use blake2::{Blake2s256, Digest as _};
use sha2::{Digest, Sha256};

use crate::core::{ADDRESS_HASH_SIZE, PACKET_HASH_SIZE};

/// A 16-byte routable address.
///
/// Destination hashes, name hashes, and link ids all live in this space
/// and share the node's demultiplexing table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressHash([u8; ADDRESS_HASH_SIZE]);

impl AddressHash {
    /// Wrap raw bytes as an address.
    pub fn from_bytes(bytes: [u8; ADDRESS_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse an address from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDRESS_HASH_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Parse an address from lowercase or uppercase hex.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        Self::from_slice(&bytes)
    }

    /// Truncated SHA-256 over the concatenation of `parts`.
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; ADDRESS_HASH_SIZE];
        bytes.copy_from_slice(&digest[..ADDRESS_HASH_SIZE]);
        Self(bytes)
    }

    /// A fresh random address, used for link ids.
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; ADDRESS_HASH_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_HASH_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for AddressHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for AddressHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for AddressHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AddressHash({})", hex::encode(self.0))
    }
}

/// A 32-byte content digest identifying a single packet.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketHash([u8; PACKET_HASH_SIZE]);

impl PacketHash {
    /// Wrap raw bytes as a packet hash.
    pub fn from_bytes(bytes: [u8; PACKET_HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a packet hash from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; PACKET_HASH_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// BLAKE2s-256 over the concatenation of `parts`.
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Blake2s256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; PACKET_HASH_SIZE];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// The leading 16 bytes as an address, used to route proof frames.
    pub fn as_address(&self) -> AddressHash {
        let mut bytes = [0u8; ADDRESS_HASH_SIZE];
        bytes.copy_from_slice(&self.0[..ADDRESS_HASH_SIZE]);
        AddressHash::from_bytes(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; PACKET_HASH_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for PacketHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for PacketHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for PacketHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PacketHash({})", hex::encode(self.0))
    }
}
