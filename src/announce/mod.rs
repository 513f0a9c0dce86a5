//! Signed presence records and flood bookkeeping.
//!
//! An announce advertises a destination's reachability: its address, name
//! hash, the announcing identity's public keys, an announcer-local
//! timestamp, and optional application data, all under an Ed25519
//! signature. Nodes flood unseen announces with an incremented hop count;
//! a short-lived cache keyed by (destination, timestamp) bounds the flood.

pub mod path_table;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::core::{
    FrameError, IdentityError, ADDRESS_HASH_SIZE, PUBLIC_IDENTITY_SIZE, SIGNATURE_SIZE,
};
use crate::destination::{Destination, Privacy};
use crate::hash::AddressHash;
use crate::crypto::PublicIdentity;

/// Minimum announce payload size (flags + name hash + keys + timestamp +
/// app-data length + signature).
pub const MIN_ANNOUNCE_PAYLOAD: usize =
    1 + ADDRESS_HASH_SIZE + PUBLIC_IDENTITY_SIZE + 8 + 2 + SIGNATURE_SIZE;

/// A decoded announce record.
#[derive(Debug, Clone)]
pub struct Announce {
    /// The announced destination address.
    pub destination: AddressHash,
    /// Privacy mode of the announced destination.
    pub privacy: Privacy,
    /// Hash of the destination's namespace.
    pub name_hash: AddressHash,
    /// The announcing identity's public keys.
    pub identity: PublicIdentity,
    /// Milliseconds on the announcer's clock when the record was built.
    pub timestamp_ms: u64,
    /// Optional application payload.
    pub app_data: Vec<u8>,
    /// Ed25519 signature over the record.
    pub signature: Vec<u8>,
}

impl Announce {
    /// Build and sign an announce for a destination.
    ///
    /// Returns `None` if the destination has no owning identity to sign
    /// with; announces are best-effort, so the caller drops silently.
    pub fn build(destination: &Destination, timestamp_ms: u64, app_data: &[u8]) -> Option<Self> {
        let identity = destination.identity()?;
        let public = identity.public();
        let address = destination.address();
        let name_hash = destination.name().hash();

        let message = signed_message(&address, &name_hash, &public, timestamp_ms, app_data);
        let signature = identity.sign(&message).to_vec();

        Some(Self {
            destination: address,
            privacy: destination.privacy(),
            name_hash,
            identity: public,
            timestamp_ms,
            app_data: app_data.to_vec(),
            signature,
        })
    }

    /// Serialize into a frame payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MIN_ANNOUNCE_PAYLOAD + self.app_data.len());
        buf.push(self.privacy.as_byte());
        buf.extend_from_slice(self.name_hash.as_bytes());
        buf.extend_from_slice(&self.identity.to_bytes());
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&(self.app_data.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.app_data);
        buf.extend_from_slice(&self.signature);
        buf
    }

    /// Parse an announce from a frame addressed to `destination`.
    pub fn decode(destination: AddressHash, payload: &[u8]) -> Result<Self, FrameError> {
        if payload.len() < MIN_ANNOUNCE_PAYLOAD {
            return Err(FrameError::TooShort {
                expected: MIN_ANNOUNCE_PAYLOAD,
                actual: payload.len(),
            });
        }

        let privacy =
            Privacy::from_byte(payload[0]).ok_or(FrameError::Malformed("privacy flag"))?;

        let mut offset = 1;
        let name_hash = AddressHash::from_slice(&payload[offset..offset + ADDRESS_HASH_SIZE])
            .ok_or(FrameError::Malformed("name hash"))?;
        offset += ADDRESS_HASH_SIZE;

        let identity = PublicIdentity::from_bytes(&payload[offset..offset + PUBLIC_IDENTITY_SIZE])
            .map_err(|_: IdentityError| FrameError::Malformed("public keys"))?;
        offset += PUBLIC_IDENTITY_SIZE;

        let timestamp_ms = u64::from_le_bytes(
            payload[offset..offset + 8]
                .try_into()
                .map_err(|_| FrameError::Malformed("timestamp"))?,
        );
        offset += 8;

        let app_data_len = u16::from_le_bytes(
            payload[offset..offset + 2]
                .try_into()
                .map_err(|_| FrameError::Malformed("app data length"))?,
        ) as usize;
        offset += 2;

        if payload.len() != offset + app_data_len + SIGNATURE_SIZE {
            return Err(FrameError::Malformed("app data length"));
        }

        let app_data = payload[offset..offset + app_data_len].to_vec();
        offset += app_data_len;
        let signature = payload[offset..].to_vec();

        Ok(Self {
            destination,
            privacy,
            name_hash,
            identity,
            timestamp_ms,
            app_data,
            signature,
        })
    }

    /// Verify the signature and the address binding.
    ///
    /// A valid announce proves the embedded identity vouches for the
    /// record, and that the destination address is honestly derived: for
    /// encrypted destinations from (name hash ‖ fingerprint), for plain
    /// destinations from the name hash alone.
    pub fn validate(&self) -> bool {
        let message = signed_message(
            &self.destination,
            &self.name_hash,
            &self.identity,
            self.timestamp_ms,
            &self.app_data,
        );
        if !self.identity.verify(&message, &self.signature) {
            return false;
        }

        match self.privacy {
            Privacy::Plain => self.destination == self.name_hash,
            Privacy::Encrypted => {
                let expected = AddressHash::digest(&[
                    self.name_hash.as_bytes(),
                    self.identity.fingerprint().as_bytes(),
                ]);
                self.destination == expected
            }
        }
    }

    /// Duplicate-suppression key: (destination, timestamp).
    pub fn dedup_key(&self) -> [u8; 24] {
        let mut key = [0u8; 24];
        key[..ADDRESS_HASH_SIZE].copy_from_slice(self.destination.as_bytes());
        key[ADDRESS_HASH_SIZE..].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        key
    }
}

fn signed_message(
    destination: &AddressHash,
    name_hash: &AddressHash,
    identity: &PublicIdentity,
    timestamp_ms: u64,
    app_data: &[u8],
) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(2 * ADDRESS_HASH_SIZE + PUBLIC_IDENTITY_SIZE + 8 + app_data.len());
    message.extend_from_slice(destination.as_bytes());
    message.extend_from_slice(name_hash.as_bytes());
    message.extend_from_slice(&identity.to_bytes());
    message.extend_from_slice(&timestamp_ms.to_le_bytes());
    message.extend_from_slice(app_data);
    message
}

/// Short-lived duplicate-suppression cache for the announce flood.
///
/// Bounded in both time and size; overflow evicts the oldest entry rather
/// than failing.
#[derive(Debug)]
pub struct SeenCache {
    entries: HashMap<[u8; 24], Instant>,
    order: VecDeque<[u8; 24]>,
    capacity: usize,
    ttl: Duration,
}

impl SeenCache {
    /// Create a cache holding at most `capacity` records for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
            ttl,
        }
    }

    /// Record a key. Returns `true` if it was not already present.
    pub fn insert_if_new(&mut self, key: [u8; 24], now: Instant) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }

        self.entries.insert(key, now);
        self.order.push_back(key);
        true
    }

    /// Drop records older than the cache TTL.
    pub fn sweep(&mut self, now: Instant) {
        while let Some(oldest) = self.order.front() {
            match self.entries.get(oldest) {
                Some(seen_at) if now.saturating_duration_since(*seen_at) >= self.ttl => {
                    self.entries.remove(oldest);
                    self.order.pop_front();
                }
                Some(_) => break,
                None => {
                    self.order.pop_front();
                }
            }
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
