//! XChaCha20-Poly1305 encryption for link traffic and sealed packets.
//!
//! Link frames are encrypted under a directional session key with a nonce
//! derived from the direction and the per-link sequence number; the AAD
//! binds the frame type, link id, and sequence so a frame cannot be
//! replayed in another position or on another link.
//!
//! Single packets toward an encrypted destination are sealed: an ephemeral
//! X25519 exchange against the destination's encryption key feeds
//! HKDF-SHA256, and the single-use key encrypts under an all-zero nonce.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};
use zeroize::Zeroize;

use super::identity::Identity;
use crate::core::{
    CryptoError, ADDRESS_HASH_SIZE, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, PUBLIC_KEY_SIZE,
    SESSION_KEY_SIZE,
};
use crate::hash::AddressHash;

/// HKDF info label for sealed packet keys.
const PACKET_KEY_LABEL: &[u8] = b"drift v1 packet key";

/// AAD size for link frames (type + link id + sequence).
pub const LINK_AAD_SIZE: usize = 1 + ADDRESS_HASH_SIZE + 8;

/// A symmetric session key. Zeroized on drop.
#[derive(Clone)]
pub struct SessionKey {
    key: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Create a session key from raw bytes.
    pub fn from_bytes(key: [u8; SESSION_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.key
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Construct the nonce for a link frame.
///
/// Layout (24 bytes): `[ direction (1) | sequence (8, LE) | zero padding ]`.
/// The sequence number increases monotonically per direction, so a nonce is
/// never reused under one key.
pub fn link_nonce(direction: u8, sequence: u64) -> [u8; AEAD_NONCE_SIZE] {
    let mut nonce = [0u8; AEAD_NONCE_SIZE];
    nonce[0] = direction;
    nonce[1..9].copy_from_slice(&sequence.to_le_bytes());
    nonce
}

/// Construct the AAD for a link frame.
///
/// Layout: `[ frame type (1) | link id (16) | sequence (8, LE) ]`.
pub fn link_aad(frame_type: u8, link_id: &AddressHash, sequence: u64) -> [u8; LINK_AAD_SIZE] {
    let mut aad = [0u8; LINK_AAD_SIZE];
    aad[0] = frame_type;
    aad[1..17].copy_from_slice(link_id.as_bytes());
    aad[17..25].copy_from_slice(&sequence.to_le_bytes());
    aad
}

/// Encrypt plaintext under a session key.
pub fn encrypt(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt ciphertext under a session key.
pub fn decrypt(
    key: &SessionKey,
    nonce: &[u8; AEAD_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < AEAD_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seal plaintext to a recipient's encryption key.
///
/// Output: `[ ephemeral public (32) | ciphertext ‖ tag ]`. The ephemeral
/// secret is dropped after the exchange, so only the recipient can open
/// the result.
pub fn seal(
    recipient_kex: &[u8; PUBLIC_KEY_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = X25519Public::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&X25519Public::from(*recipient_kex));

    let key = derive_packet_key(shared.as_bytes(), ephemeral_public.as_bytes())?;
    let ciphertext = encrypt(&key, &[0u8; AEAD_NONCE_SIZE], aad, plaintext)?;

    let mut sealed = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    sealed.extend_from_slice(ephemeral_public.as_bytes());
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed payload with the recipient identity.
pub fn open(identity: &Identity, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < PUBLIC_KEY_SIZE + AEAD_TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let ephemeral_public: [u8; PUBLIC_KEY_SIZE] = sealed[..PUBLIC_KEY_SIZE]
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed)?;
    let shared = identity
        .kex_secret()
        .diffie_hellman(&X25519Public::from(ephemeral_public));

    let key = derive_packet_key(shared.as_bytes(), &ephemeral_public)?;
    decrypt(&key, &[0u8; AEAD_NONCE_SIZE], aad, &sealed[PUBLIC_KEY_SIZE..])
}

/// HKDF-SHA256 a single-use packet key from the exchange result.
///
/// The ephemeral public key salts the extraction.
fn derive_packet_key(
    shared: &[u8; 32],
    ephemeral_public: &[u8; PUBLIC_KEY_SIZE],
) -> Result<SessionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(ephemeral_public), shared);
    let mut key = [0u8; SESSION_KEY_SIZE];
    hk.expand(PACKET_KEY_LABEL, &mut key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(SessionKey::from_bytes(key))
}
