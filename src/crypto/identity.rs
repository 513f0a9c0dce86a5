//! Identity keypair management.
//!
//! An identity is an Ed25519 signing keypair plus an X25519 encryption
//! keypair, addressed by a fingerprint digest of the two public keys.
//! Secret material is zeroized on drop and never leaves the node.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::core::{
    IdentityError, IdentityStore, IDENTITY_SIZE, PUBLIC_IDENTITY_SIZE, PUBLIC_KEY_SIZE,
    SIGNATURE_SIZE,
};
use crate::hash::AddressHash;

/// A node-held keypair providing signing and encryption capability.
///
/// Immutable once constructed. The serialized form is exactly
/// [`IDENTITY_SIZE`] bytes: the Ed25519 seed followed by the X25519 secret.
pub struct Identity {
    sign_key: SigningKey,
    kex_key: StaticSecret,
}

impl Identity {
    /// Generate a fresh identity from the OS random source.
    pub fn generate() -> Self {
        Self {
            sign_key: SigningKey::generate(&mut OsRng),
            kex_key: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Restore an identity from its serialized form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != IDENTITY_SIZE {
            return Err(IdentityError::Malformed);
        }

        let mut seed = [0u8; PUBLIC_KEY_SIZE];
        let mut kex = [0u8; PUBLIC_KEY_SIZE];
        seed.copy_from_slice(&bytes[..PUBLIC_KEY_SIZE]);
        kex.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..]);

        let identity = Self {
            sign_key: SigningKey::from_bytes(&seed),
            kex_key: StaticSecret::from(kex),
        };

        seed.zeroize();
        kex.zeroize();

        Ok(identity)
    }

    /// Serialize the secret material. Byte-exact round trip with
    /// [`Identity::from_bytes`].
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn to_bytes(&self) -> [u8; IDENTITY_SIZE] {
        let mut bytes = [0u8; IDENTITY_SIZE];
        bytes[..PUBLIC_KEY_SIZE].copy_from_slice(&self.sign_key.to_bytes());
        bytes[PUBLIC_KEY_SIZE..].copy_from_slice(&self.kex_key.to_bytes());
        bytes
    }

    /// Load an identity from a store, or `None` if nothing is persisted
    /// under `name`.
    pub fn from_store(
        store: &dyn IdentityStore,
        name: &str,
    ) -> Result<Option<Self>, IdentityError> {
        match store.load(name)? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist this identity under `name`.
    pub fn save_to_store(&self, store: &dyn IdentityStore, name: &str) -> Result<(), IdentityError> {
        let mut bytes = self.to_bytes();
        let result = store.save(name, &bytes);
        bytes.zeroize();
        Ok(result?)
    }

    /// The shareable half of this identity.
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            sign_key: self.sign_key.verifying_key(),
            kex_key: *X25519Public::from(&self.kex_key).as_bytes(),
        }
    }

    /// Fingerprint of the public keys; see [`PublicIdentity::fingerprint`].
    pub fn fingerprint(&self) -> AddressHash {
        self.public().fingerprint()
    }

    /// Sign a message with the Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.sign_key.sign(message).to_bytes()
    }

    /// The raw X25519 secret, for the link handshake and packet unsealing.
    pub(crate) fn kex_secret(&self) -> &StaticSecret {
        &self.kex_key
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({})", self.fingerprint())
    }
}

/// The public half of an identity, as carried in announces.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicIdentity {
    sign_key: VerifyingKey,
    kex_key: [u8; PUBLIC_KEY_SIZE],
}

impl PublicIdentity {
    /// Parse public key material from its wire form (signing public
    /// followed by encryption public).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != PUBLIC_IDENTITY_SIZE {
            return Err(IdentityError::Malformed);
        }

        let sign: [u8; PUBLIC_KEY_SIZE] = bytes[..PUBLIC_KEY_SIZE]
            .try_into()
            .map_err(|_| IdentityError::Malformed)?;
        let sign_key = VerifyingKey::from_bytes(&sign).map_err(|_| IdentityError::Malformed)?;

        let mut kex_key = [0u8; PUBLIC_KEY_SIZE];
        kex_key.copy_from_slice(&bytes[PUBLIC_KEY_SIZE..]);

        Ok(Self { sign_key, kex_key })
    }

    /// Serialize to the wire form.
    pub fn to_bytes(&self) -> [u8; PUBLIC_IDENTITY_SIZE] {
        let mut bytes = [0u8; PUBLIC_IDENTITY_SIZE];
        bytes[..PUBLIC_KEY_SIZE].copy_from_slice(self.sign_key.as_bytes());
        bytes[PUBLIC_KEY_SIZE..].copy_from_slice(&self.kex_key);
        bytes
    }

    /// Fingerprint: truncated SHA-256 over (signing public ‖ encryption
    /// public). A pure function of the public keys.
    pub fn fingerprint(&self) -> AddressHash {
        let mut hasher = Sha256::new();
        hasher.update(self.sign_key.as_bytes());
        hasher.update(self.kex_key);
        let digest = hasher.finalize();
        let mut bytes = [0u8; crate::core::ADDRESS_HASH_SIZE];
        bytes.copy_from_slice(&digest[..crate::core::ADDRESS_HASH_SIZE]);
        AddressHash::from_bytes(bytes)
    }

    /// Verify an Ed25519 signature over `message`.
    ///
    /// Never errors: any mismatch, including a malformed signature, is
    /// `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        self.sign_key.verify(message, &signature).is_ok()
    }

    /// The X25519 encryption public key.
    pub fn kex_public(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.kex_key
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicIdentity({})", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_serialize_roundtrip() {
        let identity = Identity::generate();
        let restored = Identity::from_bytes(&identity.to_bytes()).unwrap();

        assert_eq!(identity.fingerprint(), restored.fingerprint());
        assert_eq!(identity.to_bytes(), restored.to_bytes());
    }

    #[test]
    fn test_deserialize_rejects_truncated() {
        assert!(matches!(
            Identity::from_bytes(&[0u8; 63]),
            Err(IdentityError::Malformed)
        ));
        assert!(matches!(
            Identity::from_bytes(&[]),
            Err(IdentityError::Malformed)
        ));
    }

    #[test]
    fn test_sign_verify() {
        let identity = Identity::generate();
        let other = Identity::generate();
        let message = b"announce record";

        let signature = identity.sign(message);

        assert!(identity.public().verify(message, &signature));
        assert!(!other.public().verify(message, &signature));
        assert!(!identity.public().verify(b"different message", &signature));
    }

    #[test]
    fn test_verify_never_panics_on_garbage() {
        let identity = Identity::generate();
        assert!(!identity.public().verify(b"msg", &[]));
        assert!(!identity.public().verify(b"msg", &[0u8; 12]));
        assert!(!identity.public().verify(b"msg", &[0xFF; 64]));
    }

    #[test]
    fn test_public_identity_roundtrip() {
        let identity = Identity::generate();
        let public = identity.public();
        let restored = PublicIdentity::from_bytes(&public.to_bytes()).unwrap();

        assert_eq!(public.fingerprint(), restored.fingerprint());
        assert_eq!(public.kex_public(), restored.kex_public());
    }

    #[test]
    fn test_public_identity_rejects_bad_point() {
        // All-ones is not a valid Ed25519 compressed point.
        let mut bytes = [0xFFu8; PUBLIC_IDENTITY_SIZE];
        bytes[31] = 0xFF;
        assert!(PublicIdentity::from_bytes(&bytes).is_err());
        assert!(PublicIdentity::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_fingerprint_stable() {
        let identity = Identity::generate();
        assert_eq!(identity.fingerprint(), identity.public().fingerprint());
        assert_eq!(identity.fingerprint(), identity.fingerprint());
    }
}
