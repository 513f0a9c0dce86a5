//! Error types for the DRIFT protocol.

use thiserror::Error;

/// Errors constructing or restoring an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Persisted or received identity material is truncated or structurally
    /// invalid.
    #[error("malformed identity material")]
    Malformed,

    /// Identity storage failed.
    #[error("identity storage: {0}")]
    Storage(#[from] std::io::Error),
}

/// Errors in the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Link handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Errors parsing a wire frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame is too short.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Unknown frame type byte.
    #[error("invalid frame type: 0x{0:02x}")]
    InvalidType(u8),

    /// A length-prefixed field runs past the end of the frame.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Top-level DRIFT errors surfaced to the caller.
#[derive(Debug, Error)]
pub enum DriftError {
    /// An encrypted destination was created without an owning identity.
    #[error("encrypted destination requires an identity")]
    MissingIdentity,

    /// A send was attempted on a link that is not Active.
    #[error("link is not active")]
    LinkNotActive,

    /// The referenced link does not exist on this node.
    #[error("unknown link")]
    UnknownLink,

    /// Sealing a packet requires the destination identity, and no announce
    /// for the destination has been observed.
    #[error("no identity known for destination")]
    NoIdentityKnown,

    /// Identity error.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Frame error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}
