//! Cryptographic layer: identities, the link handshake, and AEAD.
//!
//! Primitives come from the ecosystem (`ed25519-dalek`, `x25519-dalek`,
//! `snow`, `chacha20poly1305`); this module wires them into the shapes the
//! transport needs and keeps secret material zeroized.

mod aead;
mod handshake;
mod identity;

pub use aead::{
    decrypt, encrypt, link_aad, link_nonce, open, seal, SessionKey, LINK_AAD_SIZE,
};
pub use handshake::{
    HandshakeMode, InitiatorHandshake, ResponderHandshake, Role, SessionKeys,
};
pub use identity::{Identity, PublicIdentity};
