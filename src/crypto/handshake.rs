//! Link handshake.
//!
//! Links negotiate an ephemeral session over a two-message Noise exchange
//! riding on `LinkRequest` / `LinkResponse` frames:
//!
//! ```text
//! Noise_IK(s, rs):          toward a destination with a known identity
//!   -> e, es, s, ss
//!   <- e, ee, se
//!
//! Noise_NN:                 toward a PLAIN destination
//!   -> e
//!   <- e, ee
//! ```
//!
//! Both patterns contribute fresh ephemerals from each side, so every link
//! has its own forward-secret session. IK additionally authenticates the
//! responder: only the holder of the announced encryption key can complete
//! the exchange. After the handshake, both parties derive directional
//! session keys from the handshake hash using HKDF.

use hkdf::Hkdf;
use sha2::Sha256;
use snow::{Builder, HandshakeState};
use zeroize::Zeroize;

use super::aead::SessionKey;
use super::identity::Identity;
use crate::core::{CryptoError, PUBLIC_KEY_SIZE, SESSION_KEY_SIZE};

/// Noise pattern toward an identified destination.
const PATTERN_KNOWN: &str = "Noise_IK_25519_ChaChaPoly_BLAKE2s";

/// Noise pattern toward a PLAIN destination.
const PATTERN_ANONYMOUS: &str = "Noise_NN_25519_ChaChaPoly_BLAKE2s";

/// HKDF info label for link session keys.
const SESSION_KEY_LABEL: &[u8] = b"drift v1 link keys";

/// Handshake hash size (BLAKE2s).
const HANDSHAKE_HASH_SIZE: usize = 32;

/// Which Noise pattern a link request was built with.
///
/// Carried as a mode byte in the request so the responder can complete the
/// matching pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    /// `Noise_NN`: no static keys, unauthenticated.
    Anonymous,
    /// `Noise_IK`: the initiator knows the responder's encryption key.
    Known,
}

impl HandshakeMode {
    /// Parse the wire mode byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Anonymous),
            0x01 => Some(Self::Known),
            _ => None,
        }
    }

    /// The wire mode byte.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Anonymous => 0x00,
            Self::Known => 0x01,
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            Self::Anonymous => PATTERN_ANONYMOUS,
            Self::Known => PATTERN_KNOWN,
        }
    }
}

/// Role in the handshake; decides which directional key sends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The side that opened the link.
    Initiator,
    /// The side that answered the request.
    Responder,
}

/// Handshake state machine for the link initiator.
pub struct InitiatorHandshake {
    state: HandshakeState,
    mode: HandshakeMode,
}

impl InitiatorHandshake {
    /// Start an authenticated handshake toward a destination whose
    /// encryption key is known from an announce.
    pub fn new_known(
        local: &Identity,
        remote_kex: &[u8; PUBLIC_KEY_SIZE],
    ) -> Result<Self, CryptoError> {
        let builder = Builder::new(
            PATTERN_KNOWN
                .parse()
                .map_err(|_| CryptoError::HandshakeFailed("bad pattern".into()))?,
        );
        let state = builder
            .local_private_key(&local.kex_secret().to_bytes())
            .remote_public_key(remote_kex)
            .build_initiator()
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;

        Ok(Self {
            state,
            mode: HandshakeMode::Known,
        })
    }

    /// Start an anonymous handshake toward a PLAIN destination.
    pub fn new_anonymous() -> Result<Self, CryptoError> {
        let builder = Builder::new(
            PATTERN_ANONYMOUS
                .parse()
                .map_err(|_| CryptoError::HandshakeFailed("bad pattern".into()))?,
        );
        let state = builder
            .build_initiator()
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;

        Ok(Self {
            state,
            mode: HandshakeMode::Anonymous,
        })
    }

    /// The mode this handshake was built with.
    pub fn mode(&self) -> HandshakeMode {
        self.mode
    }

    /// Produce the handshake request message.
    pub fn write_request(&mut self) -> Result<Vec<u8>, CryptoError> {
        let mut buf = vec![0u8; 1024];
        let len = self
            .state
            .write_message(&[], &mut buf)
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Consume the handshake response and derive session keys.
    pub fn complete(mut self, response: &[u8]) -> Result<SessionKeys, CryptoError> {
        let mut payload = vec![0u8; 1024];
        self.state
            .read_message(response, &mut payload)
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;

        SessionKeys::derive(&self.state)
    }
}

/// Handshake state machine for the link responder.
pub struct ResponderHandshake {
    state: HandshakeState,
}

impl ResponderHandshake {
    /// Build the responder side for the pattern named in the request.
    ///
    /// `local` is required for [`HandshakeMode::Known`]; an anonymous
    /// handshake uses no static keys at all.
    pub fn new(mode: HandshakeMode, local: Option<&Identity>) -> Result<Self, CryptoError> {
        let builder = Builder::new(
            mode.pattern()
                .parse()
                .map_err(|_| CryptoError::HandshakeFailed("bad pattern".into()))?,
        );

        let state = match mode {
            HandshakeMode::Known => {
                let local = local.ok_or_else(|| {
                    CryptoError::HandshakeFailed("identity required for authenticated link".into())
                })?;
                builder
                    .local_private_key(&local.kex_secret().to_bytes())
                    .build_responder()
            }
            HandshakeMode::Anonymous => builder.build_responder(),
        }
        .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;

        Ok(Self { state })
    }

    /// Consume the request, produce the response, and derive session keys.
    pub fn respond(mut self, request: &[u8]) -> Result<(Vec<u8>, SessionKeys), CryptoError> {
        let mut payload = vec![0u8; 1024];
        self.state
            .read_message(request, &mut payload)
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;

        let mut response = vec![0u8; 1024];
        let len = self
            .state
            .write_message(&[], &mut response)
            .map_err(|e| CryptoError::HandshakeFailed(e.to_string()))?;
        response.truncate(len);

        let keys = SessionKeys::derive(&self.state)?;
        Ok((response, keys))
    }
}

/// Directional session keys derived from a completed handshake.
///
/// ```text
/// (initiator_key, responder_key) = HKDF-Expand(
///     handshake_hash,
///     "drift v1 link keys",
///     64
/// )
/// ```
pub struct SessionKeys {
    initiator_key: SessionKey,
    responder_key: SessionKey,
}

impl SessionKeys {
    fn derive(state: &HandshakeState) -> Result<Self, CryptoError> {
        let hash_slice = state.get_handshake_hash();
        if hash_slice.len() != HANDSHAKE_HASH_SIZE {
            return Err(CryptoError::KeyDerivationFailed);
        }

        let hk = Hkdf::<Sha256>::from_prk(hash_slice).map_err(|_| CryptoError::KeyDerivationFailed)?;
        let mut key_material = [0u8; 2 * SESSION_KEY_SIZE];
        hk.expand(SESSION_KEY_LABEL, &mut key_material)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        let mut initiator_key = [0u8; SESSION_KEY_SIZE];
        let mut responder_key = [0u8; SESSION_KEY_SIZE];
        initiator_key.copy_from_slice(&key_material[..SESSION_KEY_SIZE]);
        responder_key.copy_from_slice(&key_material[SESSION_KEY_SIZE..]);
        key_material.zeroize();

        Ok(Self {
            initiator_key: SessionKey::from_bytes(initiator_key),
            responder_key: SessionKey::from_bytes(responder_key),
        })
    }

    /// The key this role encrypts with.
    pub fn send_key(&self, role: Role) -> &SessionKey {
        match role {
            Role::Initiator => &self.initiator_key,
            Role::Responder => &self.responder_key,
        }
    }

    /// The key this role decrypts with.
    pub fn recv_key(&self, role: Role) -> &SessionKey {
        match role {
            Role::Initiator => &self.responder_key,
            Role::Responder => &self.initiator_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_byte_roundtrip() {
        for mode in [HandshakeMode::Anonymous, HandshakeMode::Known] {
            assert_eq!(HandshakeMode::from_byte(mode.as_byte()), Some(mode));
        }
        assert_eq!(HandshakeMode::from_byte(0x02), None);
    }

    #[test]
    fn test_known_handshake_roundtrip() {
        let initiator_identity = Identity::generate();
        let responder_identity = Identity::generate();
        let remote_kex = *responder_identity.public().kex_public();

        let mut initiator = InitiatorHandshake::new_known(&initiator_identity, &remote_kex).unwrap();
        let request = initiator.write_request().unwrap();

        let responder =
            ResponderHandshake::new(HandshakeMode::Known, Some(&responder_identity)).unwrap();
        let (response, responder_keys) = responder.respond(&request).unwrap();

        let initiator_keys = initiator.complete(&response).unwrap();

        assert_eq!(
            initiator_keys.send_key(Role::Initiator).as_bytes(),
            responder_keys.recv_key(Role::Responder).as_bytes()
        );
        assert_eq!(
            initiator_keys.recv_key(Role::Initiator).as_bytes(),
            responder_keys.send_key(Role::Responder).as_bytes()
        );
    }

    #[test]
    fn test_anonymous_handshake_roundtrip() {
        let mut initiator = InitiatorHandshake::new_anonymous().unwrap();
        let request = initiator.write_request().unwrap();

        let responder = ResponderHandshake::new(HandshakeMode::Anonymous, None).unwrap();
        let (response, responder_keys) = responder.respond(&request).unwrap();
        let initiator_keys = initiator.complete(&response).unwrap();

        assert_eq!(
            initiator_keys.send_key(Role::Initiator).as_bytes(),
            responder_keys.recv_key(Role::Responder).as_bytes()
        );
    }

    #[test]
    fn test_known_handshake_wrong_responder_fails() {
        let initiator_identity = Identity::generate();
        let expected_responder = Identity::generate();
        let actual_responder = Identity::generate();

        let mut initiator = InitiatorHandshake::new_known(
            &initiator_identity,
            expected_responder.public().kex_public(),
        )
        .unwrap();
        let request = initiator.write_request().unwrap();

        // A different identity cannot complete the exchange.
        let responder =
            ResponderHandshake::new(HandshakeMode::Known, Some(&actual_responder)).unwrap();
        assert!(responder.respond(&request).is_err());
    }

    #[test]
    fn test_known_responder_requires_identity() {
        assert!(ResponderHandshake::new(HandshakeMode::Known, None).is_err());
    }

    #[test]
    fn test_sessions_differ_between_links() {
        let responder_identity = Identity::generate();
        let initiator_identity = Identity::generate();
        let remote_kex = *responder_identity.public().kex_public();

        let mut keys = Vec::new();
        for _ in 0..2 {
            let mut initiator =
                InitiatorHandshake::new_known(&initiator_identity, &remote_kex).unwrap();
            let request = initiator.write_request().unwrap();
            let responder =
                ResponderHandshake::new(HandshakeMode::Known, Some(&responder_identity)).unwrap();
            let (response, _) = responder.respond(&request).unwrap();
            let session = initiator.complete(&response).unwrap();
            keys.push(*session.send_key(Role::Initiator).as_bytes());
        }

        // Fresh ephemerals per link mean fresh keys per link.
        assert_ne!(keys[0], keys[1]);
    }
}
