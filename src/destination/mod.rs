//! Namespace-addressed endpoints.
//!
//! A destination is named by an ordered application namespace and, for
//! encrypted destinations, bound to an identity's public keys. Its address
//! is a pure function of those inputs: two nodes constructing a plain
//! destination from the same namespace always agree on the address, and an
//! encrypted address cannot be guessed without the public key.

use crate::core::DriftError;
use crate::crypto::Identity;
use crate::hash::AddressHash;

/// Traffic direction of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Receives traffic on this node.
    In,
    /// Names a remote endpoint.
    Out,
}

/// Addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// A single recipient.
    Single,
    /// A group address. Carried for wire compatibility; group delivery
    /// semantics are out of scope.
    Group,
}

/// Privacy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privacy {
    /// Address derived from the namespace alone; payloads in the clear.
    Plain,
    /// Address bound to an identity; packet payloads sealed to it.
    Encrypted,
}

impl Privacy {
    /// Wire flag byte used in announces.
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Plain => 0x00,
            Self::Encrypted => 0x01,
        }
    }

    /// Parse the wire flag byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Plain),
            0x01 => Some(Self::Encrypted),
            _ => None,
        }
    }
}

/// Whether inbound packets are answered with a delivery proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProofStrategy {
    /// Never emit proofs.
    #[default]
    None,
    /// Prove every packet, whether or not the sender asked.
    ProveAll,
    /// Prove only packets whose sender explicitly requested one.
    ProveApp,
}

/// An ordered application namespace, rendered `"app.aspect..."`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationName {
    app: String,
    aspects: String,
}

impl DestinationName {
    /// Create a name from the application name and a dotted aspect path.
    pub fn new(app: &str, aspects: &str) -> Self {
        Self {
            app: app.to_string(),
            aspects: aspects.to_string(),
        }
    }

    /// The full dotted rendering.
    pub fn full_name(&self) -> String {
        if self.aspects.is_empty() {
            self.app.clone()
        } else {
            format!("{}.{}", self.app, self.aspects)
        }
    }

    /// Truncated SHA-256 of the dotted rendering.
    pub fn hash(&self) -> AddressHash {
        AddressHash::digest(&[self.full_name().as_bytes()])
    }
}

impl std::fmt::Display for DestinationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_name())
    }
}

/// Compute the address of a destination.
///
/// Plain: the name hash itself. Encrypted: truncated SHA-256 over
/// (name hash ‖ fingerprint).
pub fn destination_address(
    name: &DestinationName,
    privacy: Privacy,
    fingerprint: Option<AddressHash>,
) -> AddressHash {
    match (privacy, fingerprint) {
        (Privacy::Plain, _) => name.hash(),
        (Privacy::Encrypted, Some(fingerprint)) => {
            AddressHash::digest(&[name.hash().as_bytes(), fingerprint.as_bytes()])
        }
        // Unreachable through the public constructors; encrypted creation
        // without an identity fails first.
        (Privacy::Encrypted, None) => name.hash(),
    }
}

/// A named, addressable endpoint.
///
/// Lives for the process lifetime once registered on a node. The owning
/// identity signs announces and opens sealed packets; a plain destination
/// may carry one purely for announce signing.
pub struct Destination {
    name: DestinationName,
    direction: Direction,
    addressing: Addressing,
    privacy: Privacy,
    identity: Option<Identity>,
    address: AddressHash,
    proof_strategy: ProofStrategy,
}

impl Destination {
    /// Create a destination.
    ///
    /// Fails with [`DriftError::MissingIdentity`] if `privacy` is
    /// [`Privacy::Encrypted`] and no identity is supplied.
    pub fn create(
        direction: Direction,
        addressing: Addressing,
        privacy: Privacy,
        name: DestinationName,
        identity: Option<Identity>,
    ) -> Result<Self, DriftError> {
        if privacy == Privacy::Encrypted && identity.is_none() {
            return Err(DriftError::MissingIdentity);
        }

        let fingerprint = identity.as_ref().map(|i| i.fingerprint());
        let address = destination_address(&name, privacy, fingerprint);

        Ok(Self {
            name,
            direction,
            addressing,
            privacy,
            identity,
            address,
            proof_strategy: ProofStrategy::default(),
        })
    }

    /// Shorthand for an inbound encrypted single destination.
    pub fn encrypted_in(identity: Identity, name: DestinationName) -> Self {
        // Identity is present, so create cannot fail.
        match Self::create(
            Direction::In,
            Addressing::Single,
            Privacy::Encrypted,
            name,
            Some(identity),
        ) {
            Ok(destination) => destination,
            Err(_) => unreachable!("encrypted destination with identity"),
        }
    }

    /// Shorthand for an inbound plain single destination. The identity, if
    /// given, signs this destination's announces.
    pub fn plain_in(identity: Option<Identity>, name: DestinationName) -> Self {
        match Self::create(Direction::In, Addressing::Single, Privacy::Plain, name, identity) {
            Ok(destination) => destination,
            Err(_) => unreachable!("plain destination creation cannot fail"),
        }
    }

    /// The routable address.
    pub fn address(&self) -> AddressHash {
        self.address
    }

    /// The namespace name.
    pub fn name(&self) -> &DestinationName {
        &self.name
    }

    /// Traffic direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Addressing mode.
    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Privacy mode.
    pub fn privacy(&self) -> Privacy {
        self.privacy
    }

    /// The owning identity, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Current proof strategy.
    pub fn proof_strategy(&self) -> ProofStrategy {
        self.proof_strategy
    }

    /// Control automatic delivery proofs for inbound packets.
    pub fn set_proof_strategy(&mut self, strategy: ProofStrategy) {
        self.proof_strategy = strategy;
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Destination({} {})", self.name.full_name(), self.address)
    }
}
