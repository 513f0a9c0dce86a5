//! The link engine: negotiated, encrypted, stateful virtual channels.
//!
//! Each side of a link keeps its own state machine, synchronized only by
//! exchanged frames:
//!
//! ```text
//! Pending ──handshake response──▶ Active ──idle──▶ Stale ──grace──▶ Closed
//!    │                              ▲                │
//!    └──handshake timeout──▶ Closed └───any frame────┘
//! ```
//!
//! Link traffic is encrypted under directional session keys with the
//! per-link sequence number bound into nonce and AAD. Delivery is
//! skip-forward: a frame at or below the highest delivered sequence is
//! dropped, so duplicates can never reach the application and frames are
//! processed in sequence order.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::core::{CryptoError, DriftError, TransportHandle};
use crate::crypto::{self, InitiatorHandshake, PublicIdentity, Role, SessionKeys};
use crate::hash::AddressHash;

/// Link ids share the demultiplexing space with destination addresses.
pub type LinkId = AddressHash;

/// Context bytes inside the encrypted link payload.
pub(crate) mod context {
    /// Application data for the link callback.
    pub const DATA: u8 = 0x00;
    /// Keepalive probe.
    pub const KEEPALIVE: u8 = 0x01;
    /// Keepalive answer.
    pub const KEEPALIVE_ACK: u8 = 0x02;
    /// A packet riding the link, with delivery proof requested.
    pub const PACKET: u8 = 0x03;
    /// A delivery proof riding the link.
    pub const PROOF: u8 = 0x04;
    /// Teardown notice.
    pub const TEARDOWN: u8 = 0x05;
}

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Handshake request sent or received, awaiting completion.
    Pending,
    /// Session established, traffic flows.
    Active,
    /// No traffic past the idle deadline; revivable by any valid frame.
    Stale,
    /// Terminal.
    Closed,
}

/// Why a link reached [`LinkStatus::Closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClosedReason {
    /// No handshake response within the establishment timeout.
    EstablishmentFailed,
    /// The application on this node tore the link down.
    LocalTeardown,
    /// The peer sent a teardown notice.
    RemoteTeardown,
    /// The stale grace period elapsed with no traffic.
    IdleTimeout,
    /// The owning node shut down.
    Shutdown,
}

/// Timer configuration for the link state machine.
#[derive(Debug, Clone, Copy)]
pub struct LinkTimers {
    /// Pending links close after this with no response.
    pub establishment_timeout: Duration,
    /// Idle time before the initiator probes with a keepalive.
    pub keepalive: Duration,
    /// Idle time before an Active link goes Stale.
    pub stale_after: Duration,
    /// Total idle time before a Stale link closes.
    pub close_after: Duration,
}

/// What a timer pass decided for one link.
#[derive(Debug, Default)]
pub struct LinkTick {
    /// A state transition occurred.
    pub transition: Option<LinkStatus>,
    /// The node should send a keepalive probe on this link.
    pub send_keepalive: bool,
}

/// Outcome of decrypting an inbound link frame.
#[derive(Debug)]
pub enum LinkInbound {
    /// Frame verified and newly delivered.
    Delivered {
        /// Context byte from the plaintext.
        context: u8,
        /// Application bytes following the context.
        data: Vec<u8>,
    },
    /// Frame verified but at or below the delivery watermark; dropped.
    Duplicate,
}

/// One side of a link.
///
/// The initiating node and the responding node each hold their own `Link`
/// carrying the same id; the two are never shared.
pub struct Link {
    id: LinkId,
    role: Role,
    status: LinkStatus,
    /// The remote destination the initiator dialed; for a responder, the
    /// local destination that accepted the request.
    destination: AddressHash,
    remote_identity: Option<PublicIdentity>,
    handshake: Option<InitiatorHandshake>,
    keys: Option<SessionKeys>,
    send_seq: u64,
    recv_watermark: Option<u64>,
    created_at: Instant,
    last_activity: Instant,
    last_keepalive: Option<Instant>,
    transport: Option<TransportHandle>,
    rtt: Option<Duration>,
    close_reason: Option<LinkClosedReason>,
    closed_at: Option<Instant>,
}

impl Link {
    /// Create the initiating side, in Pending state.
    ///
    /// The handshake is attached when the request is actually sent, since
    /// the pattern depends on whether a path (and thus the responder's
    /// identity) is known at that moment.
    pub fn initiate(
        id: LinkId,
        destination: AddressHash,
        transport: Option<TransportHandle>,
        now: Instant,
    ) -> Self {
        Self {
            id,
            role: Role::Initiator,
            status: LinkStatus::Pending,
            destination,
            remote_identity: None,
            handshake: None,
            keys: None,
            send_seq: 0,
            recv_watermark: None,
            created_at: now,
            last_activity: now,
            last_keepalive: None,
            transport,
            rtt: None,
            close_reason: None,
            closed_at: None,
        }
    }

    /// Create the responding side, already keyed and Active.
    pub fn accept(
        id: LinkId,
        local_destination: AddressHash,
        keys: SessionKeys,
        transport: TransportHandle,
        now: Instant,
    ) -> Self {
        Self {
            id,
            role: Role::Responder,
            status: LinkStatus::Active,
            destination: local_destination,
            remote_identity: None,
            handshake: None,
            keys: Some(keys),
            send_seq: 0,
            recv_watermark: None,
            created_at: now,
            last_activity: now,
            last_keepalive: None,
            transport: Some(transport),
            rtt: None,
            close_reason: None,
            closed_at: None,
        }
    }

    /// The link id.
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// This side's handshake role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// Why the link closed, once Closed.
    pub fn close_reason(&self) -> Option<LinkClosedReason> {
        self.close_reason
    }

    /// The destination this link was dialed toward (initiator) or accepted
    /// on (responder).
    pub fn destination(&self) -> AddressHash {
        self.destination
    }

    /// The peer identity, when the handshake authenticated one.
    pub fn remote_identity(&self) -> Option<&PublicIdentity> {
        self.remote_identity.as_ref()
    }

    /// Handshake round-trip time, measured by the initiator.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// The transport this link speaks through.
    pub fn transport(&self) -> Option<TransportHandle> {
        self.transport
    }

    pub(crate) fn set_transport(&mut self, transport: TransportHandle) {
        self.transport = Some(transport);
    }

    pub(crate) fn begin_handshake(&mut self, handshake: InitiatorHandshake) {
        self.handshake = Some(handshake);
    }

    pub(crate) fn set_remote_identity(&mut self, identity: PublicIdentity) {
        self.remote_identity = Some(identity);
    }

    pub(crate) fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub(crate) fn mark_request_sent(&mut self, now: Instant) {
        // The establishment window opens when the request actually leaves.
        self.created_at = now;
    }

    pub(crate) fn take_handshake(&mut self) -> Option<InitiatorHandshake> {
        self.handshake.take()
    }

    /// Complete the handshake on the initiating side: Pending → Active.
    pub fn activate(&mut self, keys: SessionKeys, now: Instant) {
        self.keys = Some(keys);
        self.status = LinkStatus::Active;
        self.rtt = Some(now.saturating_duration_since(self.created_at));
        self.last_activity = now;
        debug!(link = %self.id, rtt = ?self.rtt, "link active");
    }

    /// Record authenticated traffic. Returns `true` if this revived the
    /// link from Stale.
    pub fn refresh_activity(&mut self, now: Instant) -> bool {
        self.last_activity = now;
        if self.status == LinkStatus::Stale {
            self.status = LinkStatus::Active;
            true
        } else {
            false
        }
    }

    /// Transition to Closed. Idempotent; the first reason wins.
    pub fn close(&mut self, reason: LinkClosedReason, now: Instant) -> bool {
        if self.status == LinkStatus::Closed {
            return false;
        }
        self.status = LinkStatus::Closed;
        self.close_reason = Some(reason);
        self.closed_at = Some(now);
        debug!(link = %self.id, ?reason, "link closed");
        true
    }

    /// When the link closed, once Closed.
    pub fn closed_at(&self) -> Option<Instant> {
        self.closed_at
    }

    /// Advance the link's timers against `now`.
    pub fn poll_timers(&mut self, now: Instant, timers: &LinkTimers) -> LinkTick {
        let mut tick = LinkTick::default();

        match self.status {
            LinkStatus::Pending => {
                if now.saturating_duration_since(self.created_at) >= timers.establishment_timeout {
                    self.close(LinkClosedReason::EstablishmentFailed, now);
                    tick.transition = Some(LinkStatus::Closed);
                }
            }
            LinkStatus::Active => {
                let idle = now.saturating_duration_since(self.last_activity);
                if idle >= timers.stale_after {
                    self.status = LinkStatus::Stale;
                    tick.transition = Some(LinkStatus::Stale);
                    trace!(link = %self.id, "link stale");
                } else if self.role == Role::Initiator && idle >= timers.keepalive {
                    let probe_due = match self.last_keepalive {
                        Some(sent) => now.saturating_duration_since(sent) >= timers.keepalive,
                        None => true,
                    };
                    if probe_due {
                        self.last_keepalive = Some(now);
                        tick.send_keepalive = true;
                    }
                }
            }
            LinkStatus::Stale => {
                if now.saturating_duration_since(self.last_activity) >= timers.close_after {
                    self.close(LinkClosedReason::IdleTimeout, now);
                    tick.transition = Some(LinkStatus::Closed);
                }
            }
            LinkStatus::Closed => {}
        }

        tick
    }

    /// Encrypt an outbound payload under the session keys.
    ///
    /// Output: `[ sequence (8, LE) | ciphertext ‖ tag ]` over
    /// `[ context | data ]`. Fails with [`DriftError::LinkNotActive`] for
    /// application data unless the link is Active; control contexts
    /// (keepalive, teardown) are allowed while Stale.
    pub fn encrypt_payload(
        &mut self,
        frame_type: u8,
        ctx: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, DriftError> {
        if ctx == context::DATA && self.status != LinkStatus::Active {
            return Err(DriftError::LinkNotActive);
        }
        if self.status == LinkStatus::Closed && ctx != context::TEARDOWN {
            return Err(DriftError::LinkNotActive);
        }

        let keys = self.keys.as_ref().ok_or(DriftError::LinkNotActive)?;
        let seq = self.send_seq;
        self.send_seq = self.send_seq.saturating_add(1);

        let mut plaintext = Vec::with_capacity(1 + data.len());
        plaintext.push(ctx);
        plaintext.extend_from_slice(data);

        let nonce = crypto::link_nonce(direction_byte(self.role), seq);
        let aad = crypto::link_aad(frame_type, &self.id, seq);
        let ciphertext = crypto::encrypt(keys.send_key(self.role), &nonce, &aad, &plaintext)
            .map_err(DriftError::Crypto)?;

        let mut payload = Vec::with_capacity(8 + ciphertext.len());
        payload.extend_from_slice(&seq.to_le_bytes());
        payload.extend_from_slice(&ciphertext);
        Ok(payload)
    }

    /// Verify and decrypt an inbound payload.
    ///
    /// The watermark advances only on successful authentication, and a
    /// frame at or below it is reported as [`LinkInbound::Duplicate`].
    pub fn decrypt_payload(
        &mut self,
        frame_type: u8,
        payload: &[u8],
    ) -> Result<LinkInbound, CryptoError> {
        if payload.len() < 8 {
            return Err(CryptoError::DecryptionFailed);
        }
        let keys = self.keys.as_ref().ok_or(CryptoError::DecryptionFailed)?;

        let seq = u64::from_le_bytes(
            payload[..8]
                .try_into()
                .map_err(|_| CryptoError::DecryptionFailed)?,
        );

        let peer_role = match self.role {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        };
        let nonce = crypto::link_nonce(direction_byte(peer_role), seq);
        let aad = crypto::link_aad(frame_type, &self.id, seq);
        let plaintext = crypto::decrypt(keys.recv_key(self.role), &nonce, &aad, &payload[8..])?;

        if plaintext.is_empty() {
            return Err(CryptoError::DecryptionFailed);
        }

        // Skip-forward delivery: anything at or below the watermark was
        // already delivered (or abandoned) and must not reach the
        // application again.
        if let Some(watermark) = self.recv_watermark {
            if seq <= watermark {
                trace!(link = %self.id, seq, watermark, "duplicate or late link frame");
                return Ok(LinkInbound::Duplicate);
            }
        }
        self.recv_watermark = Some(seq);

        Ok(LinkInbound::Delivered {
            context: plaintext[0],
            data: plaintext[1..].to_vec(),
        })
    }
}

fn direction_byte(role: Role) -> u8 {
    match role {
        Role::Initiator => 0x00,
        Role::Responder => 0x01,
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FRAME_TYPE_LINK_DATA;
    use crate::crypto::{HandshakeMode, Identity, ResponderHandshake};

    fn timers() -> LinkTimers {
        LinkTimers {
            establishment_timeout: Duration::from_secs(6),
            keepalive: Duration::from_secs(15),
            stale_after: Duration::from_secs(30),
            close_after: Duration::from_secs(60),
        }
    }

    /// Drive a real handshake and return both keyed sides.
    fn linked_pair() -> (Link, Link) {
        let now = Instant::now();
        let responder_identity = Identity::generate();
        let initiator_identity = Identity::generate();
        let id = AddressHash::random();
        let destination = AddressHash::digest(&[b"dest"]);

        let mut handshake = crate::crypto::InitiatorHandshake::new_known(
            &initiator_identity,
            responder_identity.public().kex_public(),
        )
        .unwrap();
        let request = handshake.write_request().unwrap();

        let mut initiator = Link::initiate(id, destination, Some(0), now);
        initiator.begin_handshake(handshake);
        initiator.set_remote_identity(responder_identity.public());
        initiator.mark_request_sent(now);

        let responder_hs =
            ResponderHandshake::new(HandshakeMode::Known, Some(&responder_identity)).unwrap();
        let (response, responder_keys) = responder_hs.respond(&request).unwrap();
        let responder = Link::accept(id, destination, responder_keys, 0, now);

        let handshake = initiator.take_handshake().unwrap();
        let keys = handshake.complete(&response).unwrap();
        initiator.activate(keys, now + Duration::from_millis(40));

        (initiator, responder)
    }

    #[test]
    fn test_handshake_establishes_both_sides() {
        let (initiator, responder) = linked_pair();
        assert_eq!(initiator.status(), LinkStatus::Active);
        assert_eq!(responder.status(), LinkStatus::Active);
        assert_eq!(initiator.rtt(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_link_data_roundtrip_both_directions() {
        let (mut initiator, mut responder) = linked_pair();

        let payload = initiator
            .encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"GET weather.node")
            .unwrap();
        match responder
            .decrypt_payload(FRAME_TYPE_LINK_DATA, &payload)
            .unwrap()
        {
            LinkInbound::Delivered { context: ctx, data } => {
                assert_eq!(ctx, context::DATA);
                assert_eq!(data, b"GET weather.node");
            }
            LinkInbound::Duplicate => panic!("first frame must deliver"),
        }

        let reply = responder
            .encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"sunny, 21C")
            .unwrap();
        match initiator
            .decrypt_payload(FRAME_TYPE_LINK_DATA, &reply)
            .unwrap()
        {
            LinkInbound::Delivered { data, .. } => assert_eq!(data, b"sunny, 21C"),
            LinkInbound::Duplicate => panic!("reply must deliver"),
        }
    }

    #[test]
    fn test_duplicate_frames_dropped() {
        let (mut initiator, mut responder) = linked_pair();

        let payload = initiator
            .encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"once")
            .unwrap();

        assert!(matches!(
            responder.decrypt_payload(FRAME_TYPE_LINK_DATA, &payload).unwrap(),
            LinkInbound::Delivered { .. }
        ));
        assert!(matches!(
            responder.decrypt_payload(FRAME_TYPE_LINK_DATA, &payload).unwrap(),
            LinkInbound::Duplicate
        ));
    }

    #[test]
    fn test_late_frame_dropped_after_skip_forward() {
        let (mut initiator, mut responder) = linked_pair();

        let first = initiator
            .encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"seq0")
            .unwrap();
        let second = initiator
            .encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"seq1")
            .unwrap();

        // Second frame arrives first; the watermark skips forward.
        assert!(matches!(
            responder.decrypt_payload(FRAME_TYPE_LINK_DATA, &second).unwrap(),
            LinkInbound::Delivered { .. }
        ));
        assert!(matches!(
            responder.decrypt_payload(FRAME_TYPE_LINK_DATA, &first).unwrap(),
            LinkInbound::Duplicate
        ));
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let (mut initiator, mut responder) = linked_pair();

        let mut payload = initiator
            .encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"data")
            .unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;

        assert!(responder
            .decrypt_payload(FRAME_TYPE_LINK_DATA, &payload)
            .is_err());

        // A rejected frame must not advance the watermark.
        let good = initiator
            .encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"good")
            .unwrap();
        // The tampered frame consumed seq 0; this is seq 1 and delivers.
        assert!(matches!(
            responder.decrypt_payload(FRAME_TYPE_LINK_DATA, &good).unwrap(),
            LinkInbound::Delivered { .. }
        ));
    }

    #[test]
    fn test_send_requires_active() {
        let now = Instant::now();
        let handshake = crate::crypto::InitiatorHandshake::new_anonymous().unwrap();
        let mut link = Link::initiate(AddressHash::random(), AddressHash::digest(&[b"dest"]), None, now);
        link.begin_handshake(handshake);

        assert!(matches!(
            link.encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, b"early"),
            Err(DriftError::LinkNotActive)
        ));
    }

    #[test]
    fn test_pending_times_out_to_closed() {
        let now = Instant::now();
        let handshake = crate::crypto::InitiatorHandshake::new_anonymous().unwrap();
        let mut link = Link::initiate(AddressHash::random(), AddressHash::digest(&[b"dest"]), None, now);
        link.begin_handshake(handshake);
        link.mark_request_sent(now);

        let tick = link.poll_timers(now + Duration::from_secs(3), &timers());
        assert!(tick.transition.is_none());

        let tick = link.poll_timers(now + Duration::from_secs(6), &timers());
        assert_eq!(tick.transition, Some(LinkStatus::Closed));
        assert_eq!(
            link.close_reason(),
            Some(LinkClosedReason::EstablishmentFailed)
        );
    }

    #[test]
    fn test_active_stale_closed_progression() {
        let (mut initiator, _) = linked_pair();
        let now = Instant::now();
        initiator.refresh_activity(now);

        let tick = initiator.poll_timers(now + Duration::from_secs(30), &timers());
        assert_eq!(tick.transition, Some(LinkStatus::Stale));

        let tick = initiator.poll_timers(now + Duration::from_secs(60), &timers());
        assert_eq!(tick.transition, Some(LinkStatus::Closed));
        assert_eq!(initiator.close_reason(), Some(LinkClosedReason::IdleTimeout));
    }

    #[test]
    fn test_stale_revives_on_traffic() {
        let (mut initiator, _) = linked_pair();
        let now = Instant::now();
        initiator.refresh_activity(now);

        initiator.poll_timers(now + Duration::from_secs(30), &timers());
        assert_eq!(initiator.status(), LinkStatus::Stale);

        assert!(initiator.refresh_activity(now + Duration::from_secs(31)));
        assert_eq!(initiator.status(), LinkStatus::Active);
    }

    #[test]
    fn test_keepalive_probe_scheduling() {
        let (mut initiator, mut responder) = linked_pair();
        let now = Instant::now();
        initiator.refresh_activity(now);
        responder.refresh_activity(now);

        // The initiator probes after the keepalive interval.
        let tick = initiator.poll_timers(now + Duration::from_secs(15), &timers());
        assert!(tick.send_keepalive);

        // Not again immediately.
        let tick = initiator.poll_timers(now + Duration::from_secs(16), &timers());
        assert!(!tick.send_keepalive);

        // The responder never probes.
        let tick = responder.poll_timers(now + Duration::from_secs(15), &timers());
        assert!(!tick.send_keepalive);
    }

    #[test]
    fn test_close_idempotent_first_reason_wins() {
        let (mut initiator, _) = linked_pair();
        let now = Instant::now();

        assert!(initiator.close(LinkClosedReason::LocalTeardown, now));
        assert!(!initiator.close(LinkClosedReason::IdleTimeout, now));
        assert_eq!(
            initiator.close_reason(),
            Some(LinkClosedReason::LocalTeardown)
        );
        assert_eq!(initiator.status(), LinkStatus::Closed);
    }
}
