//! The node: one mesh transport instance and its `pulse()` pump.
//!
//! A `Node` owns all process-wide transport state: registered
//! destinations, the path table, the link set, and pending receipts, scoped
//! to one instance, so several independent nodes can coexist in a process.
//! `pulse()` is the single scheduling point: it drains inbound frames,
//! advances every timer by comparing stored deadlines against the injected
//! clock, and never blocks or sleeps.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::{debug, trace};

use crate::announce::path_table::{PathEntry, PathTable};
use crate::announce::{Announce, SeenCache};
use crate::core::{
    Clock, DriftError, FrameTransport, SystemClock, TargetHint, TransportHandle,
    DEFAULT_MAX_HOPS, DEFAULT_MAX_PATHS, DEFAULT_MAX_RECEIPTS, DEFAULT_MAX_SEEN,
    DEFAULT_PATH_EXPIRY, DEFAULT_SEEN_TTL, FRAME_TYPE_LINK_DATA, FRAME_TYPE_LINK_TEARDOWN,
    LINK_CLOSE_AFTER, LINK_ESTABLISHMENT_TIMEOUT, LINK_KEEPALIVE, LINK_STALE_AFTER,
    PACKET_NONCE_SIZE, PROOF_TIMEOUT_BASE, PROOF_TIMEOUT_PER_HOP,
};
use crate::crypto::{HandshakeMode, Identity, InitiatorHandshake, ResponderHandshake, Role};
use crate::destination::{Destination, Privacy, ProofStrategy};
use crate::hash::{AddressHash, PacketHash};
use crate::link::{context, Link, LinkClosedReason, LinkId, LinkInbound, LinkStatus, LinkTimers};
use crate::packet::receipt::{Receipt, ReceiptTable};
use crate::packet::{self, Frame, FrameType, Packet};

use super::events::Event;

/// How long forwarding state for relayed links and proofs is retained.
const REVERSE_ROUTE_TTL: Duration = Duration::from_secs(300);

/// Queued proof-grants awaiting an explicit `prove()` call.
const MAX_PENDING_PROOFS: usize = 256;

/// Tunables for one node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Name used in logs.
    pub name: String,
    /// Whether this node re-broadcasts announces and relays frames for
    /// other nodes (transport/router mode).
    pub forward_announces: bool,
    /// Announce flood ceiling.
    pub max_hops: u8,
    /// Path entries expire after this silence interval.
    pub path_expiry: Duration,
    /// Path table capacity.
    pub max_paths: usize,
    /// Announce duplicate-suppression record lifetime.
    pub seen_ttl: Duration,
    /// Announce duplicate-suppression cache capacity.
    pub max_seen: usize,
    /// Pending links close after this with no handshake response.
    pub link_establishment_timeout: Duration,
    /// Idle interval before a keepalive probe.
    pub link_keepalive: Duration,
    /// Idle interval before Active becomes Stale.
    pub link_stale_after: Duration,
    /// Total idle interval before Stale closes.
    pub link_close_after: Duration,
    /// Proof deadline base before any RTT sample.
    pub proof_timeout_base: Duration,
    /// Proof deadline scaling per hop.
    pub proof_timeout_per_hop: Duration,
    /// Resolved receipts kept queryable.
    pub max_receipts: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "drift".to_string(),
            forward_announces: false,
            max_hops: DEFAULT_MAX_HOPS,
            path_expiry: DEFAULT_PATH_EXPIRY,
            max_paths: DEFAULT_MAX_PATHS,
            seen_ttl: DEFAULT_SEEN_TTL,
            max_seen: DEFAULT_MAX_SEEN,
            link_establishment_timeout: LINK_ESTABLISHMENT_TIMEOUT,
            link_keepalive: LINK_KEEPALIVE,
            link_stale_after: LINK_STALE_AFTER,
            link_close_after: LINK_CLOSE_AFTER,
            proof_timeout_base: PROOF_TIMEOUT_BASE,
            proof_timeout_per_hop: PROOF_TIMEOUT_PER_HOP,
            max_receipts: DEFAULT_MAX_RECEIPTS,
        }
    }
}

impl NodeConfig {
    /// A config with forwarding enabled, for relay nodes.
    pub fn router(name: &str) -> Self {
        Self {
            name: name.to_string(),
            forward_announces: true,
            ..Self::default()
        }
    }
}

/// Forwarding state for a link relayed through this node.
#[derive(Debug, Clone, Copy)]
struct LinkRoute {
    toward_initiator: TransportHandle,
    toward_destination: TransportHandle,
    created_at: Instant,
}

/// Where a deferred (`ProveApp`) proof should travel, and who signs it.
struct PendingProof {
    packet_hash: PacketHash,
    /// Local destination whose identity signs; `None` means the node
    /// identity.
    signer: Option<AddressHash>,
    route: ProofRoute,
}

enum ProofRoute {
    Link(LinkId),
    Direct(TransportHandle),
}

/// One mesh transport instance.
pub struct Node {
    config: NodeConfig,
    clock: Arc<dyn Clock>,
    identity: Identity,
    transports: Vec<Box<dyn FrameTransport>>,
    destinations: HashMap<AddressHash, Destination>,
    path_table: PathTable,
    seen: SeenCache,
    links: HashMap<LinkId, Link>,
    link_routes: HashMap<LinkId, LinkRoute>,
    proof_routes: HashMap<AddressHash, (TransportHandle, Instant)>,
    pending_proofs: VecDeque<PendingProof>,
    receipts: ReceiptTable,
    events: VecDeque<Event>,
    epoch: Instant,
    last_announce_ms: u64,
}

impl Node {
    /// Create a node with a fresh identity and the system clock.
    pub fn new(config: NodeConfig) -> Self {
        Self::with_parts(config, Identity::generate(), Arc::new(SystemClock))
    }

    /// Create a node with an explicit identity and clock.
    ///
    /// Tests inject a [`crate::core::ManualClock`]; applications restoring
    /// a persisted identity pass it here.
    pub fn with_parts(config: NodeConfig, identity: Identity, clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        let path_table = PathTable::new(config.max_paths);
        let seen = SeenCache::new(config.max_seen, config.seen_ttl);
        let receipts = ReceiptTable::new(
            config.max_receipts,
            config.proof_timeout_base,
            config.proof_timeout_per_hop,
        );

        Self {
            config,
            clock,
            identity,
            transports: Vec::new(),
            destinations: HashMap::new(),
            path_table,
            seen,
            links: HashMap::new(),
            link_routes: HashMap::new(),
            proof_routes: HashMap::new(),
            pending_proofs: VecDeque::new(),
            receipts,
            events: VecDeque::new(),
            epoch,
            last_announce_ms: 0,
        }
    }

    /// This node's identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Attach a frame transport. Frames flow once `pulse()` runs.
    pub fn attach(&mut self, transport: Box<dyn FrameTransport>) -> TransportHandle {
        debug!(node = %self.config.name, transport = transport.name(), "transport attached");
        self.transports.push(transport);
        self.transports.len() - 1
    }

    /// Register an inbound destination. Re-registering the same address
    /// replaces the previous registration (last write wins).
    pub fn register(&mut self, destination: Destination) -> AddressHash {
        let address = destination.address();
        debug!(node = %self.config.name, %address, "destination registered");
        self.destinations.insert(address, destination);
        address
    }

    /// A registered destination.
    pub fn destination(&self, address: &AddressHash) -> Option<&Destination> {
        self.destinations.get(address)
    }

    /// Change the proof strategy of a registered destination.
    pub fn set_proof_strategy(&mut self, address: &AddressHash, strategy: ProofStrategy) {
        if let Some(destination) = self.destinations.get_mut(address) {
            destination.set_proof_strategy(strategy);
        }
    }

    /// Broadcast a signed presence record for a registered destination.
    ///
    /// Best effort: an unknown address or a destination without a signing
    /// identity drops silently, as does any full transport queue.
    pub fn announce(&mut self, address: AddressHash, app_data: Option<&[u8]>) {
        let now = self.clock.now();
        let elapsed_ms = now.saturating_duration_since(self.epoch).as_millis() as u64;
        let timestamp_ms = elapsed_ms.max(self.last_announce_ms + 1);

        let Some(destination) = self.destinations.get(&address) else {
            debug!(%address, "announce for unregistered destination dropped");
            return;
        };
        let Some(announce) = Announce::build(destination, timestamp_ms, app_data.unwrap_or(&[]))
        else {
            debug!(%address, "announce without signing identity dropped");
            return;
        };
        self.last_announce_ms = timestamp_ms;

        // Our own flood record, so a neighbor's rebroadcast is ignored.
        self.seen.insert_if_new(announce.dedup_key(), now);

        let frame = Frame::new(FrameType::Announce, address, announce.encode());
        trace!(node = %self.config.name, %address, "announcing");
        self.send_via(None, &frame.encode(), TargetHint::Broadcast);
    }

    /// Open a link toward a destination. Returns immediately with the link
    /// in Pending state; progress is reported via `LinkStateChanged`
    /// events.
    ///
    /// With a path entry the request is authenticated against the
    /// announced identity and routed along the path; without one an
    /// anonymous request is broadcast on every transport.
    pub fn link(&mut self, destination: AddressHash) -> LinkId {
        let now = self.clock.now();
        let id = AddressHash::random();
        let link = Link::initiate(id, destination, None, now);
        self.links.insert(id, link);
        self.emit(Event::LinkStateChanged {
            link: id,
            status: LinkStatus::Pending,
            reason: None,
        });

        self.send_link_request(id);
        id
    }

    /// Current state of a link.
    pub fn link_status(&self, id: &LinkId) -> Option<LinkStatus> {
        self.links.get(id).map(|link| link.status())
    }

    /// Handshake round-trip time of an established link.
    pub fn link_rtt(&self, id: &LinkId) -> Option<Duration> {
        self.links.get(id).and_then(|link| link.rtt())
    }

    /// Send application data over an active link.
    pub fn link_send(&mut self, id: &LinkId, data: &[u8]) -> Result<(), DriftError> {
        let (payload, transport) = {
            let link = self.links.get_mut(id).ok_or(DriftError::UnknownLink)?;
            let payload = link.encrypt_payload(FRAME_TYPE_LINK_DATA, context::DATA, data)?;
            (payload, link.transport())
        };

        let frame = Frame::new(FrameType::LinkData, *id, payload);
        self.send_via(transport, &frame.encode(), TargetHint::NextHop(*id));
        Ok(())
    }

    /// Send a packet over an active link, requesting a delivery proof.
    ///
    /// Returns the packet hash; resolution arrives as a `ReceiptResolved`
    /// event.
    pub fn link_send_packet(
        &mut self,
        id: &LinkId,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<PacketHash, DriftError> {
        let now = self.clock.now();
        let mut nonce = [0u8; PACKET_NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let (payload, transport, packet_hash, receipt_destination) = {
            let link = self.links.get_mut(id).ok_or(DriftError::UnknownLink)?;
            if link.status() != LinkStatus::Active {
                return Err(DriftError::LinkNotActive);
            }
            let packet_hash = packet::packet_hash(id, &nonce, data);

            let mut inner = Vec::with_capacity(PACKET_NONCE_SIZE + data.len());
            inner.extend_from_slice(&nonce);
            inner.extend_from_slice(data);

            let payload = link.encrypt_payload(FRAME_TYPE_LINK_DATA, context::PACKET, &inner)?;
            (payload, link.transport(), packet_hash, link.destination())
        };

        let deadline = self
            .receipts
            .deadline_for(&receipt_destination, Some(1), now, timeout);
        self.receipts
            .register(packet_hash, receipt_destination, now, deadline);

        let frame = Frame::new(FrameType::LinkData, *id, payload);
        self.send_via(transport, &frame.encode(), TargetHint::NextHop(*id));
        Ok(packet_hash)
    }

    /// Tear a link down. Local state closes immediately; the peer is
    /// notified best-effort. Idempotent.
    pub fn teardown(&mut self, id: &LinkId) {
        self.close_link(id, LinkClosedReason::LocalTeardown);
    }

    /// Send a single packet toward a destination.
    ///
    /// The payload is sealed when the destination announced itself as
    /// encrypted; with no path entry the packet is broadcast in the clear.
    /// With `request_proof` a receipt is registered and later resolved via
    /// a `ReceiptResolved` event, using `timeout` or the adaptive default
    /// deadline.
    pub fn send_packet(
        &mut self,
        destination: AddressHash,
        data: &[u8],
        request_proof: bool,
        timeout: Option<Duration>,
    ) -> Result<PacketHash, DriftError> {
        let now = self.clock.now();
        let path = self
            .path_table
            .next_hop(&destination)
            .map(|entry| (entry.transport, entry.privacy, entry.identity, entry.hops));

        let (packet, packet_hash) = match &path {
            Some((_, Privacy::Encrypted, identity, _)) => {
                packet::build_sealed(&destination, identity, data, request_proof)
                    .map_err(DriftError::Crypto)?
            }
            _ => packet::build_plain(&destination, data, request_proof),
        };

        if request_proof {
            let hops = path.as_ref().map(|(_, _, _, hops)| *hops);
            let deadline = self.receipts.deadline_for(&destination, hops, now, timeout);
            self.receipts.register(packet_hash, destination, now, deadline);
        }

        let frame = Frame::new(FrameType::Packet, destination, packet.encode());
        let transport = path.map(|(transport, _, _, _)| transport);
        self.send_via(transport, &frame.encode(), TargetHint::NextHop(destination));
        Ok(packet_hash)
    }

    /// Send a sealed packet, requiring a known destination identity.
    ///
    /// Unlike [`Node::send_packet`], this fails with
    /// [`DriftError::NoIdentityKnown`] instead of falling back to
    /// cleartext when no announce for the destination has been observed.
    pub fn send_sealed(
        &mut self,
        destination: AddressHash,
        data: &[u8],
        request_proof: bool,
        timeout: Option<Duration>,
    ) -> Result<PacketHash, DriftError> {
        if self.path_table.identity_of(&destination).is_none() {
            return Err(DriftError::NoIdentityKnown);
        }
        self.send_packet(destination, data, request_proof, timeout)
    }

    /// Emit a deferred proof for a packet received on a `ProveApp`
    /// destination. Returns `false` if the packet is unknown or already
    /// proven.
    pub fn prove(&mut self, packet_hash: &PacketHash) -> bool {
        let Some(position) = self
            .pending_proofs
            .iter()
            .position(|pending| pending.packet_hash == *packet_hash)
        else {
            return false;
        };
        let pending = self.pending_proofs.remove(position).expect("position valid");
        self.emit_proof(&pending);
        true
    }

    /// Look up a receipt by packet hash, pending or resolved.
    pub fn receipt(&self, packet_hash: &PacketHash) -> Option<&Receipt> {
        self.receipts.get(packet_hash)
    }

    /// Whether a route toward `destination` is currently known.
    pub fn has_path(&self, destination: &AddressHash) -> bool {
        self.path_table.next_hop(destination).is_some()
    }

    /// Hop count toward `destination`, if known.
    pub fn hops_to(&self, destination: &AddressHash) -> Option<u8> {
        self.path_table.hops_to(destination)
    }

    /// Number of routes in the path table.
    pub fn path_count(&self) -> usize {
        self.path_table.len()
    }

    /// Take the next queued event, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Drain every queued event.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Advance the node: drain inbound frames, then timers.
    ///
    /// Non-blocking and idempotent in a tight loop; all suspension belongs
    /// to the caller.
    pub fn pulse(&mut self) {
        for transport in 0..self.transports.len() {
            let frames = self.transports[transport].poll_inbound();
            for raw in frames {
                self.handle_raw(transport, &raw);
            }
        }

        self.advance_links();

        let now = self.clock.now();
        for receipt in self.receipts.sweep(now) {
            self.events.push_back(Event::ReceiptResolved { receipt });
        }

        self.path_table.sweep(now, self.config.path_expiry);
        self.seen.sweep(now);
        self.link_routes
            .retain(|_, route| now.saturating_duration_since(route.created_at) < REVERSE_ROUTE_TTL);
        self.proof_routes
            .retain(|_, (_, created)| now.saturating_duration_since(*created) < REVERSE_ROUTE_TTL);
    }

    /// Close every link, fail every pending receipt, and report both.
    pub fn shutdown(&mut self) {
        debug!(node = %self.config.name, "shutting down");
        let ids: Vec<LinkId> = self.links.keys().copied().collect();
        for id in ids {
            self.close_link(&id, LinkClosedReason::Shutdown);
        }
        for receipt in self.receipts.fail_all() {
            self.events.push_back(Event::ReceiptResolved { receipt });
        }
    }

    // =========================================================================
    // Inbound demultiplexing
    // =========================================================================

    fn handle_raw(&mut self, transport: TransportHandle, raw: &[u8]) {
        let frame = match Frame::decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                trace!(node = %self.config.name, %err, "undecodable frame dropped");
                return;
            }
        };

        match frame.frame_type {
            FrameType::Announce => self.handle_announce(transport, frame),
            FrameType::LinkRequest => self.handle_link_request(transport, frame),
            FrameType::LinkResponse => self.handle_link_response(transport, frame),
            FrameType::LinkData => self.handle_link_data(transport, frame),
            FrameType::LinkTeardown => self.handle_link_teardown(transport, frame),
            FrameType::Packet => self.handle_packet(transport, frame),
            FrameType::Proof => self.handle_proof(transport, frame),
        }
    }

    fn handle_announce(&mut self, transport: TransportHandle, frame: Frame) {
        let announce = match Announce::decode(frame.destination, &frame.payload) {
            Ok(announce) => announce,
            Err(err) => {
                trace!(%err, "malformed announce dropped");
                return;
            }
        };
        if !announce.validate() {
            trace!(destination = %frame.destination, "announce failed validation");
            return;
        }

        let now = self.clock.now();
        if self.destinations.contains_key(&frame.destination) {
            // Our own announce coming back through the mesh.
            return;
        }

        let hops = frame.hops.saturating_add(1);
        if hops > self.config.max_hops {
            trace!(destination = %frame.destination, hops, "announce exceeded hop ceiling");
            return;
        }

        // Every valid copy is offered to the path table: the same emission
        // arriving over a shorter route must still win. The seen-cache only
        // bounds flood amplification and event noise.
        self.path_table.consider(PathEntry {
            destination: frame.destination,
            transport,
            hops,
            announced_at_ms: announce.timestamp_ms,
            received_at: now,
            identity: announce.identity,
            privacy: announce.privacy,
            app_data: announce.app_data.clone(),
        });

        if !self.seen.insert_if_new(announce.dedup_key(), now) {
            return;
        }

        self.emit(Event::AnnounceReceived {
            destination: frame.destination,
            hops,
            app_data: announce.app_data,
        });

        if self.config.forward_announces && hops < self.config.max_hops {
            let mut forwarded = frame;
            forwarded.hops = hops;
            let raw = forwarded.encode();
            self.broadcast_except(transport, &raw);
        }
    }

    fn handle_link_request(&mut self, transport: TransportHandle, frame: Frame) {
        let payload = &frame.payload;
        if payload.len() < 1 + 16 + 32 {
            trace!("short link request dropped");
            return;
        }
        let Some(mode) = HandshakeMode::from_byte(payload[0]) else {
            trace!("link request with unknown mode dropped");
            return;
        };
        let Some(link_id) = AddressHash::from_slice(&payload[1..17]) else {
            return;
        };
        let handshake_message = &payload[17..];

        let Some(destination) = self.destinations.get(&frame.destination) else {
            self.forward_link_request(transport, frame, link_id);
            return;
        };

        if self.links.contains_key(&link_id) {
            trace!(link = %link_id, "duplicate link request dropped");
            return;
        }

        let responder = match ResponderHandshake::new(mode, destination.identity()) {
            Ok(responder) => responder,
            Err(err) => {
                trace!(%err, "cannot answer link request");
                return;
            }
        };
        let (response, keys) = match responder.respond(handshake_message) {
            Ok(result) => result,
            Err(err) => {
                trace!(%err, "link request handshake failed");
                return;
            }
        };

        let now = self.clock.now();
        let link = Link::accept(link_id, frame.destination, keys, transport, now);
        self.links.insert(link_id, link);
        self.emit(Event::LinkStateChanged {
            link: link_id,
            status: LinkStatus::Pending,
            reason: None,
        });
        self.emit(Event::LinkStateChanged {
            link: link_id,
            status: LinkStatus::Active,
            reason: None,
        });

        let response_frame = Frame::new(FrameType::LinkResponse, link_id, response);
        self.send_via(
            Some(transport),
            &response_frame.encode(),
            TargetHint::NextHop(link_id),
        );
    }

    fn handle_link_response(&mut self, transport: TransportHandle, frame: Frame) {
        let id = frame.destination;
        if !self.links.contains_key(&id) {
            self.forward_link_frame(transport, frame);
            return;
        }

        let now = self.clock.now();
        let closed = {
            let link = self.links.get_mut(&id).expect("checked above");
            if link.role() != Role::Initiator || link.status() != LinkStatus::Pending {
                trace!(link = %id, "stray link response dropped");
                return;
            }
            let Some(handshake) = link.take_handshake() else {
                return;
            };
            match handshake.complete(&frame.payload) {
                Ok(keys) => {
                    link.activate(keys, now);
                    link.set_transport(transport);
                    false
                }
                Err(err) => {
                    trace!(link = %id, %err, "link response failed handshake");
                    link.close(LinkClosedReason::EstablishmentFailed, now);
                    true
                }
            }
        };

        if closed {
            self.emit(Event::LinkStateChanged {
                link: id,
                status: LinkStatus::Closed,
                reason: Some(LinkClosedReason::EstablishmentFailed),
            });
        } else {
            self.emit(Event::LinkStateChanged {
                link: id,
                status: LinkStatus::Active,
                reason: None,
            });
        }
    }

    fn handle_link_data(&mut self, transport: TransportHandle, frame: Frame) {
        let id = frame.destination;
        if !self.links.contains_key(&id) {
            self.forward_link_frame(transport, frame);
            return;
        }

        let now = self.clock.now();
        let (ctx, data, revived, link_destination, role) = {
            let link = self.links.get_mut(&id).expect("checked above");
            match link.decrypt_payload(FRAME_TYPE_LINK_DATA, &frame.payload) {
                Ok(LinkInbound::Delivered { context: ctx, data }) => {
                    let revived = link.refresh_activity(now);
                    (ctx, data, revived, link.destination(), link.role())
                }
                Ok(LinkInbound::Duplicate) => return,
                Err(err) => {
                    trace!(link = %id, %err, "link frame failed authentication");
                    return;
                }
            }
        };

        if revived {
            self.emit(Event::LinkStateChanged {
                link: id,
                status: LinkStatus::Active,
                reason: None,
            });
        }

        match ctx {
            context::DATA => self.emit(Event::LinkData { link: id, data }),
            context::KEEPALIVE => {
                let reply = {
                    let link = self.links.get_mut(&id).expect("checked above");
                    link.encrypt_payload(FRAME_TYPE_LINK_DATA, context::KEEPALIVE_ACK, &[])
                        .ok()
                        .map(|payload| (payload, link.transport()))
                };
                if let Some((payload, link_transport)) = reply {
                    let frame = Frame::new(FrameType::LinkData, id, payload);
                    self.send_via(link_transport, &frame.encode(), TargetHint::NextHop(id));
                }
            }
            context::KEEPALIVE_ACK => {}
            context::PACKET => self.handle_link_packet(id, link_destination, role, data),
            context::PROOF => self.handle_link_proof(id, &data),
            other => trace!(link = %id, context = other, "unknown link context dropped"),
        }
    }

    fn handle_link_packet(
        &mut self,
        id: LinkId,
        link_destination: AddressHash,
        role: Role,
        data: Vec<u8>,
    ) {
        if data.len() < PACKET_NONCE_SIZE {
            trace!(link = %id, "short in-link packet dropped");
            return;
        }
        let mut nonce = [0u8; PACKET_NONCE_SIZE];
        nonce.copy_from_slice(&data[..PACKET_NONCE_SIZE]);
        let inner = &data[PACKET_NONCE_SIZE..];
        let packet_hash = packet::packet_hash(&id, &nonce, inner);

        // On the responding side packets surface under the destination the
        // link was accepted on; the initiating side has no local
        // destination, so they surface under the link id.
        let event_destination = match role {
            Role::Responder => link_destination,
            Role::Initiator => id,
        };

        self.emit(Event::PacketReceived {
            destination: event_destination,
            packet_hash,
            data: inner.to_vec(),
        });

        let strategy = match role {
            Role::Responder => self
                .destinations
                .get(&link_destination)
                .map(|destination| destination.proof_strategy())
                .unwrap_or(ProofStrategy::None),
            // The dialing side has no destination to configure; an in-link
            // packet is an explicit request, so answer it.
            Role::Initiator => ProofStrategy::ProveAll,
        };

        let signer = match role {
            Role::Responder => Some(link_destination),
            Role::Initiator => None,
        };

        match strategy {
            ProofStrategy::ProveAll => {
                let pending = PendingProof {
                    packet_hash,
                    signer,
                    route: ProofRoute::Link(id),
                };
                self.emit_proof(&pending);
            }
            ProofStrategy::ProveApp => self.queue_pending_proof(PendingProof {
                packet_hash,
                signer,
                route: ProofRoute::Link(id),
            }),
            ProofStrategy::None => {}
        }
    }

    fn handle_link_proof(&mut self, id: LinkId, data: &[u8]) {
        let Ok((packet_hash, signature)) = packet::decode_proof(data) else {
            trace!(link = %id, "malformed in-link proof dropped");
            return;
        };
        if !self.receipts.is_pending(&packet_hash) {
            trace!(link = %id, "proof for unknown or resolved packet dropped");
            return;
        }

        // The link AEAD already authenticates the channel; the signature is
        // checked additionally whenever the peer identity is known.
        let verified = match self.links.get(&id).and_then(|link| link.remote_identity()) {
            Some(identity) => identity.verify(packet_hash.as_bytes(), signature),
            None => true,
        };
        if !verified {
            trace!(link = %id, "in-link proof failed signature check");
            return;
        }

        let now = self.clock.now();
        if let Some(receipt) = self.receipts.resolve_delivered(&packet_hash, now) {
            self.emit(Event::ReceiptResolved { receipt });
        }
    }

    fn handle_link_teardown(&mut self, transport: TransportHandle, frame: Frame) {
        let id = frame.destination;
        if !self.links.contains_key(&id) {
            self.forward_link_frame(transport, frame);
            return;
        }

        let now = self.clock.now();
        let closed = {
            let link = self.links.get_mut(&id).expect("checked above");
            match link.decrypt_payload(FRAME_TYPE_LINK_TEARDOWN, &frame.payload) {
                Ok(LinkInbound::Delivered { context: ctx, .. }) if ctx == context::TEARDOWN => {
                    link.close(LinkClosedReason::RemoteTeardown, now)
                }
                Ok(_) => false,
                Err(err) => {
                    trace!(link = %id, %err, "teardown failed authentication");
                    false
                }
            }
        };

        if closed {
            self.emit(Event::LinkStateChanged {
                link: id,
                status: LinkStatus::Closed,
                reason: Some(LinkClosedReason::RemoteTeardown),
            });
        }
    }

    fn handle_packet(&mut self, transport: TransportHandle, frame: Frame) {
        let Some(destination) = self.destinations.get(&frame.destination) else {
            self.forward_packet(transport, frame);
            return;
        };

        let packet = match Packet::decode(&frame.payload) {
            Ok(packet) => packet,
            Err(err) => {
                trace!(%err, "malformed packet dropped");
                return;
            }
        };
        let packet_hash = packet.hash(&frame.destination);

        let data = match packet::open_packet(&packet, &frame.destination, destination.identity()) {
            Ok(data) => data,
            Err(err) => {
                trace!(destination = %frame.destination, %err, "packet failed to open");
                return;
            }
        };

        let strategy = destination.proof_strategy();
        let signer = Some(frame.destination);

        self.emit(Event::PacketReceived {
            destination: frame.destination,
            packet_hash,
            data,
        });

        match strategy {
            ProofStrategy::ProveAll => {
                let pending = PendingProof {
                    packet_hash,
                    signer,
                    route: ProofRoute::Direct(transport),
                };
                self.emit_proof(&pending);
            }
            ProofStrategy::ProveApp if packet.wants_proof() => {
                self.queue_pending_proof(PendingProof {
                    packet_hash,
                    signer,
                    route: ProofRoute::Direct(transport),
                });
            }
            _ => {}
        }
    }

    fn handle_proof(&mut self, transport: TransportHandle, frame: Frame) {
        let Ok((packet_hash, signature)) = packet::decode_proof(&frame.payload) else {
            trace!("malformed proof dropped");
            return;
        };

        if !self.receipts.is_pending(&packet_hash) {
            self.forward_proof(transport, frame);
            return;
        }

        let destination = match self.receipts.get(&packet_hash) {
            Some(receipt) => receipt.destination(),
            None => return,
        };
        let verified = match self.path_table.identity_of(&destination) {
            Some(identity) => identity.verify(packet_hash.as_bytes(), signature),
            None => false,
        };
        if !verified {
            trace!(%destination, "unverifiable proof dropped");
            return;
        }

        let now = self.clock.now();
        if let Some(receipt) = self.receipts.resolve_delivered(&packet_hash, now) {
            self.emit(Event::ReceiptResolved { receipt });
        }
    }

    // =========================================================================
    // Relay paths (transport mode)
    // =========================================================================

    fn forward_link_request(&mut self, transport: TransportHandle, frame: Frame, link_id: LinkId) {
        if !self.config.forward_announces {
            return;
        }
        let hops = frame.hops.saturating_add(1);
        if hops >= self.config.max_hops {
            return;
        }
        let Some(entry) = self.path_table.next_hop(&frame.destination) else {
            trace!(destination = %frame.destination, "no route for link request");
            return;
        };
        let toward_destination = entry.transport;
        if toward_destination == transport {
            return;
        }

        self.link_routes.insert(
            link_id,
            LinkRoute {
                toward_initiator: transport,
                toward_destination,
                created_at: self.clock.now(),
            },
        );

        let mut forwarded = frame;
        forwarded.hops = hops;
        let raw = forwarded.encode();
        self.send_via(Some(toward_destination), &raw, TargetHint::Broadcast);
    }

    fn forward_link_frame(&mut self, transport: TransportHandle, frame: Frame) {
        if !self.config.forward_announces {
            trace!(link = %frame.destination, "frame for unknown link dropped");
            return;
        }
        let Some(route) = self.link_routes.get(&frame.destination).copied() else {
            trace!(link = %frame.destination, "no relay route for link frame");
            return;
        };

        let out = if transport == route.toward_destination {
            route.toward_initiator
        } else if transport == route.toward_initiator {
            route.toward_destination
        } else {
            return;
        };

        let mut forwarded = frame;
        forwarded.hops = forwarded.hops.saturating_add(1);
        if forwarded.hops >= self.config.max_hops {
            return;
        }
        let raw = forwarded.encode();
        self.send_via(Some(out), &raw, TargetHint::Broadcast);
    }

    fn forward_packet(&mut self, transport: TransportHandle, frame: Frame) {
        if !self.config.forward_announces {
            trace!(destination = %frame.destination, "packet for unknown destination dropped");
            return;
        }
        let hops = frame.hops.saturating_add(1);
        if hops >= self.config.max_hops {
            return;
        }
        let Some(entry) = self.path_table.next_hop(&frame.destination) else {
            return;
        };
        let toward_destination = entry.transport;
        if toward_destination == transport {
            return;
        }

        // Remember the reverse direction so the proof can travel back.
        if let Ok(packet) = Packet::decode(&frame.payload) {
            if packet.wants_proof() {
                let proof_address = packet.hash(&frame.destination).as_address();
                self.proof_routes
                    .insert(proof_address, (transport, self.clock.now()));
            }
        }

        let mut forwarded = frame;
        forwarded.hops = hops;
        let raw = forwarded.encode();
        self.send_via(Some(toward_destination), &raw, TargetHint::Broadcast);
    }

    fn forward_proof(&mut self, transport: TransportHandle, frame: Frame) {
        if !self.config.forward_announces {
            trace!("proof for unknown packet dropped");
            return;
        }
        let Some((out, _)) = self.proof_routes.get(&frame.destination).copied() else {
            trace!("no relay route for proof");
            return;
        };
        if out == transport {
            return;
        }
        self.proof_routes.remove(&frame.destination);

        let mut forwarded = frame;
        forwarded.hops = forwarded.hops.saturating_add(1);
        let raw = forwarded.encode();
        self.send_via(Some(out), &raw, TargetHint::Broadcast);
    }

    // =========================================================================
    // Outbound plumbing
    // =========================================================================

    fn send_link_request(&mut self, id: LinkId) {
        let now = self.clock.now();
        let destination = match self.links.get(&id) {
            Some(link) => link.destination(),
            None => return,
        };

        let path = self
            .path_table
            .next_hop(&destination)
            .map(|entry| (entry.transport, entry.identity));

        let built = match &path {
            Some((_, identity)) => {
                InitiatorHandshake::new_known(&self.identity, identity.kex_public())
            }
            None => InitiatorHandshake::new_anonymous(),
        };

        let mut handshake = match built {
            Ok(handshake) => handshake,
            Err(err) => {
                trace!(link = %id, %err, "handshake construction failed");
                self.close_link(&id, LinkClosedReason::EstablishmentFailed);
                return;
            }
        };
        let request = match handshake.write_request() {
            Ok(request) => request,
            Err(err) => {
                trace!(link = %id, %err, "handshake request failed");
                self.close_link(&id, LinkClosedReason::EstablishmentFailed);
                return;
            }
        };

        let mode = handshake.mode();
        let transport = {
            let link = self.links.get_mut(&id).expect("link exists");
            link.begin_handshake(handshake);
            if let Some((transport, identity)) = &path {
                link.set_remote_identity(*identity);
                link.set_transport(*transport);
            }
            link.mark_request_sent(now);
            link.transport()
        };

        let mut payload = Vec::with_capacity(17 + request.len());
        payload.push(mode.as_byte());
        payload.extend_from_slice(id.as_bytes());
        payload.extend_from_slice(&request);

        let frame = Frame::new(FrameType::LinkRequest, destination, payload);
        self.send_via(transport, &frame.encode(), TargetHint::NextHop(destination));
    }

    fn advance_links(&mut self) {
        let now = self.clock.now();
        let timers = LinkTimers {
            establishment_timeout: self.config.link_establishment_timeout,
            keepalive: self.config.link_keepalive,
            stale_after: self.config.link_stale_after,
            close_after: self.config.link_close_after,
        };

        let ids: Vec<LinkId> = self.links.keys().copied().collect();
        for id in ids {
            let (transition, reason, keepalive, transport) = {
                let link = self.links.get_mut(&id).expect("link exists");
                let tick = link.poll_timers(now, &timers);
                let keepalive = if tick.send_keepalive {
                    link.encrypt_payload(FRAME_TYPE_LINK_DATA, context::KEEPALIVE, &[])
                        .ok()
                } else {
                    None
                };
                (tick.transition, link.close_reason(), keepalive, link.transport())
            };

            if let Some(status) = transition {
                let reason = if status == LinkStatus::Closed { reason } else { None };
                self.emit(Event::LinkStateChanged { link: id, status, reason });
            }

            if let Some(payload) = keepalive {
                let frame = Frame::new(FrameType::LinkData, id, payload);
                self.send_via(transport, &frame.encode(), TargetHint::NextHop(id));
            }
        }

        // Closed links linger briefly for status queries, then fall away.
        let retention = timers.close_after;
        self.links.retain(|_, link| match link.closed_at() {
            Some(closed_at) => now.saturating_duration_since(closed_at) < retention,
            None => true,
        });
    }

    fn close_link(&mut self, id: &LinkId, reason: LinkClosedReason) {
        let now = self.clock.now();
        let Some(link) = self.links.get_mut(id) else {
            return;
        };
        if link.status() == LinkStatus::Closed {
            return;
        }

        let notice = link
            .encrypt_payload(FRAME_TYPE_LINK_TEARDOWN, context::TEARDOWN, &[])
            .ok();
        let transport = link.transport();
        link.close(reason, now);

        self.emit(Event::LinkStateChanged {
            link: *id,
            status: LinkStatus::Closed,
            reason: Some(reason),
        });

        if let Some(payload) = notice {
            let frame = Frame::new(FrameType::LinkTeardown, *id, payload);
            self.send_via(transport, &frame.encode(), TargetHint::NextHop(*id));
        }
    }

    fn queue_pending_proof(&mut self, pending: PendingProof) {
        while self.pending_proofs.len() >= MAX_PENDING_PROOFS {
            self.pending_proofs.pop_front();
        }
        self.pending_proofs.push_back(pending);
    }

    fn emit_proof(&mut self, pending: &PendingProof) {
        let payload = match pending.signer {
            Some(address) => match self.destinations.get(&address).and_then(|d| d.identity()) {
                Some(identity) => packet::build_proof(identity, &pending.packet_hash),
                None => packet::build_proof(&self.identity, &pending.packet_hash),
            },
            None => packet::build_proof(&self.identity, &pending.packet_hash),
        };

        match pending.route {
            ProofRoute::Link(id) => {
                let sent = {
                    let Some(link) = self.links.get_mut(&id) else {
                        return;
                    };
                    link.encrypt_payload(FRAME_TYPE_LINK_DATA, context::PROOF, &payload)
                        .ok()
                        .map(|encrypted| (encrypted, link.transport()))
                };
                if let Some((encrypted, transport)) = sent {
                    let frame = Frame::new(FrameType::LinkData, id, encrypted);
                    self.send_via(transport, &frame.encode(), TargetHint::NextHop(id));
                }
            }
            ProofRoute::Direct(transport) => {
                let frame = Frame::new(
                    FrameType::Proof,
                    pending.packet_hash.as_address(),
                    payload,
                );
                self.send_via(Some(transport), &frame.encode(), TargetHint::Broadcast);
            }
        }
    }

    fn emit(&mut self, event: Event) {
        self.events.push_back(event);
    }

    fn send_via(&mut self, transport: Option<TransportHandle>, raw: &[u8], hint: TargetHint) {
        match transport {
            Some(index) => {
                if let Some(transport) = self.transports.get_mut(index) {
                    transport.send(raw, hint);
                }
            }
            None => {
                for transport in &mut self.transports {
                    transport.send(raw, hint);
                }
            }
        }
    }

    fn broadcast_except(&mut self, skip: TransportHandle, raw: &[u8]) {
        for (index, transport) in self.transports.iter_mut().enumerate() {
            if index != skip {
                transport.send(raw, TargetHint::Broadcast);
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.config.name)
            .field("destinations", &self.destinations.len())
            .field("paths", &self.path_table.len())
            .field("links", &self.links.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::destination::{Destination, DestinationName};
    use crate::packet::receipt::ReceiptStatus;
    use crate::transport::memory::MemoryBus;

    /// Two nodes on one bus with a shared manual clock.
    fn two_nodes() -> (Node, Node, MemoryBus, Arc<ManualClock>) {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new());
        let bus = MemoryBus::new();

        let mut a = Node::with_parts(
            NodeConfig {
                name: "a".into(),
                ..NodeConfig::default()
            },
            Identity::generate(),
            clock.clone(),
        );
        a.attach(Box::new(bus.endpoint()));

        let mut b = Node::with_parts(
            NodeConfig {
                name: "b".into(),
                ..NodeConfig::default()
            },
            Identity::generate(),
            clock.clone(),
        );
        b.attach(Box::new(bus.endpoint()));

        (a, b, bus, clock)
    }

    fn pulse_both(a: &mut Node, b: &mut Node, rounds: usize) {
        for _ in 0..rounds {
            a.pulse();
            b.pulse();
        }
    }

    fn link_states(events: &[Event]) -> Vec<(LinkStatus, Option<LinkClosedReason>)> {
        events
            .iter()
            .filter_map(|event| match event {
                Event::LinkStateChanged { status, reason, .. } => Some((*status, *reason)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_announce_populates_path_table() {
        let (mut a, mut b, _bus, _clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);

        assert!(b.has_path(&dns));
        assert_eq!(b.hops_to(&dns), Some(1));

        let announced = b.drain_events().into_iter().any(|event| {
            matches!(event, Event::AnnounceReceived { destination, hops: 1, .. } if destination == dns)
        });
        assert!(announced);
    }

    #[test]
    fn test_duplicate_announce_suppressed() {
        let (mut a, mut b, bus, _clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);
        b.drain_events();

        // The same frame replayed on the wire is a flood duplicate.
        let mut replayer = bus.endpoint();
        a.announce(dns, None);
        a.pulse();
        let frames = replayer.poll_inbound();
        for frame in &frames {
            replayer.send(frame, TargetHint::Broadcast);
        }
        pulse_both(&mut a, &mut b, 2);

        let announces = b
            .drain_events()
            .into_iter()
            .filter(|event| matches!(event, Event::AnnounceReceived { .. }))
            .count();
        assert_eq!(announces, 1);
    }

    #[test]
    fn test_better_route_replaces_worse() {
        // a hears c's announce directly and also relayed through r; the
        // direct (fewer hops) route must win regardless of arrival order.
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new());
        let ac = MemoryBus::new();
        let ar = MemoryBus::new();
        let rc = MemoryBus::new();

        let mut a = Node::with_parts(NodeConfig::default(), Identity::generate(), clock.clone());
        a.attach(Box::new(ac.endpoint()));
        a.attach(Box::new(ar.endpoint()));

        let mut r = Node::with_parts(
            NodeConfig::router("relay"),
            Identity::generate(),
            clock.clone(),
        );
        r.attach(Box::new(ar.endpoint()));
        r.attach(Box::new(rc.endpoint()));

        let mut c = Node::with_parts(NodeConfig::default(), Identity::generate(), clock.clone());
        c.attach(Box::new(ac.endpoint()));
        c.attach(Box::new(rc.endpoint()));

        let service = c.register(Destination::encrypted_in(
            Identity::generate(),
            DestinationName::new("example_utilities", "echo.request"),
        ));
        c.announce(service, None);

        // Regardless of whether the direct or the relayed copy lands
        // first, the one-hop route is what remains.
        for _ in 0..4 {
            c.pulse();
            r.pulse();
            a.pulse();
        }

        assert_eq!(a.hops_to(&service), Some(1));
    }

    #[test]
    fn test_invalid_announce_never_corrupts_path_table() {
        // a and b sit on separate media; a tap carries a's announce across
        // with the signature corrupted in transit.
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new());
        let src = MemoryBus::new();
        let dst = MemoryBus::new();

        let mut a = Node::with_parts(NodeConfig::default(), Identity::generate(), clock.clone());
        a.attach(Box::new(src.endpoint()));
        let mut b = Node::with_parts(NodeConfig::default(), Identity::generate(), clock.clone());
        b.attach(Box::new(dst.endpoint()));

        let mut tap_src = src.endpoint();
        let mut tap_dst = dst.endpoint();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);

        let frames = tap_src.poll_inbound();
        assert!(!frames.is_empty());
        for frame in frames {
            let mut corrupted = frame;
            let len = corrupted.len();
            corrupted[len - 1] ^= 0xFF;
            tap_dst.send(&corrupted, TargetHint::Broadcast);
        }
        b.pulse();

        assert!(!b.has_path(&dns));
        assert!(b.drain_events().is_empty());
    }

    #[test]
    fn test_end_to_end_link_exchange() {
        // Node A: plain destination "dns", announced. Node B: link, query,
        // reply, teardown. Both sides observe Pending -> Active, one
        // delivery each way, and Closed on both ends.
        let (mut a, mut b, _bus, _clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);
        assert_eq!(b.hops_to(&dns), Some(1));
        b.drain_events();
        a.drain_events();

        let link = b.link(dns);
        pulse_both(&mut b, &mut a, 3);

        assert_eq!(b.link_status(&link), Some(LinkStatus::Active));
        assert_eq!(
            link_states(&b.drain_events()),
            vec![(LinkStatus::Pending, None), (LinkStatus::Active, None)]
        );
        assert_eq!(
            link_states(&a.drain_events()),
            vec![(LinkStatus::Pending, None), (LinkStatus::Active, None)]
        );

        b.link_send(&link, b"GET weather.node").unwrap();
        pulse_both(&mut b, &mut a, 2);

        let received: Vec<Vec<u8>> = a
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::LinkData { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(received, vec![b"GET weather.node".to_vec()]);

        a.link_send(&link, b"cloudy, 12C").unwrap();
        pulse_both(&mut a, &mut b, 2);

        let replies: Vec<Vec<u8>> = b
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::LinkData { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(replies, vec![b"cloudy, 12C".to_vec()]);

        b.teardown(&link);
        pulse_both(&mut b, &mut a, 2);

        assert_eq!(b.link_status(&link), Some(LinkStatus::Closed));
        assert_eq!(a.link_status(&link), Some(LinkStatus::Closed));
        assert_eq!(
            link_states(&b.drain_events()),
            vec![(LinkStatus::Closed, Some(LinkClosedReason::LocalTeardown))]
        );
        assert_eq!(
            link_states(&a.drain_events()),
            vec![(LinkStatus::Closed, Some(LinkClosedReason::RemoteTeardown))]
        );
    }

    #[test]
    fn test_link_establishment_failure_reported_once() {
        let (mut a, mut b, bus, clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);
        b.drain_events();

        // The medium goes dark before the request leaves.
        bus.set_partitioned(true);
        let link = b.link(dns);
        pulse_both(&mut b, &mut a, 2);
        assert_eq!(b.link_status(&link), Some(LinkStatus::Pending));

        clock.advance(Duration::from_secs(7));
        pulse_both(&mut b, &mut a, 2);

        assert_eq!(b.link_status(&link), Some(LinkStatus::Closed));
        assert_eq!(
            link_states(&b.drain_events()),
            vec![
                (LinkStatus::Pending, None),
                (
                    LinkStatus::Closed,
                    Some(LinkClosedReason::EstablishmentFailed)
                ),
            ]
        );

        // Further pulses report nothing more.
        clock.advance(Duration::from_secs(1));
        pulse_both(&mut b, &mut a, 2);
        assert!(link_states(&b.drain_events()).is_empty());
    }

    #[test]
    fn test_send_on_pending_link_fails() {
        let (mut a, mut b, bus, _clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);

        bus.set_partitioned(true);
        let link = b.link(dns);
        assert!(matches!(
            b.link_send(&link, b"too early"),
            Err(DriftError::LinkNotActive)
        ));
        assert!(matches!(
            b.link_send(&AddressHash::random(), b"nowhere"),
            Err(DriftError::UnknownLink)
        ));
    }

    #[test]
    fn test_end_to_end_proof_delivered() {
        // Node A: PROVE_ALL destination. Node B: packet with proof request
        // and a 2 second deadline; the receipt must reach Delivered with a
        // measured RTT under the deadline.
        let (mut a, mut b, _bus, clock) = two_nodes();

        let echo = a.register(Destination::encrypted_in(
            Identity::generate(),
            DestinationName::new("example_utilities", "echo.request"),
        ));
        a.set_proof_strategy(&echo, ProofStrategy::ProveAll);
        a.announce(echo, None);
        pulse_both(&mut a, &mut b, 2);
        b.drain_events();

        let packet_hash = b
            .send_packet(echo, b"ping", true, Some(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(
            b.receipt(&packet_hash).unwrap().status(),
            ReceiptStatus::Sent
        );

        clock.advance(Duration::from_millis(120));
        pulse_both(&mut b, &mut a, 2);

        // A saw the payload in the clear despite the sealed wire form.
        let delivered_to_a: Vec<Vec<u8>> = a
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::PacketReceived { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(delivered_to_a, vec![b"ping".to_vec()]);

        let receipt = b.receipt(&packet_hash).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Delivered);
        assert!(receipt.rtt().unwrap() < Duration::from_secs(2));

        let resolutions: Vec<ReceiptStatus> = b
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::ReceiptResolved { receipt } => Some(receipt.status()),
                _ => None,
            })
            .collect();
        assert_eq!(resolutions, vec![ReceiptStatus::Delivered]);
    }

    #[test]
    fn test_end_to_end_proof_timeout() {
        let (mut a, mut b, bus, clock) = two_nodes();

        let echo = a.register(Destination::encrypted_in(
            Identity::generate(),
            DestinationName::new("example_utilities", "echo.request"),
        ));
        a.set_proof_strategy(&echo, ProofStrategy::ProveAll);
        a.announce(echo, None);
        pulse_both(&mut a, &mut b, 2);
        b.drain_events();

        // A becomes unreachable.
        bus.set_partitioned(true);
        let packet_hash = b
            .send_packet(echo, b"ping", true, Some(Duration::from_secs(2)))
            .unwrap();

        // Not failed before the deadline.
        clock.advance(Duration::from_millis(1999));
        pulse_both(&mut b, &mut a, 2);
        assert_eq!(
            b.receipt(&packet_hash).unwrap().status(),
            ReceiptStatus::Sent
        );

        clock.advance(Duration::from_millis(1));
        pulse_both(&mut b, &mut a, 2);
        let receipt = b.receipt(&packet_hash).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Failed);
        assert!(receipt.rtt().is_none());

        // A proof arriving after failure is dropped silently.
        bus.set_partitioned(false);
        pulse_both(&mut b, &mut a, 3);
        assert_eq!(
            b.receipt(&packet_hash).unwrap().status(),
            ReceiptStatus::Failed
        );

        let resolutions: Vec<ReceiptStatus> = b
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                Event::ReceiptResolved { receipt } => Some(receipt.status()),
                _ => None,
            })
            .collect();
        assert_eq!(resolutions, vec![ReceiptStatus::Failed]);
    }

    #[test]
    fn test_prove_app_defers_until_granted() {
        let (mut a, mut b, _bus, clock) = two_nodes();

        let echo = a.register(Destination::encrypted_in(
            Identity::generate(),
            DestinationName::new("example_utilities", "echo.request"),
        ));
        a.set_proof_strategy(&echo, ProofStrategy::ProveApp);
        a.announce(echo, None);
        pulse_both(&mut a, &mut b, 2);
        b.drain_events();

        let packet_hash = b.send_packet(echo, b"ping", true, None).unwrap();
        clock.advance(Duration::from_millis(50));
        pulse_both(&mut b, &mut a, 2);

        // No automatic proof.
        assert_eq!(
            b.receipt(&packet_hash).unwrap().status(),
            ReceiptStatus::Sent
        );

        // The application grants the proof explicitly.
        assert!(a.prove(&packet_hash));
        pulse_both(&mut a, &mut b, 2);
        assert_eq!(
            b.receipt(&packet_hash).unwrap().status(),
            ReceiptStatus::Delivered
        );

        // A second grant is a no-op.
        assert!(!a.prove(&packet_hash));
    }

    #[test]
    fn test_link_packet_with_proof() {
        let (mut a, mut b, _bus, clock) = two_nodes();

        let echo = a.register(Destination::encrypted_in(
            Identity::generate(),
            DestinationName::new("example_utilities", "echo.request"),
        ));
        a.set_proof_strategy(&echo, ProofStrategy::ProveAll);
        a.announce(echo, None);
        pulse_both(&mut a, &mut b, 2);
        b.drain_events();

        let link = b.link(echo);
        pulse_both(&mut b, &mut a, 3);
        assert_eq!(b.link_status(&link), Some(LinkStatus::Active));

        let packet_hash = b.link_send_packet(&link, b"query", None).unwrap();
        clock.advance(Duration::from_millis(80));
        pulse_both(&mut b, &mut a, 3);

        let receipt = b.receipt(&packet_hash).unwrap();
        assert_eq!(receipt.status(), ReceiptStatus::Delivered);
        assert_eq!(receipt.rtt(), Some(Duration::from_millis(80)));

        // The packet surfaced on A under the echo destination.
        let arrived = a.drain_events().into_iter().any(|event| {
            matches!(event, Event::PacketReceived { destination, .. } if destination == echo)
        });
        assert!(arrived);
    }

    #[test]
    fn test_keepalive_holds_link_active() {
        let (mut a, mut b, _bus, clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);

        let link = b.link(dns);
        pulse_both(&mut b, &mut a, 3);
        assert_eq!(b.link_status(&link), Some(LinkStatus::Active));
        a.drain_events();
        b.drain_events();

        // Idle past the keepalive interval but short of stale: the probe
        // keeps both sides active.
        for _ in 0..4 {
            clock.advance(Duration::from_secs(16));
            pulse_both(&mut b, &mut a, 2);
        }

        assert_eq!(b.link_status(&link), Some(LinkStatus::Active));
        assert_eq!(a.link_status(&link), Some(LinkStatus::Active));
        assert!(link_states(&b.drain_events()).is_empty());
    }

    #[test]
    fn test_idle_link_goes_stale_then_closes() {
        let (mut a, mut b, bus, clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);

        let link = b.link(dns);
        pulse_both(&mut b, &mut a, 3);
        assert_eq!(b.link_status(&link), Some(LinkStatus::Active));
        b.drain_events();

        // Partition so keepalives die on the wire.
        bus.set_partitioned(true);
        clock.advance(Duration::from_secs(30));
        pulse_both(&mut b, &mut a, 2);
        assert_eq!(b.link_status(&link), Some(LinkStatus::Stale));

        clock.advance(Duration::from_secs(30));
        pulse_both(&mut b, &mut a, 2);
        assert_eq!(b.link_status(&link), Some(LinkStatus::Closed));

        assert_eq!(
            link_states(&b.drain_events()),
            vec![
                (LinkStatus::Stale, None),
                (LinkStatus::Closed, Some(LinkClosedReason::IdleTimeout)),
            ]
        );
    }

    #[test]
    fn test_multi_hop_relay() {
        // a -- r (router) -- c: announces flood through r, and a full
        // packet/proof round trip crosses it.
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new());
        let left = MemoryBus::new();
        let right = MemoryBus::new();

        let mut a = Node::with_parts(NodeConfig::default(), Identity::generate(), clock.clone());
        a.attach(Box::new(left.endpoint()));

        let mut r = Node::with_parts(
            NodeConfig::router("relay"),
            Identity::generate(),
            clock.clone(),
        );
        r.attach(Box::new(left.endpoint()));
        r.attach(Box::new(right.endpoint()));

        let mut c = Node::with_parts(NodeConfig::default(), Identity::generate(), clock.clone());
        c.attach(Box::new(right.endpoint()));

        let echo = c.register(Destination::encrypted_in(
            Identity::generate(),
            DestinationName::new("example_utilities", "echo.request"),
        ));
        c.set_proof_strategy(&echo, ProofStrategy::ProveAll);
        c.announce(echo, None);

        for _ in 0..4 {
            c.pulse();
            r.pulse();
            a.pulse();
        }
        assert_eq!(a.hops_to(&echo), Some(2));
        assert_eq!(r.hops_to(&echo), Some(1));

        let packet_hash = a.send_packet(echo, b"over the relay", true, None).unwrap();
        clock.advance(Duration::from_millis(40));
        for _ in 0..4 {
            a.pulse();
            r.pulse();
            c.pulse();
        }

        let arrived = c.drain_events().into_iter().any(|event| {
            matches!(
                event,
                Event::PacketReceived { ref data, .. } if data == b"over the relay"
            )
        });
        assert!(arrived);
        assert_eq!(
            a.receipt(&packet_hash).unwrap().status(),
            ReceiptStatus::Delivered
        );
    }

    #[test]
    fn test_shutdown_closes_links_and_fails_receipts() {
        let (mut a, mut b, bus, _clock) = two_nodes();

        let dns = a.register(Destination::plain_in(
            Some(Identity::generate()),
            DestinationName::new("dns", ""),
        ));
        a.announce(dns, None);
        pulse_both(&mut a, &mut b, 2);

        let link = b.link(dns);
        pulse_both(&mut b, &mut a, 3);
        assert_eq!(b.link_status(&link), Some(LinkStatus::Active));
        b.drain_events();

        bus.set_partitioned(true);
        let packet_hash = b.send_packet(dns, b"pending", true, None).unwrap();

        b.shutdown();

        assert_eq!(b.link_status(&link), Some(LinkStatus::Closed));
        assert_eq!(
            b.receipt(&packet_hash).unwrap().status(),
            ReceiptStatus::Failed
        );

        let events = b.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            Event::LinkStateChanged {
                status: LinkStatus::Closed,
                reason: Some(LinkClosedReason::Shutdown),
                ..
            }
        )));
        assert!(events
            .iter()
            .any(|event| matches!(event, Event::ReceiptResolved { .. })));
    }
}
