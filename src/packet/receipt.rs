//! Sender-side delivery tracking.
//!
//! A receipt is created when a packet requests a delivery proof. It
//! transitions exactly once: to Delivered when a valid proof arrives, or to
//! Failed when its deadline elapses. Whichever happens first wins, and the
//! transition removes it from the pending set so the other can never fire.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::core::{DEFAULT_MAX_RECEIPTS, PROOF_TIMEOUT_BASE, PROOF_TIMEOUT_PER_HOP};
use crate::hash::{AddressHash, PacketHash};

/// Delivery state of a tracked packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    /// In flight, awaiting proof.
    Sent,
    /// A valid proof arrived before the deadline.
    Delivered,
    /// The deadline elapsed with no proof.
    Failed,
}

/// Sender-side tracking for one packet awaiting proof.
#[derive(Debug, Clone)]
pub struct Receipt {
    packet_hash: PacketHash,
    destination: AddressHash,
    sent_at: Instant,
    deadline: Instant,
    status: ReceiptStatus,
    rtt: Option<Duration>,
}

impl Receipt {
    /// The hash of the tracked packet.
    pub fn packet_hash(&self) -> PacketHash {
        self.packet_hash
    }

    /// The destination the packet was sent toward.
    pub fn destination(&self) -> AddressHash {
        self.destination
    }

    /// Current delivery state.
    pub fn status(&self) -> ReceiptStatus {
        self.status
    }

    /// Measured round-trip time, present once Delivered.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// When the packet was sent.
    pub fn sent_at(&self) -> Instant {
        self.sent_at
    }

    /// The proof deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// RTT estimator implementing the RFC 6298 smoothing algorithm.
///
/// Seeded from delivered receipts, one per destination; the retransmission
/// timeout it produces becomes the default proof deadline once a sample
/// exists.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: f64,
    rttvar: f64,
    initialized: bool,
}

/// Estimator constants.
pub mod rtt_constants {
    use std::time::Duration;

    /// Alpha for SRTT smoothing (1/8).
    pub const SRTT_ALPHA: f64 = 0.125;

    /// Beta for RTTVAR smoothing (1/4).
    pub const RTTVAR_BETA: f64 = 0.25;

    /// K multiplier per RFC 6298.
    pub const RTO_K: f64 = 4.0;

    /// Floor for the produced timeout.
    pub const MIN_TIMEOUT: Duration = Duration::from_millis(250);

    /// Ceiling for the produced timeout.
    pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);
}

impl RttEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self {
            srtt: 0.0,
            rttvar: 0.0,
            initialized: false,
        }
    }

    /// Whether at least one sample has been observed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Feed a round-trip sample.
    pub fn update(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;

        if !self.initialized {
            self.srtt = sample_ms;
            self.rttvar = sample_ms / 2.0;
            self.initialized = true;
        } else {
            self.rttvar = (1.0 - rtt_constants::RTTVAR_BETA) * self.rttvar
                + rtt_constants::RTTVAR_BETA * (self.srtt - sample_ms).abs();
            self.srtt = (1.0 - rtt_constants::SRTT_ALPHA) * self.srtt
                + rtt_constants::SRTT_ALPHA * sample_ms;
        }
    }

    /// Smoothed round-trip time.
    pub fn srtt(&self) -> Duration {
        Duration::from_secs_f64(self.srtt / 1000.0)
    }

    /// Timeout suggestion: `SRTT + K * RTTVAR`, clamped.
    pub fn timeout(&self) -> Duration {
        let ms = self.srtt + rtt_constants::RTO_K * self.rttvar;
        Duration::from_secs_f64(ms / 1000.0).clamp(
            rtt_constants::MIN_TIMEOUT,
            rtt_constants::MAX_TIMEOUT,
        )
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of outstanding and recently resolved receipts on a node.
#[derive(Debug)]
pub struct ReceiptTable {
    pending: HashMap<PacketHash, Receipt>,
    resolved: HashMap<PacketHash, Receipt>,
    resolved_order: VecDeque<PacketHash>,
    estimators: HashMap<AddressHash, RttEstimator>,
    max_resolved: usize,
    timeout_base: Duration,
    timeout_per_hop: Duration,
}

impl ReceiptTable {
    /// Create a table with the given bounds and default-timeout scaling.
    pub fn new(max_resolved: usize, timeout_base: Duration, timeout_per_hop: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            resolved: HashMap::new(),
            resolved_order: VecDeque::new(),
            estimators: HashMap::new(),
            max_resolved,
            timeout_base,
            timeout_per_hop,
        }
    }

    /// The default proof deadline for a packet toward `destination`.
    ///
    /// A caller-supplied timeout wins; otherwise the destination's RTT
    /// estimator once it has a sample, otherwise base + per-hop scaling.
    pub fn deadline_for(
        &self,
        destination: &AddressHash,
        hops: Option<u8>,
        now: Instant,
        timeout: Option<Duration>,
    ) -> Instant {
        if let Some(timeout) = timeout {
            return now + timeout;
        }

        if let Some(estimator) = self.estimators.get(destination) {
            if estimator.is_initialized() {
                return now + estimator.timeout();
            }
        }

        let hops = hops.unwrap_or(1).max(1) as u32;
        now + self.timeout_base + self.timeout_per_hop * hops
    }

    /// Register a packet in Sent state.
    pub fn register(
        &mut self,
        packet_hash: PacketHash,
        destination: AddressHash,
        now: Instant,
        deadline: Instant,
    ) {
        self.pending.insert(
            packet_hash,
            Receipt {
                packet_hash,
                destination,
                sent_at: now,
                deadline,
                status: ReceiptStatus::Sent,
                rtt: None,
            },
        );
    }

    /// Resolve a pending receipt as Delivered.
    ///
    /// Returns the resolved receipt, or `None` if the hash is unknown or
    /// already resolved; duplicate and late proofs are no-ops.
    pub fn resolve_delivered(&mut self, packet_hash: &PacketHash, now: Instant) -> Option<Receipt> {
        let mut receipt = self.pending.remove(packet_hash)?;
        receipt.status = ReceiptStatus::Delivered;
        let rtt = now.saturating_duration_since(receipt.sent_at);
        receipt.rtt = Some(rtt);

        self.estimators
            .entry(receipt.destination)
            .or_default()
            .update(rtt);

        self.store_resolved(receipt.clone());
        Some(receipt)
    }

    /// Fail every pending receipt whose deadline has passed.
    pub fn sweep(&mut self, now: Instant) -> Vec<Receipt> {
        let expired: Vec<PacketHash> = self
            .pending
            .iter()
            .filter(|(_, receipt)| now >= receipt.deadline)
            .map(|(hash, _)| *hash)
            .collect();

        let mut failed = Vec::with_capacity(expired.len());
        for hash in expired {
            if let Some(mut receipt) = self.pending.remove(&hash) {
                receipt.status = ReceiptStatus::Failed;
                trace!(packet = %hash, "receipt timed out");
                self.store_resolved(receipt.clone());
                failed.push(receipt);
            }
        }
        failed
    }

    /// Fail every pending receipt, regardless of deadline (node shutdown).
    pub fn fail_all(&mut self) -> Vec<Receipt> {
        let mut failed: Vec<Receipt> = self
            .pending
            .drain()
            .map(|(_, mut receipt)| {
                receipt.status = ReceiptStatus::Failed;
                receipt
            })
            .collect();

        for receipt in &failed {
            self.store_resolved(receipt.clone());
        }
        failed.sort_by_key(|r| r.sent_at);
        failed
    }

    /// Look up a receipt, pending or resolved.
    pub fn get(&self, packet_hash: &PacketHash) -> Option<&Receipt> {
        self.pending
            .get(packet_hash)
            .or_else(|| self.resolved.get(packet_hash))
    }

    /// Whether a proof for `packet_hash` is still awaited.
    pub fn is_pending(&self, packet_hash: &PacketHash) -> bool {
        self.pending.contains_key(packet_hash)
    }

    /// Number of outstanding receipts.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// The RTT estimator for a destination, if any samples exist.
    pub fn estimator(&self, destination: &AddressHash) -> Option<&RttEstimator> {
        self.estimators.get(destination)
    }

    fn store_resolved(&mut self, receipt: Receipt) {
        while self.resolved_order.len() >= self.max_resolved {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
        self.resolved_order.push_back(receipt.packet_hash);
        self.resolved.insert(receipt.packet_hash, receipt);
    }
}

impl Default for ReceiptTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECEIPTS, PROOF_TIMEOUT_BASE, PROOF_TIMEOUT_PER_HOP)
    }
}
