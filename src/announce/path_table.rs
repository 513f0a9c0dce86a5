//! The path table: destination reachability learned from announces.
//!
//! One route is retained per destination. A candidate replaces the current
//! entry only if it has strictly fewer hops, or equal hops and a newer
//! announcer timestamp. This tie-break rule makes route convergence
//! deterministic. Entries expire after a silence interval and the table
//! evicts its oldest entry rather than refusing new ones.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::core::TransportHandle;
use crate::crypto::PublicIdentity;
use crate::destination::Privacy;
use crate::hash::AddressHash;

/// A known route toward an announced destination.
#[derive(Debug, Clone)]
pub struct PathEntry {
    /// The destination this entry routes toward.
    pub destination: AddressHash,
    /// The transport the announce arrived on; outbound frames for the
    /// destination leave through it.
    pub transport: TransportHandle,
    /// Hops between this node and the destination.
    pub hops: u8,
    /// The announcer's clock when the record was signed. Comparable only
    /// against other announces from the same destination.
    pub announced_at_ms: u64,
    /// Local instant the announce was accepted.
    pub received_at: Instant,
    /// The announcing identity.
    pub identity: PublicIdentity,
    /// Privacy mode the destination was announced with; decides whether
    /// packets toward it are sealed.
    pub privacy: Privacy,
    /// Application data carried by the announce.
    pub app_data: Vec<u8>,
}

/// The set of known routes, one per destination.
#[derive(Debug)]
pub struct PathTable {
    entries: HashMap<AddressHash, PathEntry>,
    capacity: usize,
}

impl PathTable {
    /// Create a table bounded to `capacity` routes.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Offer a candidate route. Returns `true` if the table changed.
    ///
    /// The replacement rule: no existing entry, strictly fewer hops, or
    /// equal hops with a newer announcer timestamp.
    pub fn consider(&mut self, candidate: PathEntry) -> bool {
        match self.entries.get(&candidate.destination) {
            Some(current) => {
                let better = candidate.hops < current.hops
                    || (candidate.hops == current.hops
                        && candidate.timestamp_newer_than(current));
                if !better {
                    trace!(
                        destination = %candidate.destination,
                        hops = candidate.hops,
                        current_hops = current.hops,
                        "announce did not improve path"
                    );
                    return false;
                }
            }
            None => {
                if self.entries.len() >= self.capacity {
                    self.evict_oldest();
                }
            }
        }

        debug!(
            destination = %candidate.destination,
            hops = candidate.hops,
            transport = candidate.transport,
            "path updated"
        );
        self.entries.insert(candidate.destination, candidate);
        true
    }

    /// The current route toward `destination`, if any.
    pub fn next_hop(&self, destination: &AddressHash) -> Option<&PathEntry> {
        self.entries.get(destination)
    }

    /// The identity that announced `destination`, if known.
    pub fn identity_of(&self, destination: &AddressHash) -> Option<&PublicIdentity> {
        self.entries.get(destination).map(|entry| &entry.identity)
    }

    /// Hop count toward `destination`, if known.
    pub fn hops_to(&self, destination: &AddressHash) -> Option<u8> {
        self.entries.get(destination).map(|entry| entry.hops)
    }

    /// Drop entries that have been silent past `expiry`.
    ///
    /// Expiry removes routability, not historical knowledge: a later
    /// announce reinstates the destination at whatever hop count it then
    /// advertises.
    pub fn sweep(&mut self, now: Instant, expiry: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.received_at) < expiry);
        before - self.entries.len()
    }

    /// Number of known routes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no routes are known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|entry| entry.received_at)
            .map(|entry| entry.destination);
        if let Some(destination) = oldest {
            debug!(%destination, "path table full, evicting oldest route");
            self.entries.remove(&destination);
        }
    }
}

impl PathEntry {
    fn timestamp_newer_than(&self, other: &PathEntry) -> bool {
        self.announced_at_ms > other.announced_at_ms
    }
}
