//! Collaborator traits for the DRIFT core.
//!
//! The core performs no I/O and reads no clocks of its own. Everything
//! timing- or wire-facing is injected through the seams defined here, which
//! keeps a node deterministic under test and agnostic to the host's
//! scheduling model.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::hash::AddressHash;

/// Monotonic time source injected into a node.
///
/// All deadlines in the core are computed by comparing stored instants
/// against `now()`; the core never sleeps.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually advanced clock for deterministic tests.
///
/// Time only moves when [`ManualClock::advance`] is called.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap();
        *elapsed += step;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.elapsed.lock().unwrap()
    }
}

/// Index of an attached frame transport on a node.
pub type TransportHandle = usize;

/// Routing hint passed to a frame transport on send.
///
/// Transports that track individual peers may use the hint to narrow
/// delivery; broadcast-only transports ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetHint {
    /// Deliver to every reachable peer on this transport.
    Broadcast,
    /// Deliver toward the peer from which traffic for this address was
    /// last observed, if the transport can tell.
    NextHop(AddressHash),
}

/// A byte-oriented carrier of opaque frames.
///
/// Implementations may lose, reorder, or duplicate frames arbitrarily; the
/// core treats every inbound frame as untrusted until verified. Both
/// operations must be non-blocking.
pub trait FrameTransport: Send {
    /// Queue a raw frame for transmission. Best effort; a full queue drops.
    fn send(&mut self, raw: &[u8], hint: TargetHint);

    /// Drain any frames that have arrived since the last poll.
    fn poll_inbound(&mut self) -> Vec<Vec<u8>>;

    /// Human-readable transport name for logs.
    fn name(&self) -> &str {
        "iface"
    }
}

/// Persistence collaborator for identity material.
///
/// The core treats persisted identities as opaque bytes; interpretation
/// belongs to [`crate::crypto::Identity`].
pub trait IdentityStore {
    /// Load previously saved bytes, or `None` if nothing is stored under
    /// `name`.
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Store `bytes` under `name`, replacing any previous content.
    fn save(&self, name: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Identity storage in a filesystem directory, one file per identity.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    root: PathBuf,
}

impl FileIdentityStore {
    /// Create a store rooted at `root`. The directory is created on first
    /// save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.root.join(name);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(self.root.join(name), bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now() - start, Duration::from_secs(5));

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now() - start, Duration::from_millis(5500));
    }

    #[test]
    fn test_manual_clock_frozen_without_advance() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_file_identity_store_roundtrip() {
        let dir = std::env::temp_dir().join("drift-test-identity-store");
        let _ = std::fs::remove_dir_all(&dir);
        let store = FileIdentityStore::new(&dir);

        assert!(store.load("missing").unwrap().is_none());

        store.save("node", &[1, 2, 3]).unwrap();
        assert_eq!(store.load("node").unwrap().unwrap(), vec![1, 2, 3]);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
