//! An in-memory frame bus.
//!
//! Every endpoint attached to a bus receives every frame sent by any other
//! endpoint, like nodes sharing a radio channel. Used by tests and local
//! multi-node setups; deterministic, no I/O.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::core::{FrameTransport, TargetHint};

#[derive(Debug, Default)]
struct BusInner {
    queues: Vec<VecDeque<Vec<u8>>>,
    partitioned: bool,
}

/// A shared broadcast medium for [`MemoryTransport`] endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<BusInner>>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint to the bus.
    pub fn endpoint(&self) -> MemoryTransport {
        let mut inner = self.inner.lock().unwrap();
        inner.queues.push(VecDeque::new());
        MemoryTransport {
            inner: Arc::clone(&self.inner),
            index: inner.queues.len() - 1,
        }
    }

    /// Partition the bus: while set, every sent frame is dropped.
    ///
    /// Simulates the medium going dark without detaching endpoints.
    pub fn set_partitioned(&self, partitioned: bool) {
        self.inner.lock().unwrap().partitioned = partitioned;
    }
}

/// One endpoint on a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryTransport {
    inner: Arc<Mutex<BusInner>>,
    index: usize,
}

impl FrameTransport for MemoryTransport {
    fn send(&mut self, raw: &[u8], _hint: TargetHint) {
        let mut inner = self.inner.lock().unwrap();
        if inner.partitioned {
            return;
        }
        let index = self.index;
        for (i, queue) in inner.queues.iter_mut().enumerate() {
            if i != index {
                queue.push_back(raw.to_vec());
            }
        }
    }

    fn poll_inbound(&mut self) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        inner.queues[self.index].drain(..).collect()
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_all_other_endpoints() {
        let bus = MemoryBus::new();
        let mut a = bus.endpoint();
        let mut b = bus.endpoint();
        let mut c = bus.endpoint();

        a.send(b"frame", TargetHint::Broadcast);

        assert!(a.poll_inbound().is_empty());
        assert_eq!(b.poll_inbound(), vec![b"frame".to_vec()]);
        assert_eq!(c.poll_inbound(), vec![b"frame".to_vec()]);
    }

    #[test]
    fn test_poll_drains() {
        let bus = MemoryBus::new();
        let mut a = bus.endpoint();
        let mut b = bus.endpoint();

        a.send(b"one", TargetHint::Broadcast);
        a.send(b"two", TargetHint::Broadcast);

        assert_eq!(b.poll_inbound().len(), 2);
        assert!(b.poll_inbound().is_empty());
    }

    #[test]
    fn test_partition_drops_frames() {
        let bus = MemoryBus::new();
        let mut a = bus.endpoint();
        let mut b = bus.endpoint();

        bus.set_partitioned(true);
        a.send(b"lost", TargetHint::Broadcast);
        assert!(b.poll_inbound().is_empty());

        bus.set_partitioned(false);
        a.send(b"heard", TargetHint::Broadcast);
        assert_eq!(b.poll_inbound(), vec![b"heard".to_vec()]);
    }
}
