use anchorhash::{AnchorHash, Builder};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

use crate::routing::hasher::KeyHasher;

/// Default number of anchor buckets per ring.
pub const DEFAULT_CAPACITY: u16 = 1024;

/// Consistent hash ring using the AnchorHash algorithm.
///
/// Provides:
/// - Minimal disruption: adding or removing one node only moves the keys
///   that node gains or loses
/// - Uniform load distribution without virtual points
/// - Identical placement for rings that saw the same sequence of changes
///
/// Placement follows the change history. An empty ring, or one that outgrows
/// its capacity, is rebuilt from the sorted node set.
#[derive(Clone)]
pub struct HashRing {
    hasher: Arc<dyn KeyHasher>,
    capacity: u16,
    anchor: Option<AnchorHash<u64, String, RingHasher>>,
    nodes: BTreeSet<String>,
}

impl HashRing {
    pub fn new(hasher: Arc<dyn KeyHasher>, capacity: u16) -> Self {
        Self {
            hasher,
            capacity: capacity.max(1),
            anchor: None,
            nodes: BTreeSet::new(),
        }
    }

    /// Add a node. Returns `false` if it was already present.
    pub fn add_node(&mut self, name: &str) -> bool {
        if !self.nodes.insert(name.to_string()) {
            return false;
        }

        let fits = self.nodes.len() <= self.capacity as usize;
        let added = match self.anchor.as_mut() {
            Some(anchor) if fits => anchor.add_resource(name.to_string()).is_ok(),
            _ => false,
        };
        if !added {
            self.rebuild_anchor();
        }
        true
    }

    /// Remove a node. Returns `false` if it was not present.
    pub fn remove_node(&mut self, name: &str) -> bool {
        if !self.nodes.remove(name) {
            return false;
        }
        if self.nodes.is_empty() {
            self.anchor = None;
            return true;
        }

        let removed = match self.anchor.as_mut() {
            Some(anchor) => anchor.remove_resource(&name.to_string()).is_ok(),
            None => false,
        };
        if !removed {
            self.rebuild_anchor();
        }
        true
    }

    /// Resolve the node owning `key`, or `None` if the ring is empty.
    pub fn node_for(&self, key: &str) -> Option<&str> {
        let anchor = self.anchor.as_ref()?;
        anchor
            .get_resource(self.hasher.hash(key.as_bytes()))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Registered node names in sorted order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    fn rebuild_anchor(&mut self) {
        if self.nodes.is_empty() {
            self.anchor = None;
            return;
        }

        let needed = self.nodes.len().min(u16::MAX as usize) as u16;
        if needed > self.capacity {
            self.capacity = needed.saturating_mul(2);
        }

        // BTreeSet iterates sorted, so equal node sets build equal rings.
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .take(self.capacity as usize)
            .cloned()
            .collect();
        self.anchor = Some(
            Builder::with_hasher(RingHasher::new(Arc::clone(&self.hasher)))
                .with_resources(nodes)
                .build(self.capacity),
        );
    }
}

impl fmt::Debug for HashRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashRing")
            .field("capacity", &self.capacity)
            .field("nodes", &self.nodes)
            .finish()
    }
}

/// Feeds the anchor's internal hashing through the ring's own key hasher,
/// so rings with different functions stay decorrelated.
#[derive(Clone)]
pub struct RingHasher {
    hasher: Arc<dyn KeyHasher>,
}

impl RingHasher {
    pub fn new(hasher: Arc<dyn KeyHasher>) -> Self {
        Self { hasher }
    }
}

impl BuildHasher for RingHasher {
    type Hasher = BufferedHasher;

    fn build_hasher(&self) -> BufferedHasher {
        BufferedHasher {
            hasher: Arc::clone(&self.hasher),
            buf: Vec::with_capacity(16),
        }
    }
}

/// Collects written bytes and hashes them in one call on `finish`.
pub struct BufferedHasher {
    hasher: Arc<dyn KeyHasher>,
    buf: Vec<u8>,
}

impl Hasher for BufferedHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        self.hasher.hash(&self.buf)
    }
}
