use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use tracing::debug;

use super::hash::{HashValue, MAX_HASH, MIN_HASH};
use super::types::{KeyRange, Metadata, NodeEntry, NodeId};

/// Ownership line over the hash space, keyed by each node's identity hash.
///
/// Node `i` (in hash order) owns `[hash_i, hash_{i+1} - 1]`, except that the lowest
/// node's range starts at `0` and the highest node's range ends at the maximum hash.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    nodes: BTreeMap<HashValue, NodeEntry>,
}

impl HashRing {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }

    /// Adds a node and returns the node whose range shrank (the migration source),
    /// or `None` when the ring was empty.
    pub fn join(&mut self, id: NodeId) -> Option<NodeEntry> {
        self.join_with_hash(id.ring_hash(), id)
    }

    /// Removes a node and returns the node that absorbed its range (the migration
    /// destination), or `None` if the node was unknown or the ring is now empty.
    pub fn leave(&mut self, id: &NodeId) -> Option<NodeEntry> {
        self.leave_with_hash(id.ring_hash())
    }

    pub(crate) fn join_with_hash(&mut self, hash: HashValue, id: NodeId) -> Option<NodeEntry> {
        if self.nodes.contains_key(&hash) {
            debug!(node = %id, "node already on the ring, re-joining");
            self.leave_with_hash(hash);
        }

        let (first, last) = match (self.first_hash(), self.last_hash()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                self.nodes.insert(
                    hash,
                    NodeEntry {
                        id,
                        range: KeyRange::FULL,
                    },
                );
                debug!(node = %id, "first node on the ring takes the full range");
                return None;
            }
        };

        let (range, neighbor_hash) = if hash < first {
            let neighbor = self.nodes.get_mut(&first)?;
            neighbor.range.start = first;
            (KeyRange::new(MIN_HASH, first - 1), first)
        } else if hash > last {
            let neighbor = self.nodes.get_mut(&last)?;
            neighbor.range.end = hash - 1;
            (KeyRange::new(hash, MAX_HASH), last)
        } else {
            let predecessor = self.floor_hash(hash)?;
            let neighbor = self.nodes.get_mut(&predecessor)?;
            let old_end = neighbor.range.end;
            neighbor.range.end = hash - 1;
            (KeyRange::new(hash, old_end), predecessor)
        };

        self.nodes.insert(hash, NodeEntry { id, range });
        let evicted = self.nodes.get(&neighbor_hash).cloned();

        debug!(
            node = %id,
            start = range.start,
            end = range.end,
            "node joined the ring"
        );

        evicted
    }

    pub(crate) fn leave_with_hash(&mut self, hash: HashValue) -> Option<NodeEntry> {
        let removed = self.nodes.remove(&hash)?;
        debug!(node = %removed.id, "node left the ring");

        let (first, last) = (self.first_hash()?, self.last_hash()?);

        let donee_hash = if hash < first {
            first
        } else if hash > last {
            last
        } else {
            self.floor_hash(hash)?
        };

        let donee = self.nodes.get_mut(&donee_hash)?;
        if hash < first {
            donee.range.start = MIN_HASH;
        } else {
            donee.range.end = removed.range.end;
        }

        Some(donee.clone())
    }

    /// Smallest node hash that is `>= hash`.
    pub fn successor_hash_after(&self, hash: HashValue) -> Option<HashValue> {
        self.nodes.range(hash..).next().map(|(h, _)| *h)
    }

    fn floor_hash(&self, hash: HashValue) -> Option<HashValue> {
        self.nodes.range(..=hash).next_back().map(|(h, _)| *h)
    }

    /// Hash of the next node strictly after `hash`, wrapping to the lowest node.
    pub fn next_hash_wrapping(&self, hash: HashValue) -> Option<HashValue> {
        self.nodes
            .range((Excluded(hash), Unbounded))
            .next()
            .map(|(h, _)| *h)
            .or_else(|| self.first_hash())
    }

    pub fn first_hash(&self) -> Option<HashValue> {
        self.nodes.keys().next().copied()
    }

    pub fn last_hash(&self) -> Option<HashValue> {
        self.nodes.keys().next_back().copied()
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&id.ring_hash())
    }

    pub fn get_by_hash(&self, hash: HashValue) -> Option<&NodeEntry> {
        self.nodes.get(&hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HashValue, &NodeEntry)> {
        self.nodes.iter()
    }

    /// Snapshot of the partition map in hash order.
    pub fn metadata(&self) -> Metadata {
        Metadata::new(self.nodes.values().cloned().collect())
    }
}
