use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use super::hash::{HashValue, MAX_HASH, MIN_HASH, hash_key};
use crate::error::ProtocolError;

/// Identity of a storage node: the address clients use to reach it.
///
/// Serialized as `ip:port`. The node's position on the ring is the hash of that string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub SocketAddr);

impl NodeId {
    pub fn ring_hash(&self) -> HashValue {
        hash_key(&self.to_string())
    }

    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<SocketAddr>()
            .map(NodeId)
            .map_err(|_| ProtocolError::MalformedAddress(s.to_string()))
    }
}

/// Inclusive hash range `[start, end]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRange {
    pub start: HashValue,
    pub end: HashValue,
}

impl KeyRange {
    pub const FULL: KeyRange = KeyRange {
        start: MIN_HASH,
        end: MAX_HASH,
    };

    pub fn new(start: HashValue, end: HashValue) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hash: HashValue) -> bool {
        hash >= self.start && hash <= self.end
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.contains(hash_key(key))
    }
}

/// A node together with the range it currently owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: NodeId,
    pub range: KeyRange,
}

impl NodeEntry {
    /// A fresh entry owning the full space, as used for bootstrap addresses.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            range: KeyRange::FULL,
        }
    }

    pub fn is_responsible(&self, key: &str) -> bool {
        self.range.contains_key(key)
    }
}

impl fmt::Display for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.range.start, self.range.end, self.id)
    }
}

impl FromStr for NodeEntry {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(',').collect();
        if parts.len() != 3 {
            return Err(ProtocolError::MalformedMetadata(format!(
                "expected 3 fields, got {}: {}",
                parts.len(),
                s
            )));
        }

        let start = parse_hash(parts[0])?;
        let end = parse_hash(parts[1])?;
        let id = parts[2].parse()?;

        Ok(Self {
            id,
            range: KeyRange { start, end },
        })
    }
}

fn parse_hash(s: &str) -> Result<HashValue, ProtocolError> {
    s.parse::<HashValue>()
        .map_err(|_| ProtocolError::MalformedMetadata(format!("invalid hash: {}", s)))
}

fn format_entries(entries: &[NodeEntry], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for entry in entries {
        write!(f, "{};", entry)?;
    }
    Ok(())
}

fn parse_entries(s: &str) -> Result<Vec<NodeEntry>, ProtocolError> {
    s.trim()
        .split(';')
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

/// Primary-ownership map: every node in the ring with its range, in hash order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub entries: Vec<NodeEntry>,
}

impl Metadata {
    pub fn new(entries: Vec<NodeEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn find(&self, id: &NodeId) -> Option<&NodeEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.find(id).is_some()
    }

    pub fn responsible_for(&self, hash: HashValue) -> Option<&NodeEntry> {
        self.entries.iter().find(|entry| entry.range.contains(hash))
    }

    /// Adds an entry unless a node with the same identity is already present.
    pub fn insert(&mut self, entry: NodeEntry) {
        if !self.contains(&entry.id) {
            self.entries.push(entry);
        }
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<NodeEntry> {
        let idx = self.entries.iter().position(|entry| &entry.id == id)?;
        Some(self.entries.remove(idx))
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_entries(&self.entries, f)
    }
}

impl FromStr for Metadata {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_entries(s).map(Self::new)
    }
}

/// Ordered replica set: element 0 is the primary, the rest are the nodes it pushes to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaSet {
    pub members: Vec<NodeEntry>,
}

impl ReplicaSet {
    pub fn new(members: Vec<NodeEntry>) -> Self {
        Self { members }
    }

    pub fn single(entry: NodeEntry) -> Self {
        Self {
            members: vec![entry],
        }
    }

    pub fn primary(&self) -> Option<&NodeEntry> {
        self.members.first()
    }

    /// Replica peers, excluding the primary.
    pub fn peers(&self) -> &[NodeEntry] {
        self.members.get(1..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl fmt::Display for ReplicaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_entries(&self.members, f)
    }
}

impl FromStr for ReplicaSet {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_entries(s).map(Self::new)
    }
}
