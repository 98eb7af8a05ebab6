//! In-memory entry index for micro directories
//!
//! Shadows every live slot of the on-disk block, ordered by (hash, cd), so
//! name lookups, collision-differentiator allocation and cursor positioning
//! never scan the whole block.

use crate::block::MicroEntry;
use crate::cursor::MAX_CD;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Ordering key of an index node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub hash: u64,
    pub cd: u32,
}

impl EntryKey {
    pub fn new(hash: u64, cd: u32) -> Self {
        EntryKey { hash, cd }
    }
}

/// Index node: a cached copy of one live slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexNode {
    pub hash: u64,
    /// Slot number within the block
    pub chunk: usize,
    pub entry: MicroEntry,
}

impl IndexNode {
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.hash, self.entry.cd)
    }
}

#[derive(Debug, Default)]
pub struct EntryIndex {
    nodes: BTreeMap<EntryKey, IndexNode>,
}

impl EntryIndex {
    pub fn new() -> Self {
        EntryIndex {
            nodes: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add a node for slot `chunk`
    ///
    /// `expected_hash` is the hash recomputed from the entry's name; a
    /// mismatch means the index and the block disagree.
    pub fn insert(&mut self, chunk: usize, hash: u64, expected_hash: u64, entry: MicroEntry) {
        assert!(
            entry.cd < MAX_CD,
            "collision differentiator {} out of range for hash {:#x}",
            entry.cd,
            hash
        );
        assert_eq!(hash, expected_hash, "index hash diverges from entry name");

        let key = EntryKey::new(hash, entry.cd);
        let previous = self.nodes.insert(key, IndexNode { hash, chunk, entry });
        assert!(previous.is_none(), "duplicate (hash, cd) {:?} in index", key);
    }

    pub fn remove(&mut self, key: EntryKey) -> Option<IndexNode> {
        self.nodes.remove(&key)
    }

    pub fn get(&self, key: EntryKey) -> Option<&IndexNode> {
        self.nodes.get(&key)
    }

    pub fn get_mut(&mut self, key: EntryKey) -> Option<&mut IndexNode> {
        self.nodes.get_mut(&key)
    }

    /// Nodes sharing `hash`, in cd order
    pub fn hash_run(&self, hash: u64) -> impl Iterator<Item = &IndexNode> {
        self.nodes
            .range(EntryKey::new(hash, 0)..)
            .take_while(move |(key, _)| key.hash == hash)
            .map(|(_, node)| node)
    }

    /// Find the live node named `name` whose hash is `hash`
    pub fn find(&self, hash: u64, name: &str) -> Option<&IndexNode> {
        self.hash_run(hash).find(|node| node.entry.name == name)
    }

    /// Smallest cd not used by any node with `hash`
    pub fn find_unused_cd(&self, hash: u64) -> u32 {
        let mut cd = 0;
        for node in self.hash_run(hash) {
            if node.entry.cd != cd {
                break;
            }
            cd += 1;
        }
        cd
    }

    /// First node ordered at or after `key`
    pub fn at_or_after(&self, key: EntryKey) -> Option<&IndexNode> {
        self.nodes
            .range((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(|(_, node)| node)
    }

    /// All nodes in (hash, cd) order
    pub fn iter(&self) -> impl Iterator<Item = &IndexNode> {
        self.nodes.values()
    }

    /// Release every node
    pub fn destroy(&mut self) {
        self.nodes.clear();
    }
}
