//! In-memory chain index.
//!
//! Nodes record one block's position in the block tree and never mutate
//! after creation. The arena owns the nodes; parent links are stored as
//! stable keys rather than pointers, so ancestor walks are cycle-free and
//! shared freely between readers.

use std::collections::HashMap;

use crate::constants::MEDIAN_TIME_BLOCKS;
use crate::error::{Result, ValidateError};
use crate::types::{BlockHeader, Hash};

/// Stable handle to a node in the [`ChainIndex`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey(usize);

/// One block's position in the chain: identity hash, parent link, height,
/// and the header fields needed to re-derive contextual rules.
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub hash: Hash,
    pub parent: Option<NodeKey>,
    pub height: u64,
    pub version: i32,
    pub bits: u32,
    pub timestamp: u64,
}

/// Arena of immutable block nodes addressed by key or hash.
#[derive(Debug, Default)]
pub struct ChainIndex {
    nodes: Vec<BlockNode>,
    by_hash: HashMap<Hash, NodeKey>,
}

impl ChainIndex {
    pub fn new() -> ChainIndex {
        ChainIndex::default()
    }

    /// Adds a node for `header`. The genesis node passes `parent: None` and
    /// gets height zero; every other node is its parent's height plus one.
    /// Inserting a hash that is already present returns the existing key.
    pub fn insert(&mut self, header: &BlockHeader, parent: Option<NodeKey>) -> Result<NodeKey> {
        let hash = header.block_hash();
        if let Some(&key) = self.by_hash.get(&hash) {
            return Ok(key);
        }
        let height = match parent {
            Some(parent_key) => {
                let parent_node = self.try_node(parent_key)?;
                if parent_node.hash != header.prev_block {
                    return Err(ValidateError::Assertion(format!(
                        "index insert: parent node {} does not match header prev block {}",
                        parent_node.hash, header.prev_block
                    )));
                }
                parent_node.height + 1
            }
            None => 0,
        };
        let key = NodeKey(self.nodes.len());
        self.nodes.push(BlockNode {
            hash,
            parent,
            height,
            version: header.version,
            bits: header.bits,
            timestamp: header.timestamp,
        });
        self.by_hash.insert(hash, key);
        Ok(key)
    }

    pub fn lookup(&self, hash: &Hash) -> Option<NodeKey> {
        self.by_hash.get(hash).copied()
    }

    pub fn node(&self, key: NodeKey) -> &BlockNode {
        &self.nodes[key.0]
    }

    fn try_node(&self, key: NodeKey) -> Result<&BlockNode> {
        self.nodes
            .get(key.0)
            .ok_or_else(|| ValidateError::Assertion(format!("unknown chain index key {:?}", key)))
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.node(key).parent
    }

    /// The ancestor of `key` at exactly `height` on its own path, or `None`
    /// when `height` exceeds the node's height.
    pub fn ancestor(&self, key: NodeKey, height: u64) -> Option<NodeKey> {
        let mut current = key;
        if height > self.node(current).height {
            return None;
        }
        while self.node(current).height > height {
            current = self.node(current).parent?;
        }
        Some(current)
    }

    /// Median timestamp of the last [`MEDIAN_TIME_BLOCKS`] blocks ending at
    /// `key`, used to resist timestamp manipulation.
    pub fn median_time_past(&self, key: NodeKey) -> u64 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_BLOCKS);
        let mut current = Some(key);
        while let Some(k) = current {
            if timestamps.len() == MEDIAN_TIME_BLOCKS {
                break;
            }
            let node = self.node(k);
            timestamps.push(node.timestamp);
            current = node.parent;
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }
}
