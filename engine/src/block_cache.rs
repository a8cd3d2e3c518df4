//! A bounded, insertion-ordered block cache used for fork detection and
//! longest-chain selection.
//!
//! Grounded on the inline `BlockCache` class in
//! `original_source/consensus/pkg/engine/ddpoa_engine.py`. The
//! original wraps an `OrderedDict` capped at 10 entries with FIFO
//! eviction; `indexmap::IndexMap` gives the same shape here — O(1) lookup
//! by key plus a stable insertion order to walk and evict by.

use indexmap::IndexMap;

use crate::config::BLOCK_CACHE_CAPACITY;
use crate::types::BlockId;

/// The minimal block header data this crate needs for fork resolution. The
/// host runtime's full block storage is out of scope (§1 Non-goals); this
/// only carries what `block_path`/`longest_chain` need to walk parent
/// links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlock {
    pub id: BlockId,
    pub previous_id: BlockId,
    pub block_num: u64,
    pub signer: crate::types::Key,
}

/// A FIFO-evicting, insertion-ordered cache of recently seen blocks,
/// capped at `BLOCK_CACHE_CAPACITY` entries.
#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: IndexMap<BlockId, CachedBlock>,
}

impl BlockCache {
    pub fn new() -> Self {
        Self {
            blocks: IndexMap::new(),
        }
    }

    /// Inserts `block`, evicting the oldest entry if the cache is at
    /// capacity. Returns the evicted block's id, if any — the caller is
    /// expected to tell the host to `ignore_block` it.
    pub fn insert(&mut self, block: CachedBlock) -> Option<BlockId> {
        let evicted = if self.blocks.len() >= BLOCK_CACHE_CAPACITY && !self.blocks.contains_key(&block.id) {
            self.blocks.shift_remove_index(0).map(|(id, _)| id)
        } else {
            None
        };
        self.blocks.insert(block.id, block);
        evicted
    }

    pub fn get(&self, id: &BlockId) -> Option<&CachedBlock> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// True if `id` can be reached by walking `previous_id` links starting
    /// from `from`, without leaving the cache.
    pub fn traversable(&self, from: &BlockId, id: &BlockId) -> bool {
        self.block_path(from, id).is_some()
    }

    /// The path of blocks from `from` back to `id` (inclusive of both
    /// ends), oldest-last (i.e. `from` is first, `id` is last), or `None`
    /// if `id` is not an ancestor of `from` reachable within the cache.
    pub fn block_path(&self, from: &BlockId, id: &BlockId) -> Option<Vec<BlockId>> {
        let mut path = Vec::new();
        let mut cursor = *from;
        loop {
            path.push(cursor);
            if cursor == *id {
                return Some(path);
            }
            let block = self.blocks.get(&cursor)?;
            if block.previous_id == cursor {
                // Genesis-style self-referential sentinel: no further
                // ancestor to walk to.
                return None;
            }
            cursor = block.previous_id;
            if path.len() > BLOCK_CACHE_CAPACITY {
                // Cannot walk further than the cache's own capacity
                // without looping; guards against a malformed chain.
                return None;
            }
        }
    }

    /// The chain tip with the greatest `block_num` among `candidates`,
    /// breaking ties by the first candidate encountered (the order
    /// `candidates` is given in, not insertion order into the cache).
    pub fn longest_chain<'a>(&self, candidates: &[&'a BlockId]) -> Option<&'a BlockId> {
        candidates
            .iter()
            .copied()
            .max_by_key(|id| self.blocks.get(*id).map(|b| b.block_num).unwrap_or(0))
    }

    pub fn block_by_num_and_signer(
        &self,
        block_num: u64,
        signer: &crate::types::Key,
    ) -> Option<&CachedBlock> {
        self.blocks
            .values()
            .find(|b| b.block_num == block_num && &b.signer == signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Key;

    fn block(id: u8, prev: u8, num: u64) -> CachedBlock {
        CachedBlock {
            id: BlockId::from_bytes([id; 32]),
            previous_id: BlockId::from_bytes([prev; 32]),
            block_num: num,
            signer: Key::from("signer"),
        }
    }

    #[test]
    fn fifo_eviction_at_capacity() {
        let mut cache = BlockCache::new();
        for i in 0..(BLOCK_CACHE_CAPACITY as u8) {
            assert!(cache.insert(block(i, i.saturating_sub(1), i as u64)).is_none());
        }
        let evicted = cache.insert(block(BLOCK_CACHE_CAPACITY as u8, 9, BLOCK_CACHE_CAPACITY as u64));
        assert_eq!(evicted, Some(BlockId::from_bytes([0u8; 32])));
        assert_eq!(cache.len(), BLOCK_CACHE_CAPACITY);
    }

    #[test]
    fn block_path_walks_previous_links() {
        let mut cache = BlockCache::new();
        cache.insert(block(1, 0, 1));
        cache.insert(block(2, 1, 2));
        cache.insert(block(3, 2, 3));

        let path = cache
            .block_path(&BlockId::from_bytes([3u8; 32]), &BlockId::from_bytes([1u8; 32]))
            .unwrap();
        assert_eq!(
            path,
            vec![
                BlockId::from_bytes([3u8; 32]),
                BlockId::from_bytes([2u8; 32]),
                BlockId::from_bytes([1u8; 32]),
            ]
        );
    }

    #[test]
    fn block_path_none_when_unreachable() {
        let mut cache = BlockCache::new();
        cache.insert(block(1, 0, 1));
        assert!(cache
            .block_path(&BlockId::from_bytes([1u8; 32]), &BlockId::from_bytes([9u8; 32]))
            .is_none());
    }

    #[test]
    fn longest_chain_picks_greatest_block_num() {
        let mut cache = BlockCache::new();
        cache.insert(block(1, 0, 1));
        cache.insert(block(2, 1, 2));
        let a = BlockId::from_bytes([1u8; 32]);
        let b = BlockId::from_bytes([2u8; 32]);
        assert_eq!(cache.longest_chain(&[&a, &b]), Some(&b));
    }

    #[test]
    fn traversable_is_reflexive() {
        let mut cache = BlockCache::new();
        cache.insert(block(1, 0, 1));
        let a = BlockId::from_bytes([1u8; 32]);
        assert!(cache.traversable(&a, &a));
    }
}
