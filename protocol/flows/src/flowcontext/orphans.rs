use indexmap::{IndexMap, map::Entry::Occupied};
use kestrel_consensus::consensus::proxy::ConsensusProxy;
use kestrel_consensus_core::block::Block;
use kestrel_core::{debug, warn};
use kestrel_hashes::Hash;
use rand::Rng;
use std::collections::{HashSet, VecDeque};

use super::process_queue::ProcessQueue;

/// The maximal number of orphan blocks held in memory
pub const MAX_ORPHANS: usize = 600;

/// The depth below an orphan within which missing ancestors are fetched one by one through the
/// orphan pool. Orphans with a deeper gap are synced through IBD
pub const ORPHAN_RESOLUTION_RANGE: u32 = 5;

struct OrphanBlock {
    block: Block,

    /// Orphans which have this block as a direct parent. Loosely maintained: evicted children are not
    /// removed, so entries must be looked up before use
    children: HashSet<Hash>,
}

pub struct OrphanBlocksPool {
    /// An IndexMap allows cheap random eviction
    orphans: IndexMap<Hash, OrphanBlock>,
    max_orphans: usize,
}

impl OrphanBlocksPool {
    pub fn new(max_orphans: usize) -> Self {
        Self { orphans: IndexMap::with_capacity(max_orphans), max_orphans }
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    /// Adds the provided block to the orphan pool, evicting a random orphan if the pool is full
    pub fn add_orphan(&mut self, orphan_block: Block) {
        let orphan_hash = orphan_block.hash();
        if self.max_orphans == 0 || self.orphans.contains_key(&orphan_hash) {
            return;
        }
        if self.orphans.len() >= self.max_orphans {
            let index = rand::thread_rng().gen_range(0..self.orphans.len());
            if let Some((evicted, _)) = self.orphans.swap_remove_index(index) {
                debug!("Orphan blocks pool is full, evicted {}", evicted);
            }
        }
        for parent in orphan_block.header.direct_parents() {
            if let Some(entry) = self.orphans.get_mut(parent) {
                entry.children.insert(orphan_hash);
            }
        }
        let children = self.child_orphans(orphan_hash).collect();
        self.orphans.insert(orphan_hash, OrphanBlock { block: orphan_block, children });
    }

    pub fn is_known_orphan(&self, hash: Hash) -> bool {
        self.orphans.contains_key(&hash)
    }

    /// Returns the ancestors of `orphan` which are neither in the pool nor known to consensus with a body.
    /// These are the blocks to request next from the peer which relayed the orphan. Returns `None` if
    /// `orphan` is not in the pool
    pub async fn get_orphan_roots(&self, consensus: &ConsensusProxy, orphan: Hash) -> Option<Vec<Hash>> {
        if !self.orphans.contains_key(&orphan) {
            return None;
        }

        let mut roots = Vec::new();
        let mut queue = VecDeque::from([orphan]);
        let mut visited = HashSet::from([orphan]);
        while let Some(current) = queue.pop_front() {
            if let Some(entry) = self.orphans.get(&current) {
                for &parent in entry.block.header.direct_parents() {
                    if visited.insert(parent) {
                        queue.push_back(parent);
                    }
                }
            } else if !has_body(consensus, current).await {
                roots.push(current);
            }
        }
        Some(roots)
    }

    /// Inserts into consensus every orphan whose missing ancestry was completed by `root`, transitively.
    /// Returns the blocks which were accepted
    pub async fn unorphan_blocks(&mut self, consensus: &ConsensusProxy, root: Hash) -> Vec<Block> {
        // The root itself may have been an orphan which was added through another path
        let root_children = match self.orphans.swap_remove(&root) {
            Some(entry) => entry.children,
            None => self.child_orphans(root).collect(),
        };
        let mut process_queue: ProcessQueue<Hash> = root_children.into_iter().collect();
        let mut unorphaned = Vec::new();
        while let Some(orphan_hash) = process_queue.dequeue() {
            let Occupied(entry) = self.orphans.entry(orphan_hash) else { continue };
            let mut processable = true;
            for &parent in entry.get().block.header.direct_parents() {
                if !has_body(consensus, parent).await {
                    processable = false;
                    break;
                }
            }
            if !processable {
                continue;
            }
            let OrphanBlock { block, children } = entry.swap_remove();
            match consensus.async_validate_and_insert_block(block.clone()).await {
                Ok(_) => {
                    debug!("Unorphaned block {}", orphan_hash);
                    unorphaned.push(block);
                    process_queue.enqueue_chunk(children);
                }
                Err(err) => warn!("Validation failed for orphan block {}: {}", orphan_hash, err),
            }
        }
        unorphaned
    }

    fn child_orphans(&self, hash: Hash) -> impl Iterator<Item = Hash> + '_ {
        self.orphans
            .iter()
            .filter_map(move |(&orphan_hash, orphan)| orphan.block.header.direct_parents().contains(&hash).then_some(orphan_hash))
    }
}

async fn has_body(consensus: &ConsensusProxy, hash: Hash) -> bool {
    consensus.async_get_block_status(hash).await.is_some_and(|status| status.has_block_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus::consensus::test_consensus::TestConsensus;
    use kestrel_consensus_core::{
        api::ConsensusApi,
        config::{ConfigBuilder, params::SIMNET_PARAMS},
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn test_orphan_pool_basics() {
        let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
        let genesis = config.genesis_hash();

        // The source node mines a short chain and a side block, the target node receives them out of order
        let source = TestConsensus::new(&config);
        source.add_block_with_parents(1.into(), vec![genesis]).unwrap();
        source.add_block_with_parents(2.into(), vec![1.into()]).unwrap();
        source.add_block_with_parents(3.into(), vec![genesis]).unwrap();
        source.add_block_with_parents(4.into(), vec![2.into(), 3.into()]).unwrap();
        let block = |hash: u64| source.get_block(hash.into()).unwrap();

        let target = TestConsensus::new(&config);
        let consensus = ConsensusProxy::new(target.consensus_clone());
        let mut pool = OrphanBlocksPool::new(10);

        pool.add_orphan(block(4));
        pool.add_orphan(block(2));
        assert!(pool.is_known_orphan(4.into()));
        assert_eq!(pool.len(), 2);

        let mut roots = pool.get_orphan_roots(&consensus, 4.into()).await.unwrap();
        roots.sort();
        assert_eq!(roots, vec![Hash::from(1u64), Hash::from(3u64)]);
        assert!(pool.get_orphan_roots(&consensus, 1.into()).await.is_none());

        // Block 3 alone does not complete the ancestry of block 4
        target.validate_and_insert_block(block(3)).unwrap();
        assert!(pool.unorphan_blocks(&consensus, 3.into()).await.is_empty());
        assert_eq!(pool.len(), 2);

        target.validate_and_insert_block(block(1)).unwrap();
        let unorphaned = pool.unorphan_blocks(&consensus, 1.into()).await;
        assert_eq!(unorphaned.iter().map(|b| b.hash()).collect::<Vec<_>>(), vec![Hash::from(2u64), Hash::from(4u64)]);
        assert!(pool.is_empty());
        assert_eq!(target.get_sink(), 4.into());
    }

    #[test]
    fn test_orphan_pool_eviction() {
        let mut pool = OrphanBlocksPool::new(3);
        for i in 10..20u64 {
            pool.add_orphan(Block::from_precomputed_hash(i.into(), vec![1.into()]));
        }
        assert_eq!(pool.len(), 3);
        assert!(pool.is_known_orphan(19.into()));

        let mut disabled = OrphanBlocksPool::new(0);
        disabled.add_orphan(Block::from_precomputed_hash(10.into(), vec![1.into()]));
        assert!(disabled.is_empty());
    }
}
