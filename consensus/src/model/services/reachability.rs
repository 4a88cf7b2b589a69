use std::sync::Arc;

use kestrel_consensus_core::blockhash::ORIGIN;
use kestrel_hashes::Hash;
use parking_lot::RwLock;

use crate::model::stores::reachability::ReachabilityStoreReader;
use crate::processes::reachability::{Result, inquirer};

pub trait ReachabilityService {
    fn is_chain_ancestor_of(&self, this: Hash, queried: Hash) -> bool;
    fn is_dag_ancestor_of_result(&self, this: Hash, queried: Hash) -> Result<bool>;
    fn is_dag_ancestor_of(&self, this: Hash, queried: Hash) -> bool;
    fn is_dag_ancestor_of_any(&self, this: Hash, queried: &mut impl Iterator<Item = Hash>) -> bool;
    fn is_any_dag_ancestor(&self, list: &mut impl Iterator<Item = Hash>, queried: Hash) -> bool;
    fn is_any_dag_ancestor_result(&self, list: &mut impl Iterator<Item = Hash>, queried: Hash) -> Result<bool>;
    fn get_next_chain_ancestor(&self, descendant: Hash, ancestor: Hash) -> Hash;
    fn has_reachability_data(&self, hash: Hash) -> bool;
}

/// Multi-threaded reachability service imp
#[derive(Clone)]
pub struct MTReachabilityService<T: ReachabilityStoreReader> {
    store: Arc<RwLock<T>>,
}

impl<T: ReachabilityStoreReader> MTReachabilityService<T> {
    pub fn new(store: Arc<RwLock<T>>) -> Self {
        Self { store }
    }
}

impl<T: ReachabilityStoreReader> ReachabilityService for MTReachabilityService<T> {
    fn is_chain_ancestor_of(&self, this: Hash, queried: Hash) -> bool {
        let read_guard = self.store.read();
        inquirer::is_chain_ancestor_of(&*read_guard, this, queried).expect("chain queries are made on known blocks")
    }

    fn is_dag_ancestor_of_result(&self, this: Hash, queried: Hash) -> Result<bool> {
        let read_guard = self.store.read();
        inquirer::is_dag_ancestor_of(&*read_guard, this, queried)
    }

    fn is_dag_ancestor_of(&self, this: Hash, queried: Hash) -> bool {
        self.is_dag_ancestor_of_result(this, queried).expect("dag queries are made on known blocks")
    }

    fn is_dag_ancestor_of_any(&self, this: Hash, queried: &mut impl Iterator<Item = Hash>) -> bool {
        let read_guard = self.store.read();
        queried.any(|hash| inquirer::is_dag_ancestor_of(&*read_guard, this, hash).expect("dag queries are made on known blocks"))
    }

    fn is_any_dag_ancestor(&self, list: &mut impl Iterator<Item = Hash>, queried: Hash) -> bool {
        self.is_any_dag_ancestor_result(list, queried).expect("dag queries are made on known blocks")
    }

    fn is_any_dag_ancestor_result(&self, list: &mut impl Iterator<Item = Hash>, queried: Hash) -> Result<bool> {
        let read_guard = self.store.read();
        for hash in list {
            if inquirer::is_dag_ancestor_of(&*read_guard, hash, queried)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn get_next_chain_ancestor(&self, descendant: Hash, ancestor: Hash) -> Hash {
        let read_guard = self.store.read();
        inquirer::get_next_chain_ancestor(&*read_guard, descendant, ancestor)
            .expect("ancestor is a strict chain ancestor of descendant")
    }

    fn has_reachability_data(&self, hash: Hash) -> bool {
        self.store.read().has(hash).unwrap_or(false)
    }
}

impl<T: ReachabilityStoreReader> MTReachabilityService<T> {
    /// Returns a backward iterator following the reachability tree chain up to (excluding) ORIGIN
    pub fn default_backward_chain_iterator(&self, from: Hash) -> BackwardChainIterator<T> {
        BackwardChainIterator { store: self.store.clone(), current: Some(from) }
    }

    /// Returns a forward iterator walking up the chain-selection tree from `from_ancestor`
    /// to `to_descendant`, where `to_descendant` is included if `inclusive` is set to true.
    ///
    /// The caller is expected to verify that `from_ancestor` is indeed a chain ancestor of
    /// `to_descendant`, otherwise the iterator stops early
    pub fn forward_chain_iterator(&self, from_ancestor: Hash, to_descendant: Hash, inclusive: bool) -> ForwardChainIterator<T> {
        ForwardChainIterator { store: self.store.clone(), current: Some(from_ancestor), descendant: to_descendant, inclusive }
    }
}

/// Iterates the reachability tree parents of a block, starting with the block itself
pub struct BackwardChainIterator<T: ReachabilityStoreReader> {
    store: Arc<RwLock<T>>,
    current: Option<Hash>,
}

impl<T: ReachabilityStoreReader> Iterator for BackwardChainIterator<T> {
    type Item = Hash;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        if current == ORIGIN {
            self.current = None;
            return None;
        }
        self.current = self.store.read().get_parent(current).ok();
        Some(current)
    }
}

pub struct ForwardChainIterator<T: ReachabilityStoreReader> {
    store: Arc<RwLock<T>>,
    current: Option<Hash>,
    descendant: Hash,
    inclusive: bool,
}

impl<T: ReachabilityStoreReader> Iterator for ForwardChainIterator<T> {
    type Item = Hash;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        if current == self.descendant {
            self.current = None;
            return if self.inclusive { Some(current) } else { None };
        }
        self.current = inquirer::get_next_chain_ancestor(&*self.store.read(), self.descendant, current).ok();
        Some(current)
    }
}
