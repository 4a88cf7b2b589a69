use std::collections::HashSet;

use super::BlockBodyProcessor;
use kestrel_consensus_core::{
    block::Block,
    errors::block::{BlockProcessResult, RuleError},
    merkle::calc_hash_merkle_root,
    tx::TransactionOutpoint,
};

impl BlockBodyProcessor {
    /// Runs all context free body checks and returns the block mass
    pub fn validate_body_in_isolation(&self, block: &Block) -> BlockProcessResult<u64> {
        Self::check_has_transactions(block)?;
        Self::check_hash_merkle_root(block)?;
        Self::check_only_one_coinbase(block)?;
        self.check_transactions_in_isolation(block)?;
        let mass = self.check_block_mass(block)?;
        Self::check_duplicate_transactions(block)?;
        Self::check_block_double_spends(block)?;
        Self::check_no_chained_transactions(block)?;
        Ok(mass)
    }

    fn check_has_transactions(block: &Block) -> BlockProcessResult<()> {
        // Header only blocks are not expected here, but the check keeps the coinbase indexing below safe
        if block.transactions.is_empty() {
            return Err(RuleError::NoTransactions);
        }
        Ok(())
    }

    fn check_hash_merkle_root(block: &Block) -> BlockProcessResult<()> {
        let calculated = calc_hash_merkle_root(block.transactions.iter());
        if calculated != block.header.hash_merkle_root {
            return Err(RuleError::BadMerkleRoot(block.header.hash_merkle_root, calculated));
        }
        Ok(())
    }

    fn check_only_one_coinbase(block: &Block) -> BlockProcessResult<()> {
        if !block.transactions[0].is_coinbase() {
            return Err(RuleError::FirstTxNotCoinbase);
        }

        if let Some(i) = block.transactions[1..].iter().position(|tx| tx.is_coinbase()) {
            return Err(RuleError::MultipleCoinbases(i + 1));
        }

        Ok(())
    }

    fn check_transactions_in_isolation(&self, block: &Block) -> BlockProcessResult<()> {
        for tx in block.transactions.iter() {
            if let Err(err) = self.transaction_validator.validate_tx_in_isolation(tx, block.header.daa_score) {
                return Err(RuleError::TxInIsolationValidationFailed(tx.id(), err));
            }
        }
        Ok(())
    }

    fn check_block_mass(&self, block: &Block) -> BlockProcessResult<u64> {
        let max_block_mass = match self.block_versions.by_version(block.header.version) {
            Some(version) => version.max_block_mass,
            None => self.block_versions.get(block.header.daa_score).max_block_mass,
        };
        let mass_calculator = self.transaction_validator.mass_calculator();
        let mut total_mass: u64 = 0;
        for tx in block.transactions.iter() {
            total_mass = total_mass.saturating_add(mass_calculator.calc_tx_mass(tx));
            if total_mass > max_block_mass {
                return Err(RuleError::ExceedsMassLimit(max_block_mass));
            }
        }
        Ok(total_mass)
    }

    fn check_block_double_spends(block: &Block) -> BlockProcessResult<()> {
        let mut existing = HashSet::new();
        for input in block.transactions.iter().flat_map(|tx| &tx.inputs) {
            if !existing.insert(input.previous_outpoint) {
                return Err(RuleError::DoubleSpendInSameBlock(input.previous_outpoint));
            }
        }
        Ok(())
    }

    fn check_no_chained_transactions(block: &Block) -> BlockProcessResult<()> {
        let mut block_created_outpoints = HashSet::new();
        for tx in block.transactions.iter() {
            for index in 0..tx.outputs.len() {
                block_created_outpoints.insert(TransactionOutpoint::new(tx.id(), index as u32));
            }
        }

        for input in block.transactions.iter().flat_map(|tx| &tx.inputs) {
            if block_created_outpoints.contains(&input.previous_outpoint) {
                return Err(RuleError::ChainedTransaction(input.previous_outpoint));
            }
        }
        Ok(())
    }

    fn check_duplicate_transactions(block: &Block) -> BlockProcessResult<()> {
        let mut ids = HashSet::new();
        for tx in block.transactions.iter() {
            if !ids.insert(tx.id()) {
                return Err(RuleError::DuplicateTransactions(tx.id()));
            }
        }
        Ok(())
    }
}
