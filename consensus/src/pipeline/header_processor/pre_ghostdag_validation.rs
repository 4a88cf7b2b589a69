use super::HeaderProcessor;
use crate::model::{services::reachability::ReachabilityService, stores::statuses::StatusesStoreReader};
use itertools::Itertools;
use kestrel_consensus_core::{
    BlockLevel,
    blockhash::BlockHashExtensions,
    blockstatus::BlockStatus::StatusInvalid,
    errors::block::{BlockProcessResult, RuleError, VecDisplay},
    header::Header,
};
use kestrel_core::time::unix_now;
use kestrel_database::prelude::StoreResultExt;
use kestrel_math::Uint256;
use kestrel_pow::{State, calc_block_level_from_pow_hash, pow_hash_value};

impl HeaderProcessor {
    /// Validates the header in isolation including pow check against header declared bits.
    /// Returns the block level as computed from pow state or a rule error if such was encountered
    pub(super) fn validate_header_in_isolation(&self, header: &Header) -> BlockProcessResult<BlockLevel> {
        self.check_header_version(header)?;
        self.check_block_timestamp_in_isolation(header)?;
        self.check_parents_limit(header)?;
        Self::check_parents_not_origin(header)?;
        self.check_difficulty_bits(header)?;
        self.check_pow_and_calc_block_level(header)
    }

    pub(super) fn validate_parent_relations(&self, header: &Header) -> BlockProcessResult<()> {
        self.check_parents_exist(header)?;
        self.check_parents_incest(header)?;
        Ok(())
    }

    /// Only versions present in the schedule are acceptable. Whether the version matches the
    /// block's position in the DAG is checked once the selected parent is known
    fn check_header_version(&self, header: &Header) -> BlockProcessResult<()> {
        if self.block_versions.by_version(header.version).is_none() {
            return Err(RuleError::WrongBlockVersion(header.version, self.block_versions.get(header.daa_score).version));
        }
        Ok(())
    }

    fn check_block_timestamp_in_isolation(&self, header: &Header) -> BlockProcessResult<()> {
        let tolerance = self.block_versions.get(header.daa_score).timestamp_deviation_tolerance();
        let max_block_time = unix_now() + tolerance;
        if header.timestamp > max_block_time {
            return Err(RuleError::TimeTooFarIntoTheFuture(header.timestamp, max_block_time));
        }
        Ok(())
    }

    fn check_parents_limit(&self, header: &Header) -> BlockProcessResult<()> {
        if header.direct_parents().is_empty() {
            return Err(RuleError::NoParents);
        }

        // The version specific bound is applied in context
        let max_block_parents = self.block_versions.max_block_parents() as usize;
        if header.direct_parents().len() > max_block_parents {
            return Err(RuleError::TooManyParents(header.direct_parents().len(), max_block_parents));
        }

        Ok(())
    }

    fn check_parents_not_origin(header: &Header) -> BlockProcessResult<()> {
        if header.direct_parents().iter().any(|&parent| parent.is_origin()) {
            return Err(RuleError::OriginParent);
        }

        Ok(())
    }

    fn check_difficulty_bits(&self, header: &Header) -> BlockProcessResult<()> {
        match Uint256::try_from_compact_target_bits(header.bits) {
            Some(target) if !target.is_zero() && target <= self.max_difficulty_target => Ok(()),
            _ => Err(RuleError::InvalidDifficultyBits(header.bits)),
        }
    }

    fn check_parents_exist(&self, header: &Header) -> BlockProcessResult<()> {
        let mut missing_parents = Vec::new();
        for parent in header.direct_parents() {
            match self.statuses_store.get(*parent).optional().expect("statuses store read") {
                None => missing_parents.push(*parent),
                Some(StatusInvalid) => {
                    return Err(RuleError::InvalidParent(*parent));
                }
                Some(_) => {}
            }
        }
        if !missing_parents.is_empty() {
            return Err(RuleError::MissingParents(VecDisplay(missing_parents)));
        }
        Ok(())
    }

    fn check_parents_incest(&self, header: &Header) -> BlockProcessResult<()> {
        let parents = header
            .direct_parents()
            .iter()
            .copied()
            .filter(|&parent| self.reachability_service.has_reachability_data(parent))
            .collect_vec();
        for parent_a in parents.iter() {
            for parent_b in parents.iter() {
                if parent_a == parent_b {
                    continue;
                }

                if self.reachability_service.is_dag_ancestor_of(*parent_a, *parent_b) {
                    return Err(RuleError::InvalidParentsRelation(*parent_a, *parent_b));
                }
            }
        }

        Ok(())
    }

    fn check_pow_and_calc_block_level(&self, header: &Header) -> BlockProcessResult<BlockLevel> {
        let state = State::new(header, self.pow_scores.variant(header.daa_score));
        let pow_hash = state.calculate_pow_hash(header.nonce);
        if self.skip_proof_of_work || pow_hash_value(pow_hash) <= state.target() {
            Ok(calc_block_level_from_pow_hash(pow_hash, self.max_block_level))
        } else {
            Err(RuleError::InvalidPoW)
        }
    }
}
