use super::{HeaderProcessingContext, HeaderProcessor};
use crate::model::services::reachability::ReachabilityService;
use kestrel_consensus_core::{
    errors::block::{BlockProcessResult, RuleError},
    header::Header,
};

impl HeaderProcessor {
    pub(super) fn pre_pow_validation(&self, ctx: &mut HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        self.check_parents_limit_for_version(ctx, header)?;
        self.check_pruning_violation(ctx)?;
        self.check_difficulty_and_daa_score(ctx, header)?;
        Ok(())
    }

    fn check_parents_limit_for_version(&self, ctx: &HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        let max_block_parents = ctx.version().max_block_parents as usize;
        if header.direct_parents().len() > max_block_parents {
            return Err(RuleError::TooManyParents(header.direct_parents().len(), max_block_parents));
        }
        Ok(())
    }

    fn check_pruning_violation(&self, ctx: &HeaderProcessingContext) -> BlockProcessResult<()> {
        // The new block must be in the future of the pruning point, that is at least one of its
        // parents is in the pruning point future (or the pruning point itself)
        if !self.reachability_service.is_dag_ancestor_of_any(ctx.pruning_point, &mut ctx.known_parents.iter().copied()) {
            return Err(RuleError::PrunedBlock(ctx.hash));
        }
        Ok(())
    }

    fn check_difficulty_and_daa_score(&self, ctx: &mut HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        let ghostdag_data = ctx.ghostdag_data().clone();
        let daa_window = self.window_manager.block_daa_window(&ghostdag_data);
        let skip_check = self.daa_score_check_skip_until.is_some_and(|until| header.daa_score <= until);

        if !skip_check && daa_window.daa_score != header.daa_score {
            return Err(RuleError::UnexpectedDAAScore(header.daa_score, daa_window.daa_score));
        }

        let expected_bits = self.window_manager.calculate_difficulty_bits(&ghostdag_data, &daa_window);
        if header.bits != expected_bits {
            return Err(RuleError::UnexpectedDifficulty(header.bits, expected_bits));
        }

        ctx.mergeset_non_daa = Some(daa_window.mergeset_non_daa);
        Ok(())
    }
}
