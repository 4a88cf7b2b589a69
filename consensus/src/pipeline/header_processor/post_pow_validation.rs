use super::{HeaderProcessingContext, HeaderProcessor};
use kestrel_consensus_core::{
    errors::block::{BlockProcessResult, RuleError, TwoDimVecDisplay},
    header::Header,
};

impl HeaderProcessor {
    pub(super) fn post_pow_validation(&self, ctx: &mut HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        self.check_blue_score(ctx, header)?;
        self.check_blue_work(ctx, header)?;
        self.check_median_timestamp(ctx, header)?;
        self.check_merge_size_limit(ctx)?;
        self.calc_depth_points(ctx, header);
        self.check_indirect_parents(header)?;
        self.check_pruning_point(ctx, header)?;
        Ok(())
    }

    /// Headers may not claim more than the computed score. Any remaining mismatch disqualifies
    /// the block once it is verified as a chain candidate
    fn check_blue_score(&self, ctx: &HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        let gd_blue_score = ctx.ghostdag_data().blue_score;
        if header.blue_score > gd_blue_score {
            return Err(RuleError::UnexpectedBlueScore(header.blue_score, gd_blue_score));
        }
        Ok(())
    }

    fn check_blue_work(&self, ctx: &HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        let gd_blue_work = ctx.ghostdag_data().blue_work;
        if header.blue_work > gd_blue_work {
            return Err(RuleError::UnexpectedBlueWork(header.blue_work, gd_blue_work));
        }
        Ok(())
    }

    fn check_median_timestamp(&self, ctx: &HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        let (past_median_time, _) = self.window_manager.calc_past_median_time(ctx.ghostdag_data());
        if header.timestamp <= past_median_time {
            return Err(RuleError::TimeTooOld(header.timestamp, past_median_time));
        }
        Ok(())
    }

    fn check_merge_size_limit(&self, ctx: &HeaderProcessingContext) -> BlockProcessResult<()> {
        let mergeset_size = ctx.ghostdag_data().mergeset_size();
        let limit = ctx.version().mergeset_size_limit;
        if mergeset_size as u64 > limit {
            return Err(RuleError::ViolatingMergeLimit(mergeset_size, limit));
        }
        Ok(())
    }

    /// The merge depth bound itself is enforced once the body arrives
    fn calc_depth_points(&self, ctx: &mut HeaderProcessingContext, header: &Header) {
        let ghostdag_data = ctx.ghostdag_data();
        let merge_depth_root = self.depth_manager.calc_merge_depth_root(ghostdag_data, header.daa_score, ctx.pruning_point);
        let finality_point = self.depth_manager.calc_finality_point(ghostdag_data, header.daa_score, ctx.pruning_point);
        ctx.merge_depth_root = Some(merge_depth_root);
        ctx.finality_point = Some(finality_point);
    }

    fn check_indirect_parents(&self, header: &Header) -> BlockProcessResult<()> {
        let expected = self.parents_manager.calc_block_parents(header.direct_parents());
        if !self.parents_manager.parents_match(&expected, &header.parents_by_level) {
            return Err(RuleError::UnexpectedParents(TwoDimVecDisplay(expected), TwoDimVecDisplay(header.parents_by_level.clone())));
        }
        Ok(())
    }

    fn check_pruning_point(&self, ctx: &HeaderProcessingContext, header: &Header) -> BlockProcessResult<()> {
        if self.skip_header_pruning_point_check {
            return Ok(());
        }
        // An unknown expectation means the chain right above an imported pruning point, which was vouched for by the proof
        if let Some(expected) =
            self.pruning_point_manager.expected_header_pruning_point(ctx.ghostdag_data().to_compact(), header.daa_score)
            && expected != header.pruning_point
        {
            return Err(RuleError::UnexpectedPruningPoint(expected, header.pruning_point));
        }
        Ok(())
    }
}
