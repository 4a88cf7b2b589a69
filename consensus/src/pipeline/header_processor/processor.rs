use crate::{
    consensus::{
        services::{
            ConsensusServices, DbBlockDepthManager, DbGhostdagManager, DbParentsManager, DbPruningPointManager, DbWindowManager,
        },
        storage::ConsensusStorage,
    },
    model::{
        services::reachability::{MTReachabilityService, ReachabilityService},
        stores::{
            daa::{DaaStore, DbDaaStore},
            depth::{DbDepthStore, DepthStore},
            ghostdag::{DbGhostdagStore, GhostdagData, GhostdagStore, GhostdagStoreReader},
            headers::{DbHeadersStore, HeaderStore, HeaderStoreReader},
            headers_selected_tip::{DbHeadersSelectedTipStore, HeadersSelectedTipStore, HeadersSelectedTipStoreReader},
            pruning::{DbPruningStore, PruningStoreReader},
            reachability::{DbReachabilityStore, ReachabilityStoreReader, StagingReachabilityStore},
            relations::{DbRelationsStore, RelationsStore, RelationsStoreReader},
            statuses::{DbStatusesStore, StatusesStore, StatusesStoreReader},
        },
    },
    pipeline::ProcessingCounters,
    processes::{ghostdag::ordering::SortableBlock, reachability::inquirer as reachability},
};
use itertools::Itertools;
use kestrel_consensus_core::{
    BlockHashSet, BlockLevel, BlueWorkType,
    blockhash::{BlockHashExtensions, BlockHashes, ORIGIN},
    blockstatus::BlockStatus::{self, StatusHeaderOnly, StatusInvalid},
    config::{
        Config,
        genesis::GenesisBlock,
        params::{BlockVersionParams, BlockVersionSchedule, PowScores},
    },
    errors::block::{BlockProcessResult, RuleError},
    header::Header,
    trusted::ExternalGhostdagData,
};
use kestrel_core::{debug, trace};
use kestrel_database::prelude::{DB, DirectDbWriter, StagingArea, StoreResultExt, StoreResultUnitExt};
use kestrel_hashes::Hash;
use kestrel_math::Uint256;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::sync::{Arc, atomic::Ordering};

pub struct HeaderProcessingContext {
    pub hash: Hash,
    pub header: Arc<Header>,
    pub block_level: BlockLevel,
    pub pruning_point: Hash,
    /// Direct parents which are part of the locally known DAG. Parents below the pruning point are omitted
    pub known_parents: BlockHashes,
    pub trusted: bool,

    // Staging data
    pub ghostdag_data: Option<Arc<GhostdagData>>,
    pub version: Option<BlockVersionParams>,
    pub mergeset_non_daa: Option<BlockHashSet>,
    pub merge_depth_root: Option<Hash>,
    pub finality_point: Option<Hash>,
}

impl HeaderProcessingContext {
    pub fn new(header: Arc<Header>, block_level: BlockLevel, pruning_point: Hash, known_parents: BlockHashes, trusted: bool) -> Self {
        Self {
            hash: header.hash,
            header,
            block_level,
            pruning_point,
            known_parents,
            trusted,
            ghostdag_data: None,
            version: None,
            mergeset_non_daa: None,
            merge_depth_root: None,
            finality_point: None,
        }
    }

    /// Returns the GHOSTDAG data of this header.
    /// NOTE: is expected to be called only after GHOSTDAG computation was pushed into the context
    pub fn ghostdag_data(&self) -> &Arc<GhostdagData> {
        self.ghostdag_data.as_ref().expect("ghostdag data is computed before context validation")
    }

    pub fn version(&self) -> BlockVersionParams {
        self.version.expect("the block version is resolved together with ghostdag")
    }
}

pub struct HeaderProcessor {
    // Config
    pub(super) genesis: GenesisBlock,
    pub(super) genesis_hash: Hash,
    pub(super) block_versions: BlockVersionSchedule,
    pub(super) max_difficulty_target: Uint256,
    pub(super) daa_score_check_skip_until: Option<u64>,
    pub(super) skip_proof_of_work: bool,
    pub(super) skip_header_pruning_point_check: bool,
    pub(super) max_block_level: BlockLevel,
    pub(super) pow_scores: PowScores,

    // DB
    db: Arc<DB>,

    // Stores
    pub(super) statuses_store: Arc<DbStatusesStore>,
    pub(super) relations_store: Arc<DbRelationsStore>,
    reachability_store: Arc<RwLock<DbReachabilityStore>>,
    pub(super) ghostdag_store: Arc<DbGhostdagStore>,
    pub(super) headers_store: Arc<DbHeadersStore>,
    daa_excluded_store: Arc<DbDaaStore>,
    depth_store: Arc<DbDepthStore>,
    pub(super) pruning_point_store: Arc<RwLock<DbPruningStore>>,
    headers_selected_tip_store: Arc<RwLock<DbHeadersSelectedTipStore>>,

    // Managers and services
    pub(super) reachability_service: MTReachabilityService<DbReachabilityStore>,
    ghostdag_manager: DbGhostdagManager,
    pub(super) window_manager: DbWindowManager,
    pub(super) depth_manager: DbBlockDepthManager,
    pub(super) parents_manager: DbParentsManager,
    pub(super) pruning_point_manager: DbPruningPointManager,

    // Counters
    counters: Arc<ProcessingCounters>,
}

impl HeaderProcessor {
    pub fn new(
        config: &Config,
        storage: &Arc<ConsensusStorage>,
        services: &Arc<ConsensusServices>,
        counters: Arc<ProcessingCounters>,
    ) -> Self {
        Self {
            genesis: config.genesis.clone(),
            genesis_hash: config.genesis_hash(),
            block_versions: config.block_versions,
            max_difficulty_target: config.max_difficulty_target,
            daa_score_check_skip_until: config.daa_score_check_skip_until,
            skip_proof_of_work: config.skip_proof_of_work,
            skip_header_pruning_point_check: config.skip_header_pruning_point_check,
            max_block_level: config.max_block_level,
            pow_scores: config.pow_scores,

            db: storage.db.clone(),
            statuses_store: storage.statuses_store.clone(),
            relations_store: storage.relations_store.clone(),
            reachability_store: storage.reachability_store.clone(),
            ghostdag_store: storage.ghostdag_store.clone(),
            headers_store: storage.headers_store.clone(),
            daa_excluded_store: storage.daa_excluded_store.clone(),
            depth_store: storage.depth_store.clone(),
            pruning_point_store: storage.pruning_point_store.clone(),
            headers_selected_tip_store: storage.headers_selected_tip_store.clone(),

            reachability_service: services.reachability_service.clone(),
            ghostdag_manager: services.ghostdag_manager.clone(),
            window_manager: services.window_manager.clone(),
            depth_manager: services.depth_manager.clone(),
            parents_manager: services.parents_manager.clone(),
            pruning_point_manager: services.pruning_point_manager.clone(),

            counters,
        }
    }

    /// Validates and stores a header. Trusted headers come with GHOSTDAG data computed by the peer which sent them
    /// and skip the validations that require their full past.
    ///
    /// Returns the status of the block, which is `StatusHeaderOnly` for a new header
    pub fn process_header(&self, header: &Arc<Header>, trusted: Option<&ExternalGhostdagData>) -> BlockProcessResult<BlockStatus> {
        let status_option = self.statuses_store.get(header.hash).optional().expect("statuses store read");

        match status_option {
            Some(StatusInvalid) => return Err(RuleError::KnownInvalid),
            // Proof headers are stored without reachability data, so a trusted resubmission still has to enter the DAG
            Some(status) if trusted.is_none() || self.reachability_service.has_reachability_data(header.hash) => {
                return Ok(status);
            }
            _ => {}
        }

        let ctx = match trusted {
            None => self.validate_header(header)?,
            Some(ghostdag) => self.validate_trusted_header(header, ghostdag)?,
        };

        let status = self.commit_header(ctx);

        self.counters.header_counts.fetch_add(1, Ordering::Relaxed);
        self.counters.dep_counts.fetch_add(header.direct_parents().len() as u64, Ordering::Relaxed);
        trace!("Processed header {}", header.hash);

        Ok(status)
    }

    /// Runs full ordinary header validation
    fn validate_header(&self, header: &Arc<Header>) -> BlockProcessResult<HeaderProcessingContext> {
        let block_level = self.validate_header_in_isolation(header)?;
        self.validate_parent_relations(header)?;
        let mut ctx = self.build_processing_context(header, block_level, false)?;
        let res = self
            .ghostdag(&mut ctx)
            .and_then(|_| self.pre_pow_validation(&mut ctx, header))
            .and_then(|_| self.post_pow_validation(&mut ctx, header));
        if let Err(err) = res {
            if !matches!(err, RuleError::PrunedBlock(_) | RuleError::MissingParents(_)) {
                debug!("Header {} failed context validation: {}", ctx.hash, err);
                self.statuses_store.set(DirectDbWriter::new(&self.db), ctx.hash, StatusInvalid).expect("statuses store write");
            }
            return Err(err);
        }
        Ok(ctx)
    }

    /// Trusted headers are checked in isolation only. Their GHOSTDAG data is taken from the store if it was
    /// already written by proof application, otherwise from the peer
    fn validate_trusted_header(
        &self,
        header: &Arc<Header>,
        ghostdag: &ExternalGhostdagData,
    ) -> BlockProcessResult<HeaderProcessingContext> {
        let block_level = self.validate_header_in_isolation(header)?;
        let mut ctx = self.build_processing_context(header, block_level, true)?;
        let ghostdag_data = match self.ghostdag_store.get_data(ctx.hash).optional().expect("ghostdag store read") {
            Some(data) => data,
            None => Arc::new(GhostdagData::from(ghostdag.clone())),
        };
        ctx.ghostdag_data = Some(ghostdag_data);
        ctx.version = Some(*self.block_versions.get(header.daa_score));
        ctx.mergeset_non_daa = Some(Default::default());
        ctx.merge_depth_root = Some(ORIGIN);
        ctx.finality_point = Some(ORIGIN);
        Ok(ctx)
    }

    fn build_processing_context(
        &self,
        header: &Arc<Header>,
        block_level: BlockLevel,
        trusted: bool,
    ) -> BlockProcessResult<HeaderProcessingContext> {
        let known_parents = header
            .direct_parents()
            .iter()
            .copied()
            .filter(|&parent| self.relations_store.has(parent).expect("relations store read"))
            .collect_vec();
        if known_parents.is_empty() && !trusted {
            return Err(RuleError::PrunedBlock(header.hash));
        }
        let pruning_point = self.pruning_point_store.read().pruning_point().expect("pruning point is initialized");
        Ok(HeaderProcessingContext::new(header.clone(), block_level, pruning_point, Arc::new(known_parents), trusted))
    }

    /// Runs GHOSTDAG over the known parents and resolves the block version governing the new block
    fn ghostdag(&self, ctx: &mut HeaderProcessingContext) -> BlockProcessResult<()> {
        let selected_parent = self.ghostdag_manager.find_selected_parent(ctx.known_parents.iter().copied());
        let version = self.window_manager.block_version_for_selected_parent(selected_parent);
        if ctx.header.version != version.version {
            return Err(RuleError::WrongBlockVersion(ctx.header.version, version.version));
        }

        let mut ghostdag_data = self.ghostdag_manager.ghostdag(&ctx.known_parents, version.ghostdag_k);
        self.ghostdag_manager.add_own_work(&mut ghostdag_data, ctx.header.bits);
        ctx.ghostdag_data = Some(Arc::new(ghostdag_data));
        ctx.version = Some(version);
        Ok(())
    }

    fn commit_header(&self, ctx: HeaderProcessingContext) -> BlockStatus {
        let ghostdag_data = ctx.ghostdag_data();
        let area = StagingArea::new();

        // Write to append only stores: this requires no lock and hence done first
        if !self.ghostdag_store.has(ctx.hash).expect("ghostdag store read") {
            // The data might have been already written when applying the pruning proof
            self.ghostdag_store.insert(&area, ctx.hash, ghostdag_data.clone(), ctx.trusted).expect("ghostdag store write");
        }
        if !self.headers_store.has(ctx.hash).expect("headers store read") {
            self.headers_store.insert(&area, ctx.hash, ctx.header.clone(), ctx.block_level).expect("headers store write");
        }
        let mergeset_non_daa = Arc::new(ctx.mergeset_non_daa.clone().unwrap_or_default());
        self.daa_excluded_store.insert(&area, ctx.hash, mergeset_non_daa).idempotent().expect("daa store write");
        if let (Some(merge_depth_root), Some(finality_point)) = (ctx.merge_depth_root, ctx.finality_point) {
            self.depth_store.insert(&area, ctx.hash, merge_depth_root, finality_point).idempotent().expect("depth store write");
        }
        let relations_parents = if ctx.known_parents.is_empty() { Arc::new(vec![ORIGIN]) } else { ctx.known_parents.clone() };
        self.relations_store.insert(&area, ctx.hash, relations_parents).idempotent().expect("relations store write");

        // An upgradable read serializes staging reachability operations while still allowing concurrent readers
        let reachability_read = self.reachability_store.upgradable_read();
        let mut staging = StagingReachabilityStore::new(&reachability_read, &area);
        if !staging.has(ctx.hash).expect("reachability store read") {
            let reachability_parent = if staging.has(ghostdag_data.selected_parent).expect("reachability store read") {
                ghostdag_data.selected_parent
            } else {
                ORIGIN
            };
            let mergeset = ghostdag_data
                .unordered_mergeset_without_selected_parent()
                .filter(|&hash| staging.has(hash).expect("reachability store read"))
                .collect_vec();
            reachability::add_block(&mut staging, ctx.hash, reachability_parent, &mut mergeset.into_iter())
                .expect("reachability insertion of a new block");
        }

        // Non-append only stores need to use write locks.
        // Note we need to keep the lock write guards until the area is committed.
        let mut hst_write = self.headers_selected_tip_store.write();
        let prev_hst = hst_write.get().expect("headers selected tip is initialized");
        let new_tip = SortableBlock::new(ctx.hash, ghostdag_data.blue_work);
        // Blocks which do not have the pruning point on their chain cannot serve as a sync target
        if (prev_hst.hash.is_origin() || new_tip > prev_hst)
            && reachability::is_chain_ancestor_of(&staging, ctx.pruning_point, ctx.hash).unwrap_or(false) {
            reachability::hint_virtual_selected_parent(&mut staging, ctx.hash).expect("reachability reindex");
            hst_write.set(&area, new_tip).expect("headers selected tip write");
        }

        let status = match self.statuses_store.get(ctx.hash).optional().expect("statuses store read") {
            Some(status) => status,
            None => {
                self.statuses_store.set(&area, ctx.hash, StatusHeaderOnly).expect("statuses store write");
                StatusHeaderOnly
            }
        };

        // Only at this brief moment the reachability store is locked for reads
        let reachability_write = RwLockUpgradableReadGuard::upgrade(reachability_read);
        area.commit_to_db(&self.db).expect("header commit");

        drop(reachability_write);
        drop(hst_write);
        status
    }

    /// Writes the genesis header together with its GHOSTDAG and reachability data
    pub fn process_genesis(&self) {
        let genesis_header = Arc::new(self.genesis.build_header());
        let mut ctx =
            HeaderProcessingContext::new(genesis_header, self.max_block_level, self.genesis_hash, Arc::new(Vec::new()), false);
        ctx.ghostdag_data = Some(Arc::new(self.ghostdag_manager.genesis_ghostdag_data()));
        ctx.version = Some(*self.block_versions.get(self.genesis.daa_score));
        ctx.mergeset_non_daa = Some(Default::default());
        ctx.merge_depth_root = Some(ORIGIN);
        ctx.finality_point = Some(ORIGIN);
        self.commit_header(ctx);
        debug!("Committed the genesis header {}", self.genesis_hash);
    }

    /// Inserts the `ORIGIN` root which every block without a known past hangs from
    pub fn init(&self) {
        if self.relations_store.has(ORIGIN).expect("relations store read") {
            return;
        }

        let area = StagingArea::new();
        self.relations_store.insert(&area, ORIGIN, BlockHashes::new(vec![])).expect("relations store write");
        self.ghostdag_store
            .insert(&area, ORIGIN, Arc::new(self.ghostdag_manager.origin_ghostdag_data()), false)
            .idempotent()
            .expect("ghostdag store write");
        let mut hst_write = self.headers_selected_tip_store.write();
        hst_write.set(&area, SortableBlock::new(ORIGIN, BlueWorkType::ZERO)).expect("headers selected tip write");
        area.commit_to_db(&self.db).expect("origin commit");
        drop(hst_write);
    }
}
