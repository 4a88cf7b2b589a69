use crate::{consensus::test_consensus::TestConsensus, model::stores::utxo_diffs::UtxoDiffsStoreReader};
use kestrel_consensus_core::{
    BlockHashSet,
    api::ConsensusApi,
    block::{Block, BlockTemplate},
    blockstatus::BlockStatus,
    coinbase::MinerData,
    config::{
        Config, ConfigBuilder,
        params::{BlockVersionParams, BlockVersionSchedule, SIMNET_PARAMS},
    },
    multiset::MultisetExtensions,
    notify::ConsensusNotification,
    tx::TransactionOutpoint,
    utxo::utxo_diff::UtxoDiff,
};
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;
use kestrel_txscript::standard::test_helpers::{create_transaction, op_true_script};
use std::collections::VecDeque;

struct TestContext {
    consensus: TestConsensus,
    current_templates: VecDeque<BlockTemplate>,
    current_tips: BlockHashSet,
}

impl TestContext {
    fn new(consensus: TestConsensus) -> Self {
        let genesis_hash = consensus.params().genesis_hash();
        Self { consensus, current_templates: Default::default(), current_tips: BlockHashSet::from_iter([genesis_hash]) }
    }

    fn build_block_template_row(&mut self, nonces: impl Iterator<Item = u64>) -> &mut Self {
        for nonce in nonces {
            self.build_block_template(nonce);
        }
        self
    }

    fn build_block_template(&mut self, nonce: u64) -> &mut Self {
        // Distinct extra data keeps the coinbase transactions of sibling templates apart
        let miner_data = MinerData::new(op_true_script(), nonce.to_le_bytes().to_vec());
        let mut t = self.consensus.build_block_template(miner_data, Default::default()).unwrap();
        t.block.header.nonce = nonce;
        t.block.header.finalize();
        self.current_templates.push_back(t);
        self
    }

    fn assert_row_parents(&mut self) -> &mut Self {
        for t in self.current_templates.iter() {
            assert_eq!(self.current_tips, BlockHashSet::from_iter(t.block.header.direct_parents().iter().copied()));
        }
        self
    }

    fn validate_and_insert_row(&mut self) -> &mut Self {
        self.current_tips.clear();
        while let Some(t) = self.current_templates.pop_front() {
            self.current_tips.insert(t.block.header.hash);
            self.validate_and_insert_block(t.block.to_immutable());
        }
        self
    }

    fn validate_and_insert_block(&mut self, block: Block) -> &mut Self {
        let status = self.consensus.validate_and_insert_block(block).unwrap();
        assert!(status.has_block_body());
        self
    }

    fn assert_tips(&mut self) -> &mut Self {
        assert_eq!(BlockHashSet::from_iter(self.consensus.get_tips()), self.current_tips);
        self
    }

    fn assert_tips_num(&mut self, expected_num: usize) -> &mut Self {
        assert_eq!(self.consensus.get_tips().len(), expected_num);
        self
    }

    fn assert_virtual_parents_subset(&mut self) -> &mut Self {
        assert!(self.consensus.get_virtual_parents().is_subset(&self.current_tips));
        self
    }

    fn assert_valid_utxo_sink(&mut self) -> &mut Self {
        let sink = self.consensus.get_sink();
        assert_eq!(self.consensus.get_block_status(sink), Some(BlockStatus::StatusUTXOValid));
        self
    }
}

fn simnet_config_with_version(edit: impl Fn(&mut BlockVersionParams)) -> Config {
    let mut version = *SIMNET_PARAMS.block_version(0);
    edit(&mut version);
    ConfigBuilder::new(SIMNET_PARAMS)
        .skip_proof_of_work()
        .edit_consensus_params(|p| p.block_versions = BlockVersionSchedule::single(version))
        .build()
}

#[test]
fn template_mining_sanity_test() {
    let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
    let mut ctx = TestContext::new(TestConsensus::new(&config));
    let rounds = 10;
    let width = 3;
    for _ in 0..rounds {
        ctx.build_block_template_row(0..width)
            .assert_row_parents()
            .validate_and_insert_row()
            .assert_tips()
            .assert_virtual_parents_subset()
            .assert_valid_utxo_sink();
    }
}

#[test]
fn antichain_merge_test() {
    let config = simnet_config_with_version(|v| {
        v.max_block_parents = 4;
        v.mergeset_size_limit = 10;
    });
    let mut ctx = TestContext::new(TestConsensus::new(&config));

    // Build a large 32-wide antichain
    ctx.build_block_template_row(0..32)
        .validate_and_insert_row()
        .assert_tips()
        .assert_virtual_parents_subset()
        .assert_valid_utxo_sink();
    assert!(ctx.consensus.get_virtual_parents().len() <= 4);

    // Mine a long enough chain s.t. the antichain is fully merged
    for _ in 0..32 {
        ctx.build_block_template_row(0..1).validate_and_insert_row().assert_valid_utxo_sink();
    }
    ctx.assert_tips_num(1);
}

#[test]
fn reorg_to_heavier_chain_test() {
    let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
    let consensus = TestConsensus::new(&config);
    let genesis = config.genesis_hash();
    let notifications = consensus.notification_root().subscribe();

    consensus.add_block_with_parents(1.into(), vec![genesis]).unwrap();
    consensus.add_block_with_parents(2.into(), vec![1.into()]).unwrap();
    assert_eq!(consensus.get_sink(), 2.into());

    // A competing chain from genesis which ends up heavier
    consensus.add_block_with_parents(11.into(), vec![genesis]).unwrap();
    consensus.add_block_with_parents(12.into(), vec![11.into()]).unwrap();
    consensus.add_block_with_parents(13.into(), vec![12.into()]).unwrap();
    assert_eq!(consensus.get_sink(), 13.into());

    for hash in [11u64, 12, 13] {
        assert!(consensus.is_chain_block(hash.into()).unwrap());
        assert_eq!(consensus.get_block_status(hash.into()), Some(BlockStatus::StatusUTXOValid));
    }
    for hash in [1u64, 2] {
        assert!(!consensus.is_chain_block(hash.into()).unwrap());
    }
    assert!(consensus.is_chain_ancestor_of(genesis, 13.into()).unwrap());
    assert!(!consensus.is_chain_ancestor_of(1.into(), 13.into()).unwrap());

    // The virtual merges the losing tip
    assert_eq!(consensus.get_virtual_parents(), BlockHashSet::from_iter([Hash::from(13u64), Hash::from(2u64)]));

    let mut removed = Vec::new();
    let mut added = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        if let ConsensusNotification::VirtualChainChanged(n) = notification {
            removed.extend(n.removed_chain_block_hashes.iter().copied());
            added.extend(n.added_chain_block_hashes.iter().copied());
        }
    }
    assert!(removed.contains(&2.into()) && removed.contains(&1.into()));
    assert_eq!(added.last().copied(), Some(13.into()));

    let path = consensus.get_virtual_chain_from_block(1.into()).unwrap();
    assert_eq!(path.removed, vec![Hash::from(1u64)]);
    assert_eq!(path.added, vec![Hash::from(11u64), 12.into(), 13.into()]);
}

#[test]
fn disqualified_chain_block_test() {
    let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
    let consensus = TestConsensus::new(&config);
    let genesis = config.genesis_hash();

    consensus.add_block_with_parents(1.into(), vec![genesis]).unwrap();

    // A block committing to a wrong UTXO set passes header and body validation but cannot join the chain
    let mut bad = consensus.build_block_with_parents(2.into(), vec![1.into()]);
    bad.header.utxo_commitment = Hash::from_u64_word(0xbad);
    let status = consensus.validate_and_insert_block(bad.to_immutable()).unwrap();
    assert_eq!(status, BlockStatus::StatusDisqualifiedFromChain);
    assert_eq!(consensus.get_sink(), 1.into());
    assert!(!consensus.is_chain_block(2.into()).unwrap());

    // The diff computed while verifying it is kept on the diff chain
    assert!(consensus.utxo_diffs_store.has(2.into()).unwrap());
    assert_eq!(consensus.utxo_diffs_store.get_diff_base(2.into()).unwrap(), Hash::from(1u64));

    // Its body is kept and it remains a DAG tip, but it is never merged by the virtual
    assert!(consensus.get_tips().contains(&2.into()));
    assert!(!consensus.get_virtual_parents().contains(&2.into()));

    // A valid sibling takes over as the sink
    consensus.add_block_with_parents(3.into(), vec![1.into()]).unwrap();
    assert_eq!(consensus.get_sink(), 3.into());
    assert_eq!(consensus.get_block_status(3.into()), Some(BlockStatus::StatusUTXOValid));
}

#[test]
fn spend_matured_coinbase_test() {
    let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
    let consensus = TestConsensus::new(&config);
    let maturity = config.coinbase_maturity;

    let mut tip = config.genesis_hash();
    for i in 1..=maturity + 5 {
        consensus.add_block_with_parents(i.into(), vec![tip]).unwrap();
        tip = i.into();
    }

    // The coinbase of block 3 pays the reward of block 2, which paid to an anyone-can-spend script
    let coinbase = consensus.get_block(3.into()).unwrap().transactions[0].clone();
    assert!(!coinbase.outputs.is_empty());
    let outpoint = TransactionOutpoint::new(coinbase.id(), 0);
    let entry = consensus.get_virtual_utxo(&outpoint).expect("the coinbase output is in the virtual UTXO set");
    assert!(entry.is_coinbase);

    let tx = create_transaction(&[outpoint], &[entry.amount - 1000]);
    let tx_id = tx.id();
    let next: Hash = (maturity + 6).into();
    let status = consensus.add_block_with_parents_and_transactions(next, vec![tip], vec![tx]).unwrap();
    assert!(status.is_utxo_valid_or_pending());
    assert_eq!(consensus.get_sink(), next);

    // The virtual accepts the transactions of its selected parent
    assert!(consensus.get_virtual_utxo(&outpoint).is_none());
    let created = consensus.get_virtual_utxo(&TransactionOutpoint::new(tx_id, 0)).unwrap();
    assert_eq!(created.amount, entry.amount - 1000);
    assert!(!created.is_coinbase);

    // A template on top cannot spend the same outpoint again
    let double_spend = create_transaction(&[outpoint], &[1]);
    assert!(consensus.build_block_template(TestConsensus::miner_data(1.into()), vec![double_spend]).is_err());
}

#[test]
fn header_only_blocks_test() {
    let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
    let consensus = TestConsensus::new(&config);
    let genesis = config.genesis_hash();

    consensus.add_header_only_block_with_parents(1.into(), vec![genesis]).unwrap();
    consensus.add_header_only_block_with_parents(2.into(), vec![1.into()]).unwrap();
    assert_eq!(consensus.get_block_status(2.into()), Some(BlockStatus::StatusHeaderOnly));
    assert_eq!(consensus.get_headers_selected_tip(), 2.into());

    // Headers do not move the virtual
    assert_eq!(consensus.get_sink(), genesis);
    assert_eq!(consensus.get_missing_block_body_hashes(2.into()).unwrap(), vec![Hash::from(1u64), 2.into()]);
}

/// Replays the diff chain of `block` on top of the empty genesis UTXO set and returns the commitment
/// of the resulting set
fn replayed_utxo_commitment(consensus: &TestConsensus, block: Hash) -> Hash {
    let genesis = consensus.params().genesis_hash();
    let mut utxo_set = UtxoDiff::default();
    for diff in consensus.virtual_processor.diff_chain(block, genesis) {
        utxo_set.with_diff_in_place(diff.as_ref()).unwrap();
    }
    // Relative to an empty base, a composed diff only adds
    assert!(utxo_set.remove.is_empty());

    let mut multiset = Multiset::new();
    for (outpoint, entry) in utxo_set.add.iter() {
        multiset.add_utxo(outpoint, entry);
    }
    multiset.finalize()
}

#[test]
fn utxo_diff_chain_test() {
    let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
    let consensus = TestConsensus::new(&config);
    let genesis = config.genesis_hash();

    // Chain 1-2 is resolved first and then reorged away by the heavier chain 11-12-13
    let blocks: [(u64, Hash); 5] = [(1, genesis), (2, 1.into()), (11, genesis), (12, 11.into()), (13, 12.into())];
    for (hash, parent) in blocks {
        consensus.add_block_with_parents(hash.into(), vec![parent]).unwrap();
    }
    assert_eq!(consensus.get_sink(), 13.into());

    let mut bad = consensus.build_block_with_parents(14.into(), vec![13.into()]);
    bad.header.utxo_commitment = Hash::from_u64_word(0xbad);
    assert_eq!(consensus.validate_and_insert_block(bad.to_immutable()).unwrap(), BlockStatus::StatusDisqualifiedFromChain);

    // Every resolved block, valid, reorged away or disqualified, holds a diff against its selected parent
    for (hash, parent) in blocks.into_iter().chain([(14, 13.into())]) {
        let hash = Hash::from(hash);
        assert!(consensus.utxo_diffs_store.has(hash).unwrap());
        assert_eq!(consensus.utxo_diffs_store.get_diff_base(hash).unwrap(), parent);
    }

    // Replaying the diffs of UTXO valid blocks down to genesis reproduces their commitments
    for (hash, _) in blocks {
        let hash = Hash::from(hash);
        assert_eq!(consensus.get_block_status(hash), Some(BlockStatus::StatusUTXOValid));
        assert_eq!(replayed_utxo_commitment(&consensus, hash), consensus.get_header(hash).unwrap().utxo_commitment);
    }
    assert_ne!(replayed_utxo_commitment(&consensus, 14.into()), Hash::from_u64_word(0xbad));
}
