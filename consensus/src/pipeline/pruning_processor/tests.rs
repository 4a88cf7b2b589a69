use crate::consensus::test_consensus::TestConsensus;
use kestrel_consensus_core::{
    api::ConsensusApi,
    blockstatus::BlockStatus,
    config::{
        Config, ConfigBuilder,
        params::{BlockVersionSchedule, SIMNET_PARAMS},
    },
    errors::{consensus::ConsensusError, pruning::PruningImportError},
    multiset::MultisetExtensions,
};
use kestrel_hashes::Hash;
use kestrel_multiset::Multiset;

const CHAIN_LENGTH: u64 = 40;

/// k = 1, finality depth 5 and pruning depth 17, so a short chain is enough to move the pruning point
fn short_pruning_config(archival: bool) -> Config {
    let mut version = *SIMNET_PARAMS.block_version(0);
    version.ghostdag_k = 1;
    version.mergeset_size_limit = 2;
    version.finality_duration = 5 * version.target_time_per_block;
    version.pruning_multiplier = 1;
    let builder = ConfigBuilder::new(SIMNET_PARAMS)
        .skip_proof_of_work()
        .edit_consensus_params(move |p| p.block_versions = BlockVersionSchedule::single(version));
    if archival { builder.set_archival().build() } else { builder.build() }
}

fn mine_chain(consensus: &TestConsensus, length: u64) -> Hash {
    let mut tip = consensus.params().genesis_hash();
    for i in 1..=length {
        consensus.add_block_with_parents(i.into(), vec![tip]).unwrap();
        tip = i.into();
    }
    tip
}

fn pruning_point_multiset(consensus: &TestConsensus, pruning_point: Hash) -> Multiset {
    let mut multiset = Multiset::new();
    for (outpoint, entry) in consensus.get_pruning_point_utxos(pruning_point, None, 10_000).unwrap() {
        multiset.add_utxo(&outpoint, &entry);
    }
    multiset
}

#[test]
fn pruning_point_advances_and_prunes_bodies() {
    let config = short_pruning_config(false);
    let consensus = TestConsensus::new(&config);
    let genesis = config.genesis_hash();
    mine_chain(&consensus, CHAIN_LENGTH);

    // Virtual blue score 41 leaves chain blocks up to blue score 24 at pruning depth. Block 20 opens their highest
    // finality interval
    let pruning_point = consensus.get_pruning_point();
    assert_eq!(pruning_point, 20.into());
    assert!(consensus.is_chain_ancestor_of(genesis, pruning_point).unwrap());

    // Bodies below the pruning point are gone while their headers stay
    assert!(matches!(consensus.get_block(1.into()), Err(ConsensusError::BlockNotFound(_))));
    assert_eq!(consensus.get_block_status(1.into()), Some(BlockStatus::StatusHeaderOnly));
    assert!(consensus.get_header(1.into()).is_ok());

    // The pruning point itself and the blocks above it keep their bodies
    assert!(consensus.get_block(pruning_point).is_ok());
    assert!(consensus.get_block(CHAIN_LENGTH.into()).is_ok());

    // The stored pruning point UTXO set is the one its header commits to
    let header = consensus.get_header(pruning_point).unwrap();
    assert_eq!(pruning_point_multiset(&consensus, pruning_point).finalize(), header.utxo_commitment);

    // A stale expected pruning point is refused
    assert!(matches!(consensus.get_pruning_point_utxos(genesis, None, 10), Err(ConsensusError::UnexpectedPruningPoint)));

    // The proof walks the pruning point links down to genesis
    let proof = consensus.get_pruning_point_proof();
    assert_eq!(proof.first().unwrap().hash, genesis);
    assert_eq!(proof.last().unwrap().hash, pruning_point);
    assert!(consensus.validate_pruning_proof(&proof).is_ok());
}

#[test]
fn archival_node_keeps_bodies() {
    let config = short_pruning_config(true);
    let consensus = TestConsensus::new(&config);
    mine_chain(&consensus, CHAIN_LENGTH);

    assert_eq!(consensus.get_pruning_point(), 20.into());
    assert!(consensus.get_block(1.into()).is_ok());
    assert_eq!(consensus.get_block_status(1.into()), Some(BlockStatus::StatusUTXOValid));
}

#[test]
fn pruning_point_utxo_chunks_resume_after_outpoint() {
    let config = short_pruning_config(false);
    let consensus = TestConsensus::new(&config);
    mine_chain(&consensus, CHAIN_LENGTH);
    let pruning_point = consensus.get_pruning_point();

    let all = consensus.get_pruning_point_utxos(pruning_point, None, 10_000).unwrap();
    assert!(all.len() > 2);
    let first = consensus.get_pruning_point_utxos(pruning_point, None, 2).unwrap();
    assert_eq!(first.as_slice(), &all[..2]);
    let rest = consensus.get_pruning_point_utxos(pruning_point, Some(first[1].0), 10_000).unwrap();
    assert_eq!(rest.as_slice(), &all[2..]);
}

#[test]
fn utxo_set_import_errors() {
    let config = short_pruning_config(false);
    let consensus = TestConsensus::new(&config);
    mine_chain(&consensus, CHAIN_LENGTH);
    let pruning_point = consensus.get_pruning_point();
    let utxos = consensus.get_pruning_point_utxos(pruning_point, None, 10_000).unwrap();

    assert!(matches!(consensus.append_imported_pruning_point_utxos(&utxos), Err(PruningImportError::ImportNotStarted)));

    consensus.start_pruning_point_utxo_set_import().unwrap();
    let duplicated = vec![utxos[0].clone(), utxos[0].clone()];
    assert!(matches!(
        consensus.append_imported_pruning_point_utxos(&duplicated),
        Err(PruningImportError::DuplicateImportedOutpoint(_))
    ));

    // A partial set does not match the header commitment
    consensus.append_imported_pruning_point_utxos(&utxos[1..]).unwrap();
    assert!(matches!(
        consensus.finish_pruning_point_utxo_set_import(pruning_point),
        Err(PruningImportError::ImportedMultisetHashMismatch(..))
    ));

    // Outpoints of an earlier chunk are duplicates too
    assert!(matches!(
        consensus.append_imported_pruning_point_utxos(&utxos[1..2]),
        Err(PruningImportError::DuplicateImportedOutpoint(_))
    ));
}

#[test]
fn utxo_set_import_requires_pruning_point_header() {
    let source = TestConsensus::new(&short_pruning_config(false));
    mine_chain(&source, CHAIN_LENGTH);
    let pruning_point = source.get_pruning_point();
    let utxos = source.get_pruning_point_utxos(pruning_point, None, 10_000).unwrap();

    let target = TestConsensus::new(&short_pruning_config(false));
    target.start_pruning_point_utxo_set_import().unwrap();
    target.append_imported_pruning_point_utxos(&utxos).unwrap();
    assert!(matches!(
        target.finish_pruning_point_utxo_set_import(pruning_point),
        Err(PruningImportError::MissingPruningPointHeader(_))
    ));
}

#[test]
fn utxo_set_import_overrides_virtual() {
    let config = short_pruning_config(false);
    let consensus = TestConsensus::new(&config);
    let notifications = consensus.notification_root().subscribe();
    mine_chain(&consensus, CHAIN_LENGTH);
    let pruning_point = consensus.get_pruning_point();
    let utxos = consensus.get_pruning_point_utxos(pruning_point, None, 10_000).unwrap();

    consensus.start_pruning_point_utxo_set_import().unwrap();
    for chunk in utxos.chunks(3) {
        consensus.append_imported_pruning_point_utxos(chunk).unwrap();
    }
    consensus.finish_pruning_point_utxo_set_import(pruning_point).unwrap();

    // The virtual now sits right above the pruning point with its UTXO set
    assert_eq!(consensus.get_sink(), pruning_point);
    for (outpoint, entry) in utxos.iter() {
        assert_eq!(consensus.get_virtual_utxo(outpoint).as_ref(), Some(entry));
    }

    let mut overridden = false;
    while let Ok(notification) = notifications.try_recv() {
        if let kestrel_consensus_core::notify::ConsensusNotification::PruningPointUtxoSetOverride(n) = notification {
            assert_eq!(n.pruning_point, pruning_point);
            overridden = true;
        }
    }
    assert!(overridden);
}
