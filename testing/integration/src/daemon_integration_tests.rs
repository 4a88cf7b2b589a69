use crate::common::{
    daemon::{Node, simnet_config},
    utils::wait_for,
};
use kestrel_consensus_core::{
    api::{ConsensusApi, DynConsensus},
    coinbase::MinerData,
    config::{
        Config,
        params::{BlockVersionSchedule, SIMNET_PARAMS},
    },
    notify::ConsensusNotification,
};
use kestrel_txscript::standard::test_helpers::op_true_script;
use std::time::Duration;

/// Polls of 100ms, adding up to the 30 seconds a peer is given to answer
const DEFAULT_TIMEOUT_POLLS: u64 = 300;

#[tokio::test(flavor = "multi_thread")]
async fn genesis_sync_and_relay_test() {
    kestrel_core::log::try_init_logger("info");

    let syncer = Node::start(simnet_config().build()).await;
    let syncee = Node::start(simnet_config().build()).await;
    let genesis = syncer.consensus().config().genesis_hash();

    syncee.connect(&syncer).await;

    // Both nodes hold only genesis, so there is nothing to sync
    assert!(!syncee.daemon().flow_context().is_ibd_running());
    assert_eq!(syncee.sink(), genesis);

    let hash = syncer.mine_block().await;
    wait_for(100, 50, || syncee.sink() == hash, "the relayed block did not reach the syncee").await;
    assert_eq!(syncer.sink(), syncee.sink());
    assert_eq!(syncee.block_count(), syncer.block_count());

    syncee.stop().await;
    syncer.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ibd_test() {
    kestrel_core::log::try_init_logger("info");

    let syncer = Node::start(simnet_config().build()).await;
    syncer.mine_blocks(100).await;

    let syncee = Node::start(simnet_config().build()).await;
    syncee.connect(&syncer).await;

    // The next relayed block is an orphan far from anything the syncee knows, which starts IBD
    let tip = syncer.mine_block().await;
    wait_for(100, DEFAULT_TIMEOUT_POLLS, || syncee.sink() == tip, "the syncee did not complete IBD in time").await;
    assert_eq!(syncee.block_count(), syncer.block_count());

    // Once synced, new blocks arrive by relay
    let tip = syncer.mine_block().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(syncee.sink(), tip);

    syncee.stop().await;
    syncer.stop().await;
}

/// k = 0 and a finality duration of two blocks, which puts the pruning point six blocks below the sink
fn short_pruning_config() -> Config {
    let mut version = *SIMNET_PARAMS.block_version(0);
    version.ghostdag_k = 0;
    version.finality_duration = 2 * version.target_time_per_block;
    simnet_config().edit_consensus_params(move |p| p.block_versions = BlockVersionSchedule::single(version)).build()
}

#[tokio::test(flavor = "multi_thread")]
async fn ibd_with_pruning_test() {
    kestrel_core::log::try_init_logger("info");

    let config = short_pruning_config();
    assert_eq!(config.pruning_depth(0), 6);

    let syncer = Node::start(config.clone()).await;
    syncer.mine_blocks(30).await;
    let syncer_pruning_point = syncer.consensus().get_pruning_point();
    assert_ne!(syncer_pruning_point, config.genesis_hash());

    let syncee = Node::start(config).await;
    let notifications = syncee.daemon().notification_root().subscribe();
    syncee.connect(&syncer).await;

    // The syncee shares nothing above the syncer pruning point, so it syncs from the pruning proof
    let tip = syncer.mine_block().await;
    wait_for(100, DEFAULT_TIMEOUT_POLLS, || syncee.sink() == tip, "the syncee did not complete IBD in time").await;

    let overridden = std::iter::from_fn(|| notifications.try_recv().ok())
        .find_map(|notification| match notification {
            ConsensusNotification::PruningPointUtxoSetOverride(notification) => Some(notification.pruning_point),
            _ => None,
        })
        .expect("the syncee imported the pruning point UTXO set");
    assert!(syncer.consensus().is_chain_ancestor_of(overridden, tip).unwrap());

    // The imported UTXO set is enough for mining right away
    let consensus: DynConsensus = syncee.consensus();
    let template = syncee
        .daemon()
        .mining_manager()
        .get_block_template(consensus, MinerData::new(op_true_script(), vec![]))
        .await
        .expect("a template can be built right after IBD");
    assert_eq!(template.selected_parent_hash, tip);

    let tip = syncer.mine_block().await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(syncee.sink(), tip);

    syncee.stop().await;
    syncer.stop().await;
}

const MERGE_DEPTH: u64 = 50;

fn merge_depth_config() -> Config {
    let mut version = *SIMNET_PARAMS.block_version(0);
    version.merge_depth = MERGE_DEPTH;
    simnet_config().edit_consensus_params(move |p| p.block_versions = BlockVersionSchedule::single(version)).build()
}

#[tokio::test(flavor = "multi_thread")]
async fn merge_depth_bound_test() {
    kestrel_core::log::try_init_logger("info");

    let config = merge_depth_config();
    let syncer = Node::start(config.clone()).await;
    let joiner = Node::start(config).await;

    // The joiner chain reaches well beyond merge depth, while the syncer side stays below the joiner merge depth root
    joiner.mine_blocks(MERGE_DEPTH + 32 + 1).await;
    syncer.mine_blocks(20).await;
    let joiner_sink = joiner.sink();
    let joiner_count = joiner.block_count();

    joiner.connect(&syncer).await;
    let far_tip = syncer.mine_block().await;
    let far_header = syncer.consensus().get_header(far_tip).unwrap();
    assert!(far_header.blue_work <= joiner.consensus().get_virtual_merge_depth_blue_work_threshold());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(joiner.block_count(), joiner_count);
    assert_eq!(joiner.sink(), joiner_sink);
    assert_eq!(joiner.consensus().get_block_status(far_tip), None);
    assert!(!joiner.daemon().flow_context().is_ibd_running());

    joiner.stop().await;
    syncer.stop().await;
}
