use crate::common::daemon::{Node, mempool_config, simnet_config};
use kestrel_consensus_core::{api::ConsensusApi, tx::TransactionOutpoint};
use kestrel_mining::mempool::{config::DEFAULT_COMPOUND_RATE_LIMIT, errors::RejectCode, tx::Orphan};
use kestrel_txscript::standard::test_helpers::create_transaction;
use std::time::Duration;

const RATE_LIMIT_WINDOW_MILLISECONDS: u64 = 2_000;
const COMPOUND_INPUTS: usize = 10;
const COMPOUND_TRANSACTIONS: usize = DEFAULT_COMPOUND_RATE_LIMIT + 2;
const FEE: u64 = 100_000;
/// Covers the minimum relay fee once per extra output of the fan-out
const FAN_OUT_FEE: u64 = 10_000_000;

#[tokio::test(flavor = "multi_thread")]
async fn compound_rate_limit_test() {
    kestrel_core::log::try_init_logger("info");

    let config = simnet_config().build();
    let mempool_config = mempool_config(&config).with_compound_rate_limit(DEFAULT_COMPOUND_RATE_LIMIT, RATE_LIMIT_WINDOW_MILLISECONDS);
    let maturity = config.coinbase_maturity;
    let node = Node::start_with_mempool_config(config, mempool_config).await;

    // The coinbase of the third block pays the anyone-can-spend reward of the second one
    let mined = node.mine_blocks(maturity + 5).await;
    let coinbase = node.consensus().get_block(mined[2]).unwrap().transactions[0].clone();
    let coinbase_outpoint = TransactionOutpoint::new(coinbase.id(), 0);
    let coinbase_entry = node.consensus().get_virtual_utxo(&coinbase_outpoint).expect("the coinbase output is spendable");

    // Fan the reward out into enough outputs to fund all compound transactions from the same script
    let output_count = COMPOUND_TRANSACTIONS * COMPOUND_INPUTS;
    let value = (coinbase_entry.amount - FAN_OUT_FEE) / output_count as u64;
    let fan_out = create_transaction(&[coinbase_outpoint], &vec![value; output_count]);
    let fan_out_id = fan_out.id();
    node.daemon().flow_context().add_transaction(fan_out, Orphan::Forbidden).await.unwrap();
    node.mine_block().await;
    let outpoints = (0..output_count as u32).map(|index| TransactionOutpoint::new(fan_out_id, index)).collect::<Vec<_>>();
    assert!(node.consensus().get_virtual_utxo(&outpoints[0]).is_some());

    let mut compound_transactions =
        outpoints.chunks(COMPOUND_INPUTS).map(|chunk| create_transaction(chunk, &[value * chunk.len() as u64 - FEE]));

    for _ in 0..DEFAULT_COMPOUND_RATE_LIMIT {
        node.submit_transaction(compound_transactions.next().unwrap()).await.unwrap();
    }
    let rejected = compound_transactions.next().unwrap();
    let err = node.submit_transaction(rejected.clone()).await.unwrap_err();
    assert_eq!(err.reject_code(), Some(RejectCode::RateLimited));

    // After a quiet window the same sender is admitted again
    tokio::time::sleep(Duration::from_millis(RATE_LIMIT_WINDOW_MILLISECONDS + 500)).await;
    node.submit_transaction(rejected).await.unwrap();
    node.submit_transaction(compound_transactions.next().unwrap()).await.unwrap();
    assert_eq!(node.daemon().mining_manager().transaction_count(true, false).await, COMPOUND_TRANSACTIONS);

    node.stop().await;
}
