use crate::{
    MiningCounters,
    mempool::{
        Mempool,
        config::Config,
        errors::{RuleError, RuleResult},
        tx::{Orphan, Priority},
    },
    testutils::consensus_mock::ConsensusMock,
};
use kestrel_consensus_core::{
    api::ConsensusApi,
    constants::TX_VERSION,
    subnets::SUBNETWORK_ID_NATIVE,
    tx::{MutableTransaction, Transaction, TransactionInput, TransactionOutpoint, TransactionOutput, UtxoEntry},
};
use kestrel_hashes::Hash;
use kestrel_txscript::standard::test_helpers::op_true_script;
use std::sync::Arc;

const UTXO_AMOUNT: u64 = 100_000;
const FEE: u64 = 1_000;

fn mempool(config: Config) -> Mempool {
    Mempool::new(Arc::new(config), Arc::new(MiningCounters::default()))
}

fn transaction(outpoints: &[TransactionOutpoint], total_in: u64) -> Transaction {
    let inputs = outpoints.iter().map(|&outpoint| TransactionInput::new(outpoint, vec![], 0, 1)).collect();
    Transaction::new(
        TX_VERSION,
        inputs,
        vec![TransactionOutput::new(total_in - FEE, op_true_script())],
        0,
        SUBNETWORK_ID_NATIVE,
        0,
        vec![],
    )
}

fn funded(consensus: &ConsensusMock, seed: u64) -> Transaction {
    let outpoint = TransactionOutpoint::new(Hash::from_u64_word(seed), 0);
    consensus.add_utxo(outpoint, UtxoEntry::new(UTXO_AMOUNT, op_true_script(), 0, false));
    transaction(&[outpoint], UTXO_AMOUNT)
}

/// Runs the full admission of `transaction` at wall clock `now` and returns the accepted transactions,
/// unorphaned ones included
fn submit(mempool: &mut Mempool, consensus: &ConsensusMock, transaction: Transaction, now: u64) -> RuleResult<Vec<Transaction>> {
    let mut mtx = mempool.pre_validate_and_populate_transaction(consensus, MutableTransaction::new(Arc::new(transaction)))?;
    let validation_result = consensus.validate_mempool_transaction(&mut mtx).map_err(RuleError::from);
    let Some(accepted) =
        mempool.post_validate_and_insert_transaction(consensus, validation_result, mtx, Priority::Low, Orphan::Allowed, now)?
    else {
        return Ok(vec![]);
    };
    let mut accepted_transactions = vec![accepted.as_ref().clone()];
    accepted_transactions.extend(revalidate_unorphaned(mempool, consensus, &accepted, now));
    Ok(accepted_transactions)
}

fn revalidate_unorphaned(mempool: &mut Mempool, consensus: &ConsensusMock, accepted: &Transaction, now: u64) -> Vec<Transaction> {
    let mut accepted_transactions = vec![];
    for unorphaned in mempool.get_unorphaned_transactions_after_accepted_transaction(accepted) {
        let priority = unorphaned.priority;
        let mut mtx = unorphaned.mtx;
        let validation_result = consensus.validate_mempool_transaction(&mut mtx).map_err(RuleError::from);
        if let Ok(Some(tx)) =
            mempool.post_validate_and_insert_transaction(consensus, validation_result, mtx, priority, Orphan::Allowed, now)
        {
            accepted_transactions.push(tx.as_ref().clone());
        }
    }
    accepted_transactions
}

#[test]
fn test_orphan_with_two_missing_parents() {
    let consensus = ConsensusMock::new();
    let mut mempool = mempool(Config::build_default(1_000, true, 500_000));
    let first_parent = funded(&consensus, 1);
    let second_parent = funded(&consensus, 2);
    let orphan = transaction(
        &[TransactionOutpoint::new(first_parent.id(), 0), TransactionOutpoint::new(second_parent.id(), 0)],
        2 * (UTXO_AMOUNT - FEE),
    );

    assert!(submit(&mut mempool, &consensus, orphan.clone(), 0).unwrap().is_empty());
    assert!(mempool.has_transaction(&orphan.id(), false, true));

    // One parent is not enough
    let accepted = submit(&mut mempool, &consensus, first_parent.clone(), 0).unwrap();
    assert_eq!(accepted.iter().map(|tx| tx.id()).collect::<Vec<_>>(), vec![first_parent.id()]);
    assert!(mempool.has_transaction(&orphan.id(), false, true));
    assert!(mempool.get_transaction(&orphan.id(), false, true).unwrap().entries[0].is_some());

    let accepted = submit(&mut mempool, &consensus, second_parent.clone(), 0).unwrap();
    assert_eq!(accepted.iter().map(|tx| tx.id()).collect::<Vec<_>>(), vec![second_parent.id(), orphan.id()]);
    assert_eq!(mempool.transaction_count(true, false), 3);
    assert_eq!(mempool.transaction_count(false, true), 0);
}

#[test]
fn test_orphan_expires_by_wall_clock() {
    let consensus = ConsensusMock::new();
    let config = Config::build_default(1_000, true, 500_000);
    let expire_millis = config.orphan_expire_interval_milliseconds;
    let scan_interval = config.orphan_expire_scan_interval_daa_score;
    let mut mempool = mempool(config);
    let parent = funded(&consensus, 1);
    let orphan = transaction(&[TransactionOutpoint::new(parent.id(), 0)], UTXO_AMOUNT - FEE);
    submit(&mut mempool, &consensus, orphan.clone(), 1_000).unwrap();

    // The DAA score barely moved, only the wall clock may expire the orphan
    mempool.expire_low_priority_transactions(scan_interval, 1_000 + expire_millis / 2).unwrap();
    assert!(mempool.has_transaction(&orphan.id(), false, true));

    mempool.expire_low_priority_transactions(2 * scan_interval, 1_000 + expire_millis + 1).unwrap();
    assert!(!mempool.has_transaction(&orphan.id(), false, true));
}

#[test]
fn test_orphan_pool_disabled() {
    let consensus = ConsensusMock::new();
    let mut config = Config::build_default(1_000, true, 500_000);
    config.maximum_orphan_transaction_count = 0;
    let mut mempool = mempool(config);
    let orphan = transaction(&[TransactionOutpoint::new(Hash::from_u64_word(42), 0)], UTXO_AMOUNT);
    let err = submit(&mut mempool, &consensus, orphan.clone(), 0).unwrap_err();
    assert_eq!(err, RuleError::RejectDisallowedOrphan(orphan.id()));
}

#[test]
fn test_new_block_keeps_chained_transactions() {
    let consensus = ConsensusMock::new();
    let mut mempool = mempool(Config::build_default(1_000, true, 500_000));
    let parent = funded(&consensus, 1);
    let child = transaction(&[TransactionOutpoint::new(parent.id(), 0)], UTXO_AMOUNT - FEE);
    let grandchild = transaction(&[TransactionOutpoint::new(child.id(), 0)], UTXO_AMOUNT - 2 * FEE);
    for tx in [parent.clone(), child.clone(), grandchild.clone()] {
        submit(&mut mempool, &consensus, tx, 0).unwrap();
    }
    assert_eq!(mempool.block_candidate_transactions().len(), 1);

    consensus.add_transaction(parent.clone(), 1);
    let unorphaned = mempool.handle_new_block_transactions(&[parent.clone()]).unwrap();
    assert!(unorphaned.is_empty());
    assert!(!mempool.has_transaction(&parent.id(), true, true));
    assert_eq!(mempool.transaction_count(true, false), 2);
    let candidates = mempool.block_candidate_transactions();
    assert_eq!(candidates.iter().map(|x| x.tx.id()).collect::<Vec<_>>(), vec![child.id()]);
}

#[test]
fn test_mempool_full_evicts_cheaper_transactions() {
    let consensus = ConsensusMock::new();
    let mut config = Config::build_default(1_000, true, 500_000);
    config.maximum_transaction_count = 2;
    let mut mempool = mempool(config);

    for seed in 1..=2 {
        submit(&mut mempool, &consensus, funded(&consensus, seed), 0).unwrap();
    }

    // Same fee rate as the pool content, nothing can be evicted
    let err = submit(&mut mempool, &consensus, funded(&consensus, 3), 0).unwrap_err();
    assert_eq!(err, RuleError::RejectMempoolIsFull(2, 2));

    let outpoint = TransactionOutpoint::new(Hash::from_u64_word(4), 0);
    consensus.add_utxo(outpoint, UtxoEntry::new(UTXO_AMOUNT, op_true_script(), 0, false));
    let generous = Transaction::new(
        TX_VERSION,
        vec![TransactionInput::new(outpoint, vec![], 0, 1)],
        vec![TransactionOutput::new(UTXO_AMOUNT - 10 * FEE, op_true_script())],
        0,
        SUBNETWORK_ID_NATIVE,
        0,
        vec![],
    );
    submit(&mut mempool, &consensus, generous.clone(), 0).unwrap();
    assert_eq!(mempool.transaction_count(true, false), 2);
    assert!(mempool.has_transaction(&generous.id(), true, false));
}
