#[cfg(test)]
mod tests {
    use crate::{
        MiningCounters,
        errors::{MiningManagerError, MiningManagerResult},
        manager::MiningManager,
        mempool::{
            config::Config,
            errors::{RejectCode, RuleError},
            tx::{Orphan, Priority},
        },
        testutils::consensus_mock::ConsensusMock,
    };
    use kestrel_consensus_core::{
        coinbase::MinerData,
        constants::TX_VERSION,
        errors::tx::TxRuleError,
        subnets::SUBNETWORK_ID_NATIVE,
        tx::{
            MutableTransaction, ScriptPublicKey, Transaction, TransactionId, TransactionInput, TransactionOutpoint, TransactionOutput,
            UtxoEntry,
        },
    };
    use kestrel_hashes::Hash;
    use kestrel_txscript::standard::{pay_to_pub_key, test_helpers::op_true_script};
    use std::sync::{Arc, atomic::Ordering};

    const TARGET_TIME_PER_BLOCK: u64 = 1_000;
    const MAX_BLOCK_MASS: u64 = 500_000;
    const UTXO_AMOUNT: u64 = 100_000;
    const DEFAULT_FEE: u64 = 2_000;

    fn config() -> Config {
        Config::build_default(TARGET_TIME_PER_BLOCK, true, MAX_BLOCK_MASS)
    }

    fn mining_manager(config: Config) -> (MiningManager, Arc<MiningCounters>) {
        let counters = Arc::new(MiningCounters::default());
        (MiningManager::new(config, None, counters.clone()), counters)
    }

    /// Registers `input_count` UTXOs owned by `owner` in the consensus and returns their outpoints
    fn fund(consensus: &ConsensusMock, seed: u64, input_count: u64, owner: &ScriptPublicKey) -> Vec<TransactionOutpoint> {
        (0..input_count)
            .map(|i| {
                let outpoint = TransactionOutpoint::new(Hash::from_u64_word(seed * 1_000 + i), 0);
                consensus.add_utxo(outpoint, UtxoEntry::new(UTXO_AMOUNT, owner.clone(), 0, false));
                outpoint
            })
            .collect()
    }

    /// Spends `outpoints`, each worth [`UTXO_AMOUNT`], into `output_count` equal outputs paying `fee`
    fn spend(outpoints: &[TransactionOutpoint], output_count: u64, fee: u64, destination: &ScriptPublicKey) -> Transaction {
        let inputs = outpoints.iter().map(|&outpoint| TransactionInput::new(outpoint, vec![], 0, 1)).collect();
        let value = (UTXO_AMOUNT * outpoints.len() as u64 - fee) / output_count;
        let outputs = (0..output_count).map(|_| TransactionOutput::new(value, destination.clone())).collect();
        Transaction::new(TX_VERSION, inputs, outputs, 0, SUBNETWORK_ID_NATIVE, 0, vec![])
    }

    fn funded_transaction(consensus: &ConsensusMock, seed: u64) -> Transaction {
        let outpoints = fund(consensus, seed, 1, &op_true_script());
        spend(&outpoints, 1, DEFAULT_FEE, &op_true_script())
    }

    /// Spends the first output of `parent` paying [`DEFAULT_FEE`]
    fn chained_transaction(parent: &Transaction) -> Transaction {
        Transaction::new(
            TX_VERSION,
            vec![TransactionInput::new(TransactionOutpoint::new(parent.id(), 0), vec![], 0, 1)],
            vec![TransactionOutput::new(parent.outputs[0].value - DEFAULT_FEE, op_true_script())],
            0,
            SUBNETWORK_ID_NATIVE,
            0,
            vec![],
        )
    }

    fn insert(
        mining_manager: &MiningManager,
        consensus: &ConsensusMock,
        transaction: Transaction,
        orphan: Orphan,
    ) -> MiningManagerResult<Vec<Arc<Transaction>>> {
        mining_manager.validate_and_insert_transaction(consensus, transaction, Priority::Low, orphan)
    }

    fn into_rule_error(result: MiningManagerResult<Vec<Arc<Transaction>>>) -> RuleError {
        match result {
            Err(MiningManagerError::MempoolError(err)) => err,
            other => panic!("expected a mempool rule error, got {other:?}"),
        }
    }

    fn ids(transactions: &[Arc<Transaction>]) -> Vec<TransactionId> {
        transactions.iter().map(|tx| tx.id()).collect()
    }

    #[test]
    fn test_validate_and_insert_transaction() {
        const TX_COUNT: u64 = 10;
        let consensus = ConsensusMock::new();
        let (mining_manager, counters) = mining_manager(config());

        for seed in 0..TX_COUNT {
            let transaction = funded_transaction(&consensus, seed);
            let transaction_id = transaction.id();
            let accepted = insert(&mining_manager, &consensus, transaction, Orphan::Allowed).unwrap();
            assert_eq!(ids(&accepted), vec![transaction_id]);

            let mempool_transaction = mining_manager.get_transaction(&transaction_id, true, false).unwrap();
            assert!(mempool_transaction.is_fully_populated());
            assert_eq!(mempool_transaction.calculated_fee, Some(DEFAULT_FEE));
        }

        assert_eq!(mining_manager.transaction_count(true, false), TX_COUNT as usize);
        assert_eq!(mining_manager.block_candidate_transactions().len(), TX_COUNT as usize);
        assert_eq!(counters.tx_accepted_counts.load(Ordering::Relaxed), TX_COUNT);
        assert_eq!(counters.low_priority_tx_counts.load(Ordering::Relaxed), TX_COUNT);
    }

    #[test]
    fn test_duplicate_and_double_spend_rejected() {
        let consensus = ConsensusMock::new();
        let (mining_manager, counters) = mining_manager(config());
        let outpoints = fund(&consensus, 1, 1, &op_true_script());
        let transaction = spend(&outpoints, 1, DEFAULT_FEE, &op_true_script());
        let double_spend = spend(&outpoints, 1, DEFAULT_FEE * 2, &op_true_script());

        insert(&mining_manager, &consensus, transaction.clone(), Orphan::Allowed).unwrap();
        let err = into_rule_error(insert(&mining_manager, &consensus, transaction.clone(), Orphan::Allowed));
        assert_eq!(err, RuleError::RejectDuplicate(transaction.id()));
        assert_eq!(err.reject_code(), RejectCode::Duplicate);

        let err = into_rule_error(insert(&mining_manager, &consensus, double_spend, Orphan::Allowed));
        assert_eq!(err, RuleError::RejectDoubleSpendInMempool(outpoints[0], transaction.id()));
        assert_eq!(counters.tx_rejected_counts.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_consensus_rejection_is_reported() {
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(config());
        let transaction = funded_transaction(&consensus, 1);
        consensus.set_status(transaction.id(), Err(TxRuleError::SpendTooHigh(1, 2)));

        let err = into_rule_error(insert(&mining_manager, &consensus, transaction, Orphan::Allowed));
        assert!(err.is_invalid_by_consensus());
        assert_eq!(err.reject_code(), RejectCode::Invalid);
        assert_eq!(mining_manager.transaction_count(true, true), 0);
    }

    #[test]
    fn test_orphan_unorphaned_by_parent() {
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(config());
        let parent = funded_transaction(&consensus, 1);
        let child = chained_transaction(&parent);
        let (parent_id, child_id) = (parent.id(), child.id());

        let err = into_rule_error(insert(&mining_manager, &consensus, child.clone(), Orphan::Forbidden));
        assert_eq!(err, RuleError::RejectDisallowedOrphan(child_id));

        assert!(insert(&mining_manager, &consensus, child, Orphan::Allowed).unwrap().is_empty());
        assert!(mining_manager.has_transaction(&child_id, false, true));
        assert!(!mining_manager.has_transaction(&child_id, true, false));
        assert!(!mining_manager.get_transaction(&child_id, false, true).unwrap().is_fully_populated());

        let accepted = insert(&mining_manager, &consensus, parent, Orphan::Allowed).unwrap();
        assert_eq!(ids(&accepted), vec![parent_id, child_id]);
        assert_eq!(mining_manager.transaction_count(true, false), 2);
        assert_eq!(mining_manager.transaction_count(false, true), 0);

        // Only the parent may enter a template, the child depends on a mempool output
        let candidates = mining_manager.block_candidate_transactions();
        assert_eq!(candidates.iter().map(|x| x.tx.id()).collect::<Vec<_>>(), vec![parent_id]);
    }

    #[test]
    fn test_spam_transaction_rejected() {
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(config());

        // Two outputs beyond the input count are free
        let outpoints = fund(&consensus, 1, 1, &op_true_script());
        insert(&mining_manager, &consensus, spend(&outpoints, 3, DEFAULT_FEE, &op_true_script()), Orphan::Allowed).unwrap();

        let outpoints = fund(&consensus, 2, 1, &op_true_script());
        let fan_out = spend(&outpoints, 5, 10, &op_true_script());
        let err = into_rule_error(insert(&mining_manager, &consensus, fan_out.clone(), Orphan::Allowed));
        assert!(matches!(err, RuleError::RejectSpamTransaction(id, 4, 10, _) if id == fan_out.id()));
        assert_eq!(err.reject_code(), RejectCode::InsufficientFee);

        let paying_fan_out = spend(&outpoints, 5, 10_000, &op_true_script());
        insert(&mining_manager, &consensus, paying_fan_out, Orphan::Allowed).unwrap();
    }

    #[test]
    fn test_frozen_addresses_rejected() {
        let frozen = pay_to_pub_key(&[9; 32]);
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(config().with_frozen_scripts(vec![frozen.clone()]));

        let outpoints = fund(&consensus, 1, 1, &op_true_script());
        let paying_frozen = spend(&outpoints, 1, DEFAULT_FEE, &frozen);
        let err = into_rule_error(insert(&mining_manager, &consensus, paying_frozen, Orphan::Allowed));
        assert_eq!(err.reject_code(), RejectCode::Frozen);

        let outpoints = fund(&consensus, 2, 1, &frozen);
        let spending_frozen = spend(&outpoints, 1, DEFAULT_FEE, &op_true_script());
        let err = into_rule_error(insert(&mining_manager, &consensus, spending_frozen, Orphan::Allowed));
        assert_eq!(err.reject_code(), RejectCode::Frozen);
        assert_eq!(mining_manager.transaction_count(true, true), 0);
    }

    #[test]
    fn test_non_standard_rejected_unless_relayed() {
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(Config::build_default(TARGET_TIME_PER_BLOCK, false, MAX_BLOCK_MASS));
        // Anyone-can-spend outputs are not of a standard script class
        let err = into_rule_error(insert(&mining_manager, &consensus, funded_transaction(&consensus, 1), Orphan::Allowed));
        assert_eq!(err.reject_code(), RejectCode::NonStandard);

        let owner = pay_to_pub_key(&[1; 32]);
        let outpoints = fund(&consensus, 2, 1, &owner);
        insert(&mining_manager, &consensus, spend(&outpoints, 1, DEFAULT_FEE, &pay_to_pub_key(&[2; 32])), Orphan::Allowed).unwrap();
    }

    #[test]
    fn test_compound_rate_limit() {
        const LIMIT: usize = 3;
        const WINDOW: u64 = 60_000;
        let consensus = ConsensusMock::new();
        let (mining_manager, counters) = mining_manager(config().with_compound_rate_limit(LIMIT, WINDOW));
        let sender = pay_to_pub_key(&[1; 32]);
        let other_sender = pay_to_pub_key(&[2; 32]);
        let compound = |seed: u64, owner: &ScriptPublicKey| {
            let outpoints = fund(&consensus, seed, 10, owner);
            MutableTransaction::new(Arc::new(spend(&outpoints, 1, DEFAULT_FEE, &op_true_script())))
        };
        let submit = |transaction: MutableTransaction, now: u64| {
            mining_manager.validate_and_insert_mutable_transaction_at(&consensus, transaction, Priority::Low, Orphan::Allowed, now)
        };

        for (seed, now) in [(1, 1_000), (2, 2_000), (3, 3_000)] {
            submit(compound(seed, &sender), now).unwrap();
        }
        let rejected = compound(4, &sender);
        let rejected_id = rejected.id();
        let err = into_rule_error(submit(rejected.clone(), 4_000));
        assert_eq!(err, RuleError::RejectCompoundRateLimit(rejected_id, LIMIT, WINDOW));
        assert_eq!(err.reject_code(), RejectCode::RateLimited);
        assert_eq!(counters.rate_limited_counts.load(Ordering::Relaxed), 1);

        // Senders are accounted separately and plain transactions are never limited
        submit(compound(5, &other_sender), 4_000).unwrap();
        let outpoints = fund(&consensus, 6, 1, &sender);
        submit(MutableTransaction::new(Arc::new(spend(&outpoints, 1, DEFAULT_FEE, &op_true_script()))), 4_000).unwrap();

        // The first submission leaves the window
        submit(rejected, 1_000 + WINDOW).unwrap();
        assert!(mining_manager.has_transaction(&rejected_id, true, false));
    }

    #[test]
    fn test_handle_new_block_transactions() {
        let consensus = ConsensusMock::new();
        let (mining_manager, counters) = mining_manager(config());

        let parent = funded_transaction(&consensus, 1);
        let child = chained_transaction(&parent);
        let double_spent_outpoints = fund(&consensus, 2, 1, &op_true_script());
        let double_spent = spend(&double_spent_outpoints, 1, DEFAULT_FEE, &op_true_script());
        let double_spent_child = chained_transaction(&double_spent);
        for transaction in [parent.clone(), child.clone(), double_spent.clone(), double_spent_child.clone()] {
            insert(&mining_manager, &consensus, transaction, Orphan::Allowed).unwrap();
        }

        // An orphan spending the output of a transaction the mempool never saw
        let unseen = funded_transaction(&consensus, 3);
        let orphan = chained_transaction(&unseen);
        insert(&mining_manager, &consensus, orphan.clone(), Orphan::Allowed).unwrap();
        assert!(mining_manager.has_transaction(&orphan.id(), false, true));

        // The block accepts the parent, a transaction double spending `double_spent` and `unseen`
        let block_double_spend = spend(&double_spent_outpoints, 1, DEFAULT_FEE * 3, &op_true_script());
        let block_transactions = vec![parent.clone(), block_double_spend, unseen];
        for transaction in block_transactions.iter() {
            consensus.add_transaction(transaction.clone(), 1);
        }
        let accepted = mining_manager.handle_new_block_transactions(&consensus, &block_transactions).unwrap();

        assert_eq!(ids(&accepted), vec![orphan.id()]);
        assert!(!mining_manager.has_transaction(&parent.id(), true, true));
        assert!(!mining_manager.has_transaction(&double_spent.id(), true, true));
        assert!(!mining_manager.has_transaction(&double_spent_child.id(), true, true));
        assert!(mining_manager.has_transaction(&child.id(), true, false));
        assert!(mining_manager.has_transaction(&orphan.id(), true, false));

        // The child now spends a virtual UTXO and becomes a block candidate
        let mut candidates = mining_manager.block_candidate_transactions().iter().map(|x| x.tx.id()).collect::<Vec<_>>();
        candidates.sort();
        let mut expected = vec![child.id(), orphan.id()];
        expected.sort();
        assert_eq!(candidates, expected);
        assert_eq!(counters.block_tx_counts.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_expire_low_priority_transactions() {
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(config());
        let low = funded_transaction(&consensus, 1);
        let high = funded_transaction(&consensus, 2);
        insert(&mining_manager, &consensus, low.clone(), Orphan::Allowed).unwrap();
        mining_manager.validate_and_insert_transaction(&consensus, high.clone(), Priority::High, Orphan::Allowed).unwrap();

        // At one block per second the expire interval is 60 DAA score units
        consensus.set_virtual_daa_score(30);
        mining_manager.expire_low_priority_transactions(&consensus).unwrap();
        assert!(mining_manager.has_transaction(&low.id(), true, false));

        consensus.set_virtual_daa_score(100);
        mining_manager.expire_low_priority_transactions(&consensus).unwrap();
        assert!(!mining_manager.has_transaction(&low.id(), true, false));
        assert!(mining_manager.has_transaction(&high.id(), true, false));
    }

    #[test]
    fn test_block_template_removes_invalid_transactions() {
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(config());
        let transactions = (1..=3).map(|seed| funded_transaction(&consensus, seed)).collect::<Vec<_>>();
        for transaction in transactions.iter() {
            insert(&mining_manager, &consensus, transaction.clone(), Orphan::Allowed).unwrap();
        }
        let invalid_id = transactions[1].id();
        consensus.set_status(invalid_id, Err(TxRuleError::SequenceLockConditionsAreNotMet));

        let miner_data = MinerData::new(pay_to_pub_key(&[3; 32]), vec![]);
        let template = mining_manager.get_block_template(&consensus, &miner_data).unwrap();
        assert_eq!(template.block.transactions.len(), 3, "coinbase and the two valid transactions");
        assert!(template.block.transactions[0].is_coinbase());
        assert!(template.block.transactions.iter().all(|tx| tx.id() != invalid_id));
        assert!(!mining_manager.has_transaction(&invalid_id, true, true));
        assert_eq!(template.calculated_fees, vec![DEFAULT_FEE, DEFAULT_FEE]);
    }

    #[test]
    fn test_block_template_too_many_attempts() {
        let consensus = ConsensusMock::new();
        let mut config = config();
        config.maximum_build_block_template_attempts = 1;
        let (mining_manager, _) = mining_manager(config);
        let transaction = funded_transaction(&consensus, 1);
        insert(&mining_manager, &consensus, transaction.clone(), Orphan::Allowed).unwrap();
        consensus.set_status(transaction.id(), Err(TxRuleError::SequenceLockConditionsAreNotMet));

        let result = mining_manager.get_block_template(&consensus, &MinerData::default());
        assert!(matches!(result, Err(MiningManagerError::BlockTemplateBuilderError(_))));
        assert_eq!(mining_manager.transaction_count(true, true), 0);
    }

    #[test]
    fn test_block_template_cache() {
        let consensus = ConsensusMock::new();
        let (mining_manager, _) = mining_manager(config());
        let miner_data = MinerData::new(pay_to_pub_key(&[3; 32]), vec![]);

        let first = mining_manager.get_block_template(&consensus, &miner_data).unwrap();
        insert(&mining_manager, &consensus, funded_transaction(&consensus, 1), Orphan::Allowed).unwrap();
        let cached = mining_manager.get_block_template(&consensus, &miner_data).unwrap();
        assert_eq!(cached.block.header.hash, first.block.header.hash);
        assert_eq!(cached.block.transactions.len(), 1);

        mining_manager.clear_block_template();
        let rebuilt = mining_manager.get_block_template(&consensus, &miner_data).unwrap();
        assert_eq!(rebuilt.block.transactions.len(), 2);
    }
}
