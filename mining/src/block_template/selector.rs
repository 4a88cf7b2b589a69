use crate::model::candidate_tx::CandidateTransaction;
use kestrel_consensus_core::tx::Transaction;
use kestrel_core::trace;

/// Picks the block template transactions among the mempool candidates.
///
/// Candidates are taken by decreasing fee rate and skipped when they would overflow the mass
/// budget, so a lighter transaction further down may still fill the remaining room.
pub(crate) struct TransactionsSelector {
    mass_budget: u64,
    candidates: Vec<CandidateTransaction>,
}

impl TransactionsSelector {
    pub(crate) fn new(mass_budget: u64, mut candidates: Vec<CandidateTransaction>) -> Self {
        // Ties are broken by id so that equal mempools select equal templates
        candidates.sort_by(|a, b| b.fee_rate().total_cmp(&a.fee_rate()).then_with(|| a.tx.id().cmp(&b.tx.id())));
        Self { mass_budget, candidates }
    }

    pub(crate) fn select_transactions(&self) -> Vec<Transaction> {
        let mut total_mass = 0u64;
        let mut selected = Vec::new();
        for candidate in self.candidates.iter() {
            let Some(mass) = total_mass.checked_add(candidate.calculated_mass).filter(|mass| *mass <= self.mass_budget) else {
                trace!("Skipping transaction {}, mass {} exceeds the remaining budget", candidate.tx.id(), candidate.calculated_mass);
                continue;
            };
            total_mass = mass;
            selected.push(candidate.tx.as_ref().clone());
        }
        trace!("Selected {} out of {} candidate transactions, total mass {}", selected.len(), self.candidates.len(), total_mass);
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::tx::TransactionOutpoint;
    use kestrel_hashes::Hash;
    use kestrel_txscript::standard::test_helpers::create_transaction;
    use std::sync::Arc;

    fn candidate(word: u64, fee: u64, mass: u64) -> CandidateTransaction {
        let tx = create_transaction(&[TransactionOutpoint::new(Hash::from_u64_word(word), 0)], &[1000]);
        CandidateTransaction::new(Arc::new(tx), fee, mass)
    }

    #[test]
    fn test_selects_by_fee_rate_within_budget() {
        let low = candidate(1, 1_000, 1_000);
        let high = candidate(2, 10_000, 1_000);
        let heavy = candidate(3, 60_000, 5_000);
        let light = candidate(4, 400, 500);
        let ids = [low.tx.id(), high.tx.id(), heavy.tx.id(), light.tx.id()];

        let selector = TransactionsSelector::new(3_000, vec![low, high, heavy, light]);
        let selected = selector.select_transactions().iter().map(|tx| tx.id()).collect::<Vec<_>>();
        // heavy has the highest fee rate but does not fit, low and light fill the remaining room
        assert_eq!(selected, vec![ids[1], ids[0], ids[3]]);
    }

    #[test]
    fn test_empty_candidates() {
        let selector = TransactionsSelector::new(3_000, vec![]);
        assert!(selector.select_transactions().is_empty());
    }
}
