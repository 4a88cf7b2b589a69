use kestrel_consensus_core::{
    blockhash::BlockHashExtensions,
    errors::pruning::{PruningImportError, PruningImportResult},
    pruning::PruningPointProof,
};
use kestrel_core::debug;
use kestrel_pow::State;

use super::PruningProofManager;

impl PruningProofManager {
    /// Checks that the proof starts at the local genesis, that every header points at the previous one as its
    /// pruning point and that all proof headers carry valid proof of work
    pub fn validate_pruning_point_proof(&self, proof: &PruningPointProof) -> PruningImportResult<()> {
        let first = proof.first().ok_or(PruningImportError::ProofEmpty)?;
        let genesis_hash = self.genesis_hash();
        if first.hash != genesis_hash {
            return Err(PruningImportError::ProofGenesisMismatch(first.hash, genesis_hash));
        }

        for pair in proof.windows(2) {
            let (previous, header) = (&pair[0], &pair[1]);
            let pointed = if header.pruning_point.is_none() { genesis_hash } else { header.pruning_point };
            if pointed != previous.hash {
                return Err(PruningImportError::ProofChainBroken(header.hash, header.pruning_point, previous.hash));
            }
        }

        if !self.skip_proof_of_work {
            for header in proof.iter().skip(1) {
                let state = State::new(header, self.params.pow_scores.variant(header.daa_score));
                if !state.check_pow(header.nonce).0 {
                    return Err(PruningImportError::ProofInvalidPow(header.hash));
                }
            }
        }

        debug!("Validated a pruning point proof of {} headers ending at {}", proof.len(), proof[proof.len() - 1].hash);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kestrel_consensus_core::{
        api::ConsensusApi,
        config::{ConfigBuilder, params::SIMNET_PARAMS},
        errors::pruning::PruningImportError,
        header::Header,
    };

    use crate::consensus::test_consensus::TestConsensus;

    #[test]
    fn test_proof_validation_rules() {
        let config = ConfigBuilder::new(SIMNET_PARAMS).skip_proof_of_work().build();
        let consensus = TestConsensus::new(&config);
        let genesis = consensus.get_header(config.genesis_hash()).unwrap();

        assert!(matches!(consensus.validate_pruning_proof(&vec![]), Err(PruningImportError::ProofEmpty)));
        assert!(consensus.validate_pruning_proof(&vec![genesis.clone()]).is_ok());

        let mut linked = Header::from_precomputed_hash(Default::default(), vec![genesis.hash]);
        linked.pruning_point = genesis.hash;
        linked.finalize();
        let linked = Arc::new(linked);
        assert!(consensus.validate_pruning_proof(&vec![genesis.clone(), linked.clone()]).is_ok());

        let mut broken = (*linked).clone();
        broken.pruning_point = kestrel_hashes::Hash::from_u64_word(42);
        broken.finalize();
        assert!(matches!(
            consensus.validate_pruning_proof(&vec![genesis.clone(), linked.clone(), Arc::new(broken)]),
            Err(PruningImportError::ProofChainBroken(..))
        ));

        assert!(matches!(consensus.validate_pruning_proof(&vec![linked]), Err(PruningImportError::ProofGenesisMismatch(..))));
    }
}
