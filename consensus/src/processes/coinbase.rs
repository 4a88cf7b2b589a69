use kestrel_consensus_core::{
    BlockHashMap, BlockHashSet,
    coinbase::{BlockRewardData, CoinbaseData, CoinbaseTransactionTemplate, MinerData},
    config::params::Params,
    constants::TX_VERSION,
    errors::coinbase::{CoinbaseError, CoinbaseResult},
    subnets::SUBNETWORK_ID_COINBASE,
    tx::{Transaction, TransactionOutput},
};

use crate::model::stores::ghostdag::GhostdagData;

/// Builds and parses coinbase transactions. The coinbase of a chain block pays the mergeset blues
/// according to the reward data they committed to, plus a single red reward output to the miner
#[derive(Clone)]
pub struct CoinbaseManager {
    coinbase_payload_script_public_key_max_len: u8,
    max_coinbase_payload_len: usize,
    base_subsidy: u64,
    subsidy_halving_interval: u64,
}

impl CoinbaseManager {
    pub fn new(params: &Params) -> Self {
        Self {
            coinbase_payload_script_public_key_max_len: params.coinbase_payload_script_public_key_max_len,
            max_coinbase_payload_len: params.max_coinbase_payload_len,
            base_subsidy: params.base_subsidy,
            subsidy_halving_interval: params.subsidy_halving_interval,
        }
    }

    pub fn expected_coinbase_transaction(
        &self,
        daa_score: u64,
        miner_data: MinerData,
        ghostdag_data: &GhostdagData,
        mergeset_rewards: &BlockHashMap<BlockRewardData>,
        mergeset_non_daa: &BlockHashSet,
    ) -> CoinbaseResult<CoinbaseTransactionTemplate> {
        let mut outputs = Vec::with_capacity(ghostdag_data.mergeset_blues.len() + 1);

        // One output per mergeset blue within the DAA window, paying the script the block reported
        for blue in ghostdag_data.mergeset_blues.iter().filter(|h| !mergeset_non_daa.contains(h)) {
            let reward_data = mergeset_rewards.get(blue).ok_or(CoinbaseError::MissingRewardData(*blue))?;
            if reward_data.subsidy + reward_data.total_fees > 0 {
                outputs.push(TransactionOutput::new(
                    reward_data.subsidy + reward_data.total_fees,
                    reward_data.script_public_key.clone(),
                ));
            }
        }

        // Reds are rewarded to the merging block. Reds outside the DAA window forfeit their subsidy
        let mut red_reward = 0u64;
        for red in ghostdag_data.mergeset_reds.iter() {
            let reward_data = mergeset_rewards.get(red).ok_or(CoinbaseError::MissingRewardData(*red))?;
            red_reward += reward_data.total_fees;
            if !mergeset_non_daa.contains(red) {
                red_reward += reward_data.subsidy;
            }
        }
        if red_reward > 0 {
            outputs.push(TransactionOutput::new(red_reward, miner_data.script_public_key.clone()));
        }

        let subsidy = self.calc_block_subsidy(daa_score);
        let payload = self.serialize_coinbase_payload(&CoinbaseData { blue_score: ghostdag_data.blue_score, subsidy, miner_data })?;

        Ok(CoinbaseTransactionTemplate {
            tx: Transaction::new(TX_VERSION, vec![], outputs, 0, SUBNETWORK_ID_COINBASE, 0, payload),
            has_red_reward: red_reward > 0,
        })
    }

    pub fn serialize_coinbase_payload(&self, data: &CoinbaseData) -> CoinbaseResult<Vec<u8>> {
        let script_len = data.miner_data.script_public_key.script().len();
        if script_len > self.coinbase_payload_script_public_key_max_len as usize {
            return Err(CoinbaseError::PayloadScriptPublicKeyLenAboveMax(script_len, self.coinbase_payload_script_public_key_max_len));
        }
        let payload = data.serialize();
        if payload.len() > self.max_coinbase_payload_len {
            return Err(CoinbaseError::PayloadLenAboveMax(payload.len(), self.max_coinbase_payload_len));
        }
        Ok(payload)
    }

    /// Replaces the miner data of a serialized payload, keeping its blue score and subsidy
    pub fn modify_coinbase_payload(&self, payload: &[u8], miner_data: MinerData) -> CoinbaseResult<Vec<u8>> {
        let data = self.deserialize_coinbase_payload(payload)?;
        self.serialize_coinbase_payload(&CoinbaseData { miner_data, ..data })
    }

    pub fn deserialize_coinbase_payload(&self, payload: &[u8]) -> CoinbaseResult<CoinbaseData> {
        if payload.len() > self.max_coinbase_payload_len {
            return Err(CoinbaseError::PayloadLenAboveMax(payload.len(), self.max_coinbase_payload_len));
        }
        let data = CoinbaseData::deserialize(payload)?;
        let script_len = data.miner_data.script_public_key.script().len();
        if script_len > self.coinbase_payload_script_public_key_max_len as usize {
            return Err(CoinbaseError::PayloadScriptPublicKeyLenAboveMax(script_len, self.coinbase_payload_script_public_key_max_len));
        }
        Ok(data)
    }

    pub fn calc_block_subsidy(&self, daa_score: u64) -> u64 {
        let halvings = daa_score / self.subsidy_halving_interval;
        if halvings >= u64::BITS as u64 { 0 } else { self.base_subsidy >> halvings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::{
        BlockHashMap, HashMapCustomHasher,
        config::params::SIMNET_PARAMS,
        tx::{ScriptPublicKey, scriptvec},
    };
    use kestrel_hashes::Hash;

    fn spk(byte: u8) -> ScriptPublicKey {
        ScriptPublicKey::new(0, scriptvec![byte; 34])
    }

    #[test]
    fn test_subsidy_halving() {
        let manager = CoinbaseManager::new(&SIMNET_PARAMS);
        let interval = SIMNET_PARAMS.subsidy_halving_interval;
        let base = SIMNET_PARAMS.base_subsidy;
        assert_eq!(manager.calc_block_subsidy(0), base);
        assert_eq!(manager.calc_block_subsidy(interval - 1), base);
        assert_eq!(manager.calc_block_subsidy(interval), base / 2);
        assert_eq!(manager.calc_block_subsidy(3 * interval), base / 8);
        assert_eq!(manager.calc_block_subsidy(u64::MAX), 0);
        assert_eq!(manager.calc_block_subsidy(0), SIMNET_PARAMS.calc_block_subsidy(0));
    }

    #[test]
    fn test_expected_coinbase_outputs() {
        let manager = CoinbaseManager::new(&SIMNET_PARAMS);
        let (sp, blue, red, non_daa_red) =
            (Hash::from_u64_word(1), Hash::from_u64_word(2), Hash::from_u64_word(3), Hash::from_u64_word(4));

        let mut ghostdag_data = GhostdagData::new_with_selected_parent(sp, 18);
        ghostdag_data.add_blue(blue, 0, &BlockHashMap::new());
        ghostdag_data.add_red(red);
        ghostdag_data.add_red(non_daa_red);
        ghostdag_data.blue_score = 10;

        let mut rewards = BlockHashMap::new();
        rewards.insert(sp, BlockRewardData::new(100, 5, spk(1)));
        rewards.insert(blue, BlockRewardData::new(100, 7, spk(2)));
        rewards.insert(red, BlockRewardData::new(100, 1, spk(3)));
        rewards.insert(non_daa_red, BlockRewardData::new(100, 2, spk(4)));
        let non_daa: BlockHashSet = [non_daa_red].into_iter().collect();

        let miner = MinerData::new(spk(9), b"extra".to_vec());
        let template = manager.expected_coinbase_transaction(0, miner.clone(), &ghostdag_data, &rewards, &non_daa).unwrap();
        let values: Vec<_> = template.tx.outputs.iter().map(|o| (o.value, o.script_public_key.clone())).collect();
        assert_eq!(values, vec![(105, spk(1)), (107, spk(2)), (100 + 1 + 2, spk(9))]);
        assert!(template.has_red_reward);
        assert!(template.tx.is_coinbase());

        let data = manager.deserialize_coinbase_payload(&template.tx.payload).unwrap();
        assert_eq!(data.blue_score, 10);
        assert_eq!(data.subsidy, SIMNET_PARAMS.base_subsidy);
        assert_eq!(data.miner_data, miner);

        rewards.remove(&blue);
        assert_eq!(
            manager.expected_coinbase_transaction(0, miner, &ghostdag_data, &rewards, &non_daa).unwrap_err(),
            CoinbaseError::MissingRewardData(blue)
        );
    }

    #[test]
    fn test_payload_limits() {
        let manager = CoinbaseManager::new(&SIMNET_PARAMS);
        let max = SIMNET_PARAMS.coinbase_payload_script_public_key_max_len;
        let too_long = MinerData::new(ScriptPublicKey::from_vec(0, vec![0; max as usize + 1]), vec![]);
        assert_eq!(
            manager.serialize_coinbase_payload(&CoinbaseData { blue_score: 1, subsidy: 1, miner_data: too_long }),
            Err(CoinbaseError::PayloadScriptPublicKeyLenAboveMax(max as usize + 1, max))
        );

        let payload = manager
            .serialize_coinbase_payload(&CoinbaseData { blue_score: 3, subsidy: 4, miner_data: MinerData::new(spk(1), vec![]) })
            .unwrap();
        let modified = manager.modify_coinbase_payload(&payload, MinerData::new(spk(2), b"x".to_vec())).unwrap();
        let data = manager.deserialize_coinbase_payload(&modified).unwrap();
        assert_eq!((data.blue_score, data.subsidy), (3, 4));
        assert_eq!(data.miner_data.script_public_key, spk(2));
    }
}
