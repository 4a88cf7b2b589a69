use serde::{Deserialize, Serialize};

use crate::{
    errors::coinbase::{CoinbaseError, CoinbaseResult},
    tx::{ScriptPublicKey, ScriptVec, Transaction},
};

/// Length of the fixed part of a coinbase payload: blue score, subsidy, script version and script length
pub const COINBASE_PAYLOAD_FIXED_LEN: usize = 8 + 8 + 2 + 1;

#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct MinerData {
    pub script_public_key: ScriptPublicKey,
    pub extra_data: Vec<u8>,
}

impl MinerData {
    pub fn new(script_public_key: ScriptPublicKey, extra_data: Vec<u8>) -> Self {
        Self { script_public_key, extra_data }
    }
}

/// The payload carried by every coinbase transaction
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct CoinbaseData {
    pub blue_score: u64,
    pub subsidy: u64,
    pub miner_data: MinerData,
}

impl CoinbaseData {
    pub fn serialize(&self) -> Vec<u8> {
        let script = self.miner_data.script_public_key.script();
        let mut payload = Vec::with_capacity(COINBASE_PAYLOAD_FIXED_LEN + script.len() + self.miner_data.extra_data.len());
        payload.extend_from_slice(&self.blue_score.to_le_bytes());
        payload.extend_from_slice(&self.subsidy.to_le_bytes());
        payload.extend_from_slice(&self.miner_data.script_public_key.version().to_le_bytes());
        payload.push(script.len() as u8);
        payload.extend_from_slice(script);
        payload.extend_from_slice(&self.miner_data.extra_data);
        payload
    }

    pub fn deserialize(payload: &[u8]) -> CoinbaseResult<Self> {
        if payload.len() < COINBASE_PAYLOAD_FIXED_LEN {
            return Err(CoinbaseError::PayloadLenBelowMin(payload.len(), COINBASE_PAYLOAD_FIXED_LEN));
        }

        let blue_score = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        let subsidy = u64::from_le_bytes(payload[8..16].try_into().unwrap());
        let script_version = u16::from_le_bytes(payload[16..18].try_into().unwrap());
        let script_len = payload[18] as usize;

        let script_end = COINBASE_PAYLOAD_FIXED_LEN + script_len;
        if payload.len() < script_end {
            return Err(CoinbaseError::PayloadCantContainScriptPublicKey(payload.len(), script_end));
        }

        let script = ScriptVec::from_slice(&payload[COINBASE_PAYLOAD_FIXED_LEN..script_end]);
        let extra_data = payload[script_end..].to_vec();
        Ok(Self { blue_score, subsidy, miner_data: MinerData::new(ScriptPublicKey::new(script_version, script), extra_data) })
    }
}

/// Reward data of a mergeset block, as computed when the block was resolved
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRewardData {
    pub subsidy: u64,
    pub total_fees: u64,
    pub script_public_key: ScriptPublicKey,
}

impl BlockRewardData {
    pub fn new(subsidy: u64, total_fees: u64, script_public_key: ScriptPublicKey) -> Self {
        Self { subsidy, total_fees, script_public_key }
    }
}

/// Holds a coinbase transaction along with meta-data obtained during creation
#[derive(Clone, Debug)]
pub struct CoinbaseTransactionTemplate {
    pub tx: Transaction,
    /// Whether the last output holds the reward of red mergeset blocks
    pub has_red_reward: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::scriptvec;

    #[test]
    fn test_coinbase_payload_serialization() {
        let data = CoinbaseData {
            blue_score: 56,
            subsidy: 50_0000_0000,
            miner_data: MinerData::new(ScriptPublicKey::new(0, scriptvec![0x20, 0xab, 0xac]), b"/kestrel-miner/".to_vec()),
        };
        let payload = data.serialize();
        assert_eq!(payload.len(), COINBASE_PAYLOAD_FIXED_LEN + 3 + 15);
        assert_eq!(CoinbaseData::deserialize(&payload).unwrap(), data);
    }

    #[test]
    fn test_coinbase_payload_errors() {
        assert_eq!(CoinbaseData::deserialize(&[0; 10]), Err(CoinbaseError::PayloadLenBelowMin(10, COINBASE_PAYLOAD_FIXED_LEN)));

        let mut payload = vec![0u8; COINBASE_PAYLOAD_FIXED_LEN];
        payload[18] = 5;
        payload.extend_from_slice(&[1, 2]);
        assert_eq!(
            CoinbaseData::deserialize(&payload),
            Err(CoinbaseError::PayloadCantContainScriptPublicKey(COINBASE_PAYLOAD_FIXED_LEN + 2, COINBASE_PAYLOAD_FIXED_LEN + 5))
        );
    }
}
