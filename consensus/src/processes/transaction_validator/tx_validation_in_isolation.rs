use std::collections::HashSet;

use kestrel_consensus_core::{
    constants::{MAX_SOMPI, MAX_TX_VERSION},
    errors::tx::{TxResult, TxRuleError},
    payload::validate_data_payload,
    subnets::{SUBNETWORK_ID_DATA, SUBNETWORK_ID_REGISTRY},
    tx::Transaction,
};

use super::TransactionValidator;

/// Payload length of a subnetwork registry transaction: the registered gas limit
const REGISTRY_PAYLOAD_LEN: usize = 8;

impl TransactionValidator {
    /// Validates everything which can be checked without any context. `daa_score` selects the
    /// block version whose coinbase output bound applies
    pub fn validate_tx_in_isolation(&self, tx: &Transaction, daa_score: u64) -> TxResult<()> {
        check_transaction_version(tx)?;
        self.check_transaction_inputs_in_isolation(tx)?;
        self.check_transaction_outputs_in_isolation(tx)?;
        if tx.is_coinbase() {
            self.check_coinbase_in_isolation(tx, daa_score)?;
        }
        check_duplicate_transaction_inputs(tx)?;
        self.check_subnetwork(tx)?;
        check_gas(tx)?;
        check_transaction_payload(tx)
    }

    fn check_transaction_inputs_in_isolation(&self, tx: &Transaction) -> TxResult<()> {
        if !tx.is_coinbase() && tx.inputs.is_empty() {
            return Err(TxRuleError::NoTxInputs);
        }
        if tx.inputs.len() > self.params.max_tx_inputs {
            return Err(TxRuleError::TooManyInputs(tx.inputs.len(), self.params.max_tx_inputs));
        }
        // Bounding script sizes keeps the mass calculation from overflowing
        if let Some(i) = tx.inputs.iter().position(|input| input.signature_script.len() > self.params.max_signature_script_len) {
            return Err(TxRuleError::TooBigSignatureScript(i, self.params.max_signature_script_len));
        }
        Ok(())
    }

    fn check_transaction_outputs_in_isolation(&self, tx: &Transaction) -> TxResult<()> {
        if tx.outputs.len() > self.params.max_tx_outputs {
            return Err(TxRuleError::TooManyOutputs(tx.outputs.len(), self.params.max_tx_outputs));
        }
        if let Some(i) =
            tx.outputs.iter().position(|output| output.script_public_key.script().len() > self.params.max_script_public_key_len)
        {
            return Err(TxRuleError::TooBigScriptPublicKey(i, self.params.max_script_public_key_len));
        }

        let mut total: u64 = 0;
        for (i, output) in tx.outputs.iter().enumerate() {
            if output.value == 0 {
                return Err(TxRuleError::TxOutValueZero(i));
            }
            if output.value > MAX_SOMPI {
                return Err(TxRuleError::BadTxOutValue(i, output.value));
            }
            total = total.checked_add(output.value).filter(|&t| t <= MAX_SOMPI).ok_or(TxRuleError::OutputsValueOverflow)?;
        }
        Ok(())
    }

    fn check_coinbase_in_isolation(&self, tx: &Transaction, daa_score: u64) -> TxResult<()> {
        if !tx.inputs.is_empty() {
            return Err(TxRuleError::CoinbaseWithInputs(tx.inputs.len()));
        }
        if tx.payload.len() > self.params.max_coinbase_payload_len {
            return Err(TxRuleError::BadCoinbasePayloadLen(tx.payload.len(), self.params.max_coinbase_payload_len));
        }
        let max_outputs = self.params.block_version(daa_score).max_coinbase_outputs();
        if tx.outputs.len() as u64 > max_outputs {
            return Err(TxRuleError::CoinbaseTooManyOutputs(tx.outputs.len(), max_outputs));
        }
        let max_spk_len = self.params.max_coinbase_script_public_key_len;
        if let Some((i, output)) =
            tx.outputs.iter().enumerate().find(|(_, output)| output.script_public_key.script().len() > max_spk_len)
        {
            return Err(TxRuleError::CoinbaseTooLongScriptPublicKey(i, output.script_public_key.script().len(), max_spk_len));
        }
        Ok(())
    }

    fn check_subnetwork(&self, tx: &Transaction) -> TxResult<()> {
        if !self.params.enable_non_native_subnetworks && !tx.subnetwork_id.is_builtin_or_native() {
            return Err(TxRuleError::SubnetworksDisabled(tx.subnetwork_id));
        }
        Ok(())
    }
}

fn check_transaction_version(tx: &Transaction) -> TxResult<()> {
    if tx.version > MAX_TX_VERSION {
        return Err(TxRuleError::TransactionVersionIsUnknown(tx.version));
    }
    Ok(())
}

fn check_duplicate_transaction_inputs(tx: &Transaction) -> TxResult<()> {
    let mut existing = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !existing.insert(input.previous_outpoint) {
            return Err(TxRuleError::DuplicateTxInputs);
        }
    }
    Ok(())
}

/// Native and built-in subnetworks never carry gas
fn check_gas(tx: &Transaction) -> TxResult<()> {
    if tx.subnetwork_id.is_builtin_or_native() && tx.gas > 0 {
        return Err(TxRuleError::InvalidGas(tx.subnetwork_id, tx.gas));
    }
    Ok(())
}

fn check_transaction_payload(tx: &Transaction) -> TxResult<()> {
    if tx.is_coinbase() {
        return Ok(());
    }
    if tx.subnetwork_id.is_native() && !tx.payload.is_empty() {
        return Err(TxRuleError::InvalidPayload("native transactions cannot carry a payload".to_string()));
    }
    if tx.subnetwork_id == SUBNETWORK_ID_REGISTRY && tx.payload.len() != REGISTRY_PAYLOAD_LEN {
        return Err(TxRuleError::SubnetworkRegistry(tx.payload.len(), REGISTRY_PAYLOAD_LEN));
    }
    if tx.subnetwork_id == SUBNETWORK_ID_DATA {
        validate_data_payload(&tx.payload).map_err(|err| TxRuleError::InvalidPayload(err.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_consensus_core::{
        config::params::MAINNET_PARAMS,
        constants::TX_VERSION,
        subnets::{SUBNETWORK_ID_COINBASE, SUBNETWORK_ID_NATIVE, SubnetworkId},
        tx::{ScriptPublicKey, TransactionInput, TransactionOutpoint, TransactionOutput, scriptvec},
    };
    use kestrel_hashes::Hash;
    use kestrel_txscript::SigCache;

    fn validator() -> TransactionValidator {
        TransactionValidator::new(&MAINNET_PARAMS, SigCache::new(100))
    }

    fn spk() -> ScriptPublicKey {
        ScriptPublicKey::new(0, scriptvec![0x51])
    }

    fn native_tx(outputs: &[u64]) -> Transaction {
        let input = TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(1), 0), vec![], 0, 0);
        let outputs = outputs.iter().map(|&v| TransactionOutput::new(v, spk())).collect();
        Transaction::new(TX_VERSION, vec![input], outputs, 0, SUBNETWORK_ID_NATIVE, 0, vec![])
    }

    #[test]
    fn test_output_values() {
        let tv = validator();
        assert_eq!(tv.validate_tx_in_isolation(&native_tx(&[10, 20]), 0), Ok(()));
        assert_eq!(tv.validate_tx_in_isolation(&native_tx(&[0]), 0), Err(TxRuleError::TxOutValueZero(0)));
        assert_eq!(tv.validate_tx_in_isolation(&native_tx(&[1, MAX_SOMPI + 1]), 0), Err(TxRuleError::BadTxOutValue(1, MAX_SOMPI + 1)));
        assert_eq!(tv.validate_tx_in_isolation(&native_tx(&[MAX_SOMPI, 1]), 0), Err(TxRuleError::OutputsValueOverflow));
    }

    #[test]
    fn test_inputs() {
        let tv = validator();
        let mut tx = native_tx(&[1]);
        tx.inputs.clear();
        assert_eq!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::NoTxInputs));

        let mut tx = native_tx(&[1]);
        tx.inputs.push(tx.inputs[0].clone());
        assert_eq!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::DuplicateTxInputs));

        let mut tx = native_tx(&[1]);
        tx.version = TX_VERSION + 1;
        assert_eq!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::TransactionVersionIsUnknown(TX_VERSION + 1)));
    }

    #[test]
    fn test_coinbase_rules() {
        let tv = validator();
        let max_outputs = MAINNET_PARAMS.block_version(0).max_coinbase_outputs();
        let coinbase = |outputs: u64, payload_len: usize| {
            let outputs = (0..outputs).map(|_| TransactionOutput::new(1, spk())).collect();
            Transaction::new(TX_VERSION, vec![], outputs, 0, SUBNETWORK_ID_COINBASE, 0, vec![0; payload_len])
        };

        assert_eq!(tv.validate_tx_in_isolation(&coinbase(max_outputs, 20), 0), Ok(()));
        assert_eq!(
            tv.validate_tx_in_isolation(&coinbase(max_outputs + 1, 20), 0),
            Err(TxRuleError::CoinbaseTooManyOutputs(max_outputs as usize + 1, max_outputs))
        );
        let too_long = MAINNET_PARAMS.max_coinbase_payload_len + 1;
        assert_eq!(
            tv.validate_tx_in_isolation(&coinbase(1, too_long), 0),
            Err(TxRuleError::BadCoinbasePayloadLen(too_long, MAINNET_PARAMS.max_coinbase_payload_len))
        );

        let mut with_input = coinbase(1, 20);
        with_input.inputs.push(TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(1), 0), vec![], 0, 0));
        assert_eq!(tv.validate_tx_in_isolation(&with_input, 0), Err(TxRuleError::CoinbaseWithInputs(1)));

        let mut long_spk = coinbase(1, 20);
        let len = MAINNET_PARAMS.max_coinbase_script_public_key_len + 1;
        long_spk.outputs[0].script_public_key = ScriptPublicKey::from_vec(0, vec![0; len]);
        assert_eq!(
            tv.validate_tx_in_isolation(&long_spk, 0),
            Err(TxRuleError::CoinbaseTooLongScriptPublicKey(0, len, MAINNET_PARAMS.max_coinbase_script_public_key_len))
        );
    }

    #[test]
    fn test_subnetwork_rules() {
        let tv = validator();

        let mut tx = native_tx(&[1]);
        tx.subnetwork_id = SubnetworkId::from_byte(9);
        assert_eq!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::SubnetworksDisabled(tx.subnetwork_id)));

        let mut tx = native_tx(&[1]);
        tx.gas = 5;
        assert_eq!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::InvalidGas(SUBNETWORK_ID_NATIVE, 5)));

        let mut tx = native_tx(&[1]);
        tx.payload = vec![1];
        assert!(matches!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::InvalidPayload(_))));

        let mut tx = native_tx(&[1]);
        tx.subnetwork_id = SUBNETWORK_ID_REGISTRY;
        tx.payload = vec![0; 3];
        assert_eq!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::SubnetworkRegistry(3, REGISTRY_PAYLOAD_LEN)));
    }

    #[test]
    fn test_data_subnetwork_payload() {
        let tv = validator();
        let mut tx = native_tx(&[1]);
        tx.subnetwork_id = SUBNETWORK_ID_DATA;

        tx.payload = faster_hex::hex_string(br#"{"memo":"hello","n":[1,2,3]}"#).into_bytes();
        assert_eq!(tv.validate_tx_in_isolation(&tx, 0), Ok(()));

        tx.payload = b"not hex".to_vec();
        assert!(matches!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::InvalidPayload(_))));

        let blob = "ab".repeat(100);
        tx.payload = faster_hex::hex_string(format!(r#"{{"blob":"{blob}"}}"#).as_bytes()).into_bytes();
        assert!(matches!(tv.validate_tx_in_isolation(&tx, 0), Err(TxRuleError::InvalidPayload(_))));
    }
}
