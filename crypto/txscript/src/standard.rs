use crate::{
    opcodes::codes::{OpBlake3, OpCheckSig, OpCheckSigECDSA, OpCheckTemplateVerify, OpData32, OpData33, OpEqual, OpTrue},
    script_builder::{ScriptBuilder, ScriptBuilderResult},
    script_class::ScriptClass,
};
use kestrel_consensus_core::tx::{ScriptPublicKey, ScriptVec};
use kestrel_hashes::Hash;
use std::iter::once;

/// Pays to a 32-byte Schnorr x-only public key
pub fn pay_to_pub_key(pub_key: &[u8; 32]) -> ScriptPublicKey {
    let script = ScriptVec::from_iter(once(OpData32).chain(pub_key.iter().copied()).chain(once(OpCheckSig)));
    ScriptPublicKey::new(ScriptClass::PubKey.version(), script)
}

/// Pays to a 33-byte compressed ECDSA public key
pub fn pay_to_pub_key_ecdsa(pub_key: &[u8; 33]) -> ScriptPublicKey {
    let script = ScriptVec::from_iter(once(OpData33).chain(pub_key.iter().copied()).chain(once(OpCheckSigECDSA)));
    ScriptPublicKey::new(ScriptClass::PubKeyECDSA.version(), script)
}

/// Takes a redeem script and returns the pay-to-script-hash script committing to its blake3 hash
pub fn pay_to_script_hash_script(redeem_script: &[u8]) -> ScriptPublicKey {
    let redeem_script_hash = blake3::hash(redeem_script);
    let script = ScriptVec::from_iter(
        [OpBlake3, OpData32].into_iter().chain(redeem_script_hash.as_bytes().iter().copied()).chain(once(OpEqual)),
    );
    ScriptPublicKey::new(ScriptClass::ScriptHash.version(), script)
}

/// Signature script for a pay-to-script-hash output: the given signature pushes followed by the redeem script push
pub fn pay_to_script_hash_signature_script(redeem_script: Vec<u8>, signature: Vec<u8>) -> ScriptBuilderResult<Vec<u8>> {
    let redeem_script_as_data = ScriptBuilder::new().add_data(&redeem_script)?.drain();
    Ok(signature.into_iter().chain(redeem_script_as_data).collect())
}

/// Locks an output to the single transaction shape whose template hash is `template_hash`.
/// The spending input needs an empty signature script.
pub fn pay_to_template_hash(template_hash: Hash) -> ScriptPublicKey {
    let script = ScriptVec::from_iter(
        once(OpData32).chain(template_hash.as_bytes()).chain([OpCheckTemplateVerify, OpTrue]),
    );
    ScriptPublicKey::new(ScriptClass::TemplateLock.version(), script)
}

/// Returns the public key or script hash a standard script pays to
pub fn extract_script_pub_key_payload(script_public_key: &ScriptPublicKey) -> Option<&[u8]> {
    let script = script_public_key.script();
    match ScriptClass::from_script(script_public_key) {
        ScriptClass::PubKey => Some(&script[1..33]),
        ScriptClass::PubKeyECDSA => Some(&script[1..34]),
        ScriptClass::ScriptHash => Some(&script[2..34]),
        ScriptClass::TemplateLock => Some(&script[1..33]),
        ScriptClass::NonStandard => None,
    }
}

pub mod test_helpers {
    use super::*;
    use kestrel_consensus_core::{
        constants::TX_VERSION,
        subnets::SUBNETWORK_ID_NATIVE,
        tx::{Transaction, TransactionInput, TransactionOutpoint, TransactionOutput},
    };

    /// A script public key anyone can spend with an empty signature script
    pub fn op_true_script() -> ScriptPublicKey {
        ScriptPublicKey::new(0, ScriptVec::from_slice(&[OpTrue]))
    }

    /// Creates a transaction spending `outpoints` into `outputs` values, all paying to `op_true_script`
    pub fn create_transaction(outpoints: &[TransactionOutpoint], outputs: &[u64]) -> Transaction {
        let inputs = outpoints.iter().map(|&outpoint| TransactionInput::new(outpoint, vec![], 0, 0)).collect();
        let outputs = outputs.iter().map(|&value| TransactionOutput::new(value, op_true_script())).collect();
        Transaction::new(TX_VERSION, inputs, outputs, 0, SUBNETWORK_ID_NATIVE, 0, vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_payload() {
        let key = [7u8; 32];
        assert_eq!(extract_script_pub_key_payload(&pay_to_pub_key(&key)), Some(key.as_slice()));
        let ecdsa = [3u8; 33];
        assert_eq!(extract_script_pub_key_payload(&pay_to_pub_key_ecdsa(&ecdsa)), Some(ecdsa.as_slice()));
        let p2sh = pay_to_script_hash_script(&[OpTrue]);
        assert_eq!(extract_script_pub_key_payload(&p2sh), Some(blake3::hash(&[OpTrue]).as_bytes().as_slice()));
        assert_eq!(extract_script_pub_key_payload(&test_helpers::op_true_script()), None);
    }

    #[test]
    fn test_p2sh_signature_script() {
        let script = pay_to_script_hash_signature_script(vec![OpTrue, OpTrue], vec![0x02, 0xaa, 0xbb]).unwrap();
        assert_eq!(script, vec![0x02, 0xaa, 0xbb, 0x02, OpTrue, OpTrue]);
    }
}
