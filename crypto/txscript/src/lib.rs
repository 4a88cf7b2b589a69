pub mod caches;
mod data_stack;
pub mod opcodes;
pub mod script_builder;
pub mod script_class;
pub mod standard;

use crate::caches::Cache;
use crate::data_stack::{DataStack, Stack};
use crate::opcodes::{OpCond, ParsedOpcode, codes, count_sig_ops, parse_script};
use kestrel_consensus_core::constants::MAX_SCRIPT_PUBLIC_KEY_VERSION;
use kestrel_consensus_core::hashing::sighash::{SigHashReusedValues, calc_ecdsa_signature_hash, calc_schnorr_signature_hash};
use kestrel_consensus_core::hashing::sighash_type::SigHashType;
use kestrel_consensus_core::tx::{ScriptPublicKey, TransactionInput, UtxoEntry, VerifiableTransaction};
use log::trace;
use script_class::ScriptClass;

pub use kestrel_txscript_errors::TxScriptError;
pub use standard::*;

pub const MAX_STACK_SIZE: usize = 244;
pub const MAX_SCRIPTS_SIZE: usize = 10_000;
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
pub const MAX_OPS_PER_SCRIPT: i32 = 201;
pub const MAX_PUB_KEYS_PER_MULTISIG: i32 = 20;

#[derive(Clone, Hash, PartialEq, Eq)]
enum Signature {
    Schnorr(secp256k1::schnorr::Signature),
    Ecdsa(secp256k1::ecdsa::Signature),
}

#[derive(Clone, Hash, PartialEq, Eq)]
enum PublicKey {
    Schnorr(secp256k1::XOnlyPublicKey),
    Ecdsa(secp256k1::PublicKey),
}

/// Key of the shared signature verification cache. The message commits to the spending transaction.
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct SigCacheKey {
    signature: Signature,
    pub_key: PublicKey,
    message: secp256k1::Message,
}

pub type SigCache = Cache<SigCacheKey, bool>;

enum ScriptSource<'a, T: VerifiableTransaction> {
    TxInput { tx: &'a T, input: &'a TransactionInput, idx: usize, utxo_entry: &'a UtxoEntry, is_p2sh: bool },
    StandAloneScripts(Vec<&'a [u8]>),
}

pub struct TxScriptEngine<'a, T: VerifiableTransaction> {
    dstack: Stack,
    astack: Stack,

    script_source: ScriptSource<'a, T>,
    script_version: u16,

    reused_values: &'a mut SigHashReusedValues,
    sig_cache: &'a SigCache,

    cond_stack: Vec<OpCond>,
    num_ops: i32,

    // Declared by the input. Standalone scripts are not metered.
    sig_op_limit: Option<u8>,
    used_sig_ops: u8,
}

/// Upper bound of signature operations in an input, computed without executing anything.
/// For P2SH outputs the redeem script (last push of the signature script) is counted instead.
#[must_use]
pub fn get_sig_op_count_upper_bound(signature_script: &[u8], prev_script_public_key: &ScriptPublicKey) -> u64 {
    if !ScriptClass::is_pay_to_script_hash(prev_script_public_key.script()) {
        return count_sig_ops(prev_script_public_key.script());
    }
    let Ok(sig_ops) = parse_script(signature_script).collect::<Result<Vec<_>, _>>() else {
        return 0;
    };
    match sig_ops.last() {
        Some(last) if sig_ops.iter().all(ParsedOpcode::is_push_opcode) => count_sig_ops(last.data),
        _ => 0,
    }
}

/// Whether the script is guaranteed to fail, so the output can be left out of the UTXO set
pub fn is_unspendable(script: &[u8]) -> bool {
    parse_script(script).enumerate().any(|(index, op)| match op {
        Err(_) => true,
        Ok(op) => index == 0 && op.code == codes::OpReturn,
    })
}

impl<'a, T: VerifiableTransaction> TxScriptEngine<'a, T> {
    /// Creates an engine validating input `input_idx` of `tx` against the UTXO it spends
    pub fn from_transaction_input(
        tx: &'a T,
        input: &'a TransactionInput,
        input_idx: usize,
        utxo_entry: &'a UtxoEntry,
        reused_values: &'a mut SigHashReusedValues,
        sig_cache: &'a SigCache,
    ) -> Result<Self, TxScriptError> {
        let inputs_len = tx.tx().inputs.len();
        if input_idx >= inputs_len {
            return Err(TxScriptError::InvalidIndex(input_idx, inputs_len));
        }
        let is_p2sh = ScriptClass::is_pay_to_script_hash(utxo_entry.script_public_key.script());
        Ok(Self {
            dstack: Default::default(),
            astack: Default::default(),
            script_source: ScriptSource::TxInput { tx, input, idx: input_idx, utxo_entry, is_p2sh },
            script_version: utxo_entry.script_public_key.version(),
            reused_values,
            sig_cache,
            cond_stack: Default::default(),
            num_ops: 0,
            sig_op_limit: Some(input.sig_op_count),
            used_sig_ops: 0,
        })
    }

    pub fn from_script(
        script: &'a [u8],
        script_version: u16,
        reused_values: &'a mut SigHashReusedValues,
        sig_cache: &'a SigCache,
    ) -> Self {
        Self {
            dstack: Default::default(),
            astack: Default::default(),
            script_source: ScriptSource::StandAloneScripts(vec![script]),
            script_version,
            reused_values,
            sig_cache,
            cond_stack: Default::default(),
            num_ops: 0,
            sig_op_limit: None,
            used_sig_ops: 0,
        }
    }

    #[inline]
    pub fn is_executing(&self) -> bool {
        self.cond_stack.last().is_none_or(|cond| *cond == OpCond::True)
    }

    pub fn used_sig_ops(&self) -> u8 {
        self.used_sig_ops
    }

    fn execute_script(&mut self, script: &[u8], verify_only_push: bool) -> Result<(), TxScriptError> {
        let script_result = parse_script(script).try_for_each(|opcode| {
            let opcode = opcode?;
            if opcode.is_disabled(self.script_version) {
                if opcode.requires_covenant_version() {
                    return Err(TxScriptError::OpcodeUnavailableInVersion(format!("{opcode:?}"), self.script_version));
                }
                return Err(TxScriptError::OpcodeDisabled(format!("{opcode:?}")));
            }
            if opcode.always_illegal() {
                return Err(TxScriptError::OpcodeReserved(format!("{opcode:?}")));
            }
            if verify_only_push && !opcode.is_push_opcode() {
                return Err(TxScriptError::SignatureScriptNotPushOnly);
            }

            self.execute_opcode(opcode)?;

            let combined_size = self.astack.len() + self.dstack.len();
            if combined_size > MAX_STACK_SIZE {
                return Err(TxScriptError::StackSizeExceeded(combined_size, MAX_STACK_SIZE));
            }
            Ok(())
        });

        // Conditionals may not span scripts
        if script_result.is_ok() && !self.cond_stack.is_empty() {
            return Err(TxScriptError::UnbalancedConditional);
        }

        // The alt stack and operation count are per script
        self.astack.clear();
        self.num_ops = 0;

        script_result
    }

    pub fn execute(&mut self) -> Result<(), TxScriptError> {
        let (scripts, is_p2sh) = match &self.script_source {
            ScriptSource::TxInput { input, utxo_entry, is_p2sh, .. } => {
                let version = utxo_entry.script_public_key.version();
                if version > MAX_SCRIPT_PUBLIC_KEY_VERSION {
                    trace!("rejecting script public key of unknown version {version}");
                    return Err(TxScriptError::UnknownScriptVersion(version));
                }
                (vec![input.signature_script.as_slice(), utxo_entry.script_public_key.script()], *is_p2sh)
            }
            ScriptSource::StandAloneScripts(scripts) => (scripts.clone(), false),
        };

        if scripts.is_empty() {
            return Err(TxScriptError::NoScripts);
        }
        // Nothing can leave a true value on the stack
        if scripts.iter().all(|s| s.is_empty()) {
            return Err(TxScriptError::EvalFalse);
        }
        if let Some(s) = scripts.iter().find(|s| s.len() > MAX_SCRIPTS_SIZE) {
            return Err(TxScriptError::ScriptSize(s.len(), MAX_SCRIPTS_SIZE));
        }

        let is_tx_input = matches!(self.script_source, ScriptSource::TxInput { .. });
        let mut saved_stack: Option<Stack> = None;
        for (idx, script) in scripts.iter().enumerate().filter(|(_, s)| !s.is_empty()) {
            // The signature script may only push data
            let verify_only_push = idx == 0 && is_tx_input;
            if is_p2sh && idx == 1 {
                saved_stack = Some(self.dstack.clone());
            }
            self.execute_script(script, verify_only_push)?;
        }

        if is_p2sh {
            // The script public key only proves the redeem script hash. Run the redeem script over the remaining pushes.
            self.check_error_condition(false)?;
            self.dstack = saved_stack.ok_or(TxScriptError::EmptyStack)?;
            let redeem_script = self.dstack.pop().ok_or(TxScriptError::EmptyStack)?;
            self.execute_script(&redeem_script, false)?;
        }

        self.check_error_condition(true)
    }

    // Verifies the stack holds a single true value once the final script ran
    fn check_error_condition(&mut self, final_script: bool) -> Result<(), TxScriptError> {
        if final_script {
            if self.dstack.len() > 1 {
                return Err(TxScriptError::CleanStack(self.dstack.len() - 1));
            } else if self.dstack.is_empty() {
                return Err(TxScriptError::EmptyStack);
            }
        }
        let [v]: [bool; 1] = self.dstack.pop_items()?;
        if v { Ok(()) } else { Err(TxScriptError::EvalFalse) }
    }

    fn consume_sig_op(&mut self) -> Result<(), TxScriptError> {
        self.used_sig_ops = self.used_sig_ops.saturating_add(1);
        match self.sig_op_limit {
            Some(limit) if self.used_sig_ops > limit => Err(TxScriptError::SigOpCountExceeded(limit)),
            _ => Ok(()),
        }
    }

    fn check_pub_key_encoding(pub_key: &[u8]) -> Result<(), TxScriptError> {
        match pub_key.len() {
            32 => Ok(()),
            _ => Err(TxScriptError::PubKeyFormat),
        }
    }

    fn check_pub_key_encoding_ecdsa(pub_key: &[u8]) -> Result<(), TxScriptError> {
        match pub_key.len() {
            33 => Ok(()),
            _ => Err(TxScriptError::PubKeyFormat),
        }
    }

    fn verify_cached(&self, key: SigCacheKey, verify: impl FnOnce() -> bool) -> bool {
        if let Some(valid) = self.sig_cache.get(&key) {
            return valid;
        }
        let valid = verify();
        self.sig_cache.insert(key, valid);
        valid
    }

    pub(crate) fn check_schnorr_signature(&mut self, hash_type: SigHashType, key: &[u8], sig: &[u8]) -> Result<bool, TxScriptError> {
        self.consume_sig_op()?;
        let ScriptSource::TxInput { tx, idx, .. } = self.script_source else {
            return Err(TxScriptError::NotATransactionInput);
        };
        if sig.len() != 64 {
            return Err(TxScriptError::SigLength(sig.len()));
        }
        Self::check_pub_key_encoding(key)?;
        let pk = secp256k1::XOnlyPublicKey::from_slice(key).map_err(TxScriptError::InvalidSignature)?;
        let sig = secp256k1::schnorr::Signature::from_slice(sig).map_err(TxScriptError::InvalidSignature)?;
        let sig_hash = calc_schnorr_signature_hash(tx, idx, hash_type, self.reused_values);
        let msg = secp256k1::Message::from_digest(sig_hash.as_bytes());
        let cache_key = SigCacheKey { signature: Signature::Schnorr(sig), pub_key: PublicKey::Schnorr(pk), message: msg };
        Ok(self.verify_cached(cache_key, || sig.verify(&msg, &pk).is_ok()))
    }

    pub(crate) fn check_ecdsa_signature(&mut self, hash_type: SigHashType, key: &[u8], sig: &[u8]) -> Result<bool, TxScriptError> {
        self.consume_sig_op()?;
        let ScriptSource::TxInput { tx, idx, .. } = self.script_source else {
            return Err(TxScriptError::NotATransactionInput);
        };
        if sig.len() != 64 {
            return Err(TxScriptError::SigLength(sig.len()));
        }
        Self::check_pub_key_encoding_ecdsa(key)?;
        let pk = secp256k1::PublicKey::from_slice(key).map_err(TxScriptError::InvalidSignature)?;
        let sig = secp256k1::ecdsa::Signature::from_compact(sig).map_err(TxScriptError::InvalidSignature)?;
        let sig_hash = calc_ecdsa_signature_hash(tx, idx, hash_type, self.reused_values);
        let msg = secp256k1::Message::from_digest(sig_hash.as_bytes());
        let cache_key = SigCacheKey { signature: Signature::Ecdsa(sig), pub_key: PublicKey::Ecdsa(pk), message: msg };
        Ok(self.verify_cached(cache_key, || sig.verify(&msg, &pk).is_ok()))
    }

    pub(crate) fn op_check_multisig(&mut self, ecdsa: bool) -> Result<(), TxScriptError> {
        let [num_keys]: [i32; 1] = self.dstack.pop_items()?;
        if num_keys < 0 {
            return Err(TxScriptError::InvalidPubKeyCount(format!("number of pubkeys {num_keys} is negative")));
        } else if num_keys > MAX_PUB_KEYS_PER_MULTISIG {
            return Err(TxScriptError::InvalidPubKeyCount(format!("too many pubkeys {num_keys} > {MAX_PUB_KEYS_PER_MULTISIG}")));
        }
        let num_keys = num_keys as usize;

        self.num_ops += num_keys as i32;
        if self.num_ops > MAX_OPS_PER_SCRIPT {
            return Err(TxScriptError::TooManyOperations(MAX_OPS_PER_SCRIPT));
        }
        if self.dstack.len() < num_keys {
            return Err(TxScriptError::InvalidStackOperation(num_keys, self.dstack.len()));
        }
        let pub_keys = self.dstack.split_off(self.dstack.len() - num_keys);

        let [num_sigs]: [i32; 1] = self.dstack.pop_items()?;
        if num_sigs < 0 {
            return Err(TxScriptError::InvalidSignatureCount(format!("number of signatures {num_sigs} is negative")));
        } else if num_sigs as usize > num_keys {
            return Err(TxScriptError::InvalidSignatureCount(format!("more signatures than pubkeys {num_sigs} > {num_keys}")));
        }
        let num_sigs = num_sigs as usize;
        if self.dstack.len() < num_sigs {
            return Err(TxScriptError::InvalidStackOperation(num_sigs, self.dstack.len()));
        }
        let signatures = self.dstack.split_off(self.dstack.len() - num_sigs);

        // Signatures must appear in the same order as their keys. Every check consumes a key.
        let mut failed = false;
        let mut pub_key_iter = pub_keys.iter();
        'sigs: for (sig_idx, signature) in signatures.iter().enumerate() {
            let Some((&typ, signature)) = signature.split_last() else {
                failed = true;
                break;
            };
            let hash_type = SigHashType::from_u8(typ).map_err(|_| TxScriptError::InvalidSigHashType(typ))?;
            loop {
                // Not enough keys left to match the remaining signatures
                if pub_key_iter.len() < num_sigs - sig_idx {
                    failed = true;
                    break 'sigs;
                }
                let Some(pub_key) = pub_key_iter.next() else {
                    failed = true;
                    break 'sigs;
                };
                let valid = if ecdsa {
                    self.check_ecdsa_signature(hash_type, pub_key, signature)?
                } else {
                    self.check_schnorr_signature(hash_type, pub_key, signature)?
                };
                if valid {
                    break;
                }
            }
        }

        if failed && signatures.iter().any(|sig| !sig.is_empty()) {
            return Err(TxScriptError::NullFail);
        }
        self.dstack.push_item(!failed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::codes::*;
    use crate::script_builder::ScriptBuilder;
    use kestrel_consensus_core::hashing::sighash_type::SIG_HASH_ALL;
    use kestrel_consensus_core::hashing::template::calc_template_hash;
    use kestrel_consensus_core::subnets::SUBNETWORK_ID_NATIVE;
    use kestrel_consensus_core::tx::{PopulatedTransaction, Transaction, TransactionOutpoint, TransactionOutput};
    use kestrel_hashes::Hash;
    use secp256k1::{Keypair, Secp256k1};

    struct ScriptTestCase {
        script: &'static [u8],
        expected_result: Result<(), TxScriptError>,
    }

    fn spend(spk: ScriptPublicKey, signature_script: Vec<u8>, sig_op_count: u8) -> (Transaction, UtxoEntry) {
        let input = TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(7), 0), signature_script, 0, sig_op_count);
        let output = TransactionOutput::new(1_000, ScriptPublicKey::from_vec(0, vec![OpTrue]));
        let tx = Transaction::new(0, vec![input], vec![output], 0, SUBNETWORK_ID_NATIVE, 0, vec![]);
        let entry = UtxoEntry::new(5_000, spk, 0, false);
        (tx, entry)
    }

    fn execute_spend(tx: &Transaction, entry: &UtxoEntry) -> Result<(), TxScriptError> {
        let sig_cache = Cache::new(1_000);
        let mut reused = SigHashReusedValues::new();
        let populated = PopulatedTransaction::new(tx, vec![entry.clone()]);
        let mut vm = TxScriptEngine::from_transaction_input(&populated, &tx.inputs[0], 0, entry, &mut reused, &sig_cache)?;
        vm.execute()
    }

    fn run_test_script_cases(test_cases: Vec<ScriptTestCase>) {
        for test in test_cases {
            let (tx, entry) = spend(ScriptPublicKey::from_vec(0, test.script.to_vec()), vec![], 0);
            assert_eq!(execute_spend(&tx, &entry), test.expected_result, "script {:x?}", test.script);
        }
    }

    fn keypair(seed: u8) -> Keypair {
        Keypair::from_seckey_slice(&Secp256k1::new(), &[seed; 32]).unwrap()
    }

    fn schnorr_sign(tx: &Transaction, entry: &UtxoEntry, keypair: &Keypair) -> Vec<u8> {
        let populated = PopulatedTransaction::new(tx, vec![entry.clone()]);
        let hash = calc_schnorr_signature_hash(&populated, 0, SIG_HASH_ALL, &mut SigHashReusedValues::new());
        let sig = keypair.sign_schnorr(secp256k1::Message::from_digest(hash.as_bytes()));
        let mut signature = sig.as_ref().to_vec();
        signature.push(SIG_HASH_ALL.to_u8());
        signature
    }

    #[test]
    fn test_check_error_condition() {
        run_test_script_cases(vec![
            ScriptTestCase { script: &[OpTrue], expected_result: Ok(()) },
            ScriptTestCase { script: &[OpNop], expected_result: Err(TxScriptError::EmptyStack) },
            ScriptTestCase { script: &[OpTrue, OpTrue], expected_result: Err(TxScriptError::CleanStack(1)) },
            ScriptTestCase { script: &[OpFalse], expected_result: Err(TxScriptError::EvalFalse) },
        ]);
    }

    #[test]
    fn test_conditionals() {
        run_test_script_cases(vec![
            ScriptTestCase { script: &[OpIf], expected_result: Err(TxScriptError::EmptyStack) },
            ScriptTestCase { script: &[Op2, OpIf], expected_result: Err(TxScriptError::InvalidState("expected boolean".to_string())) },
            ScriptTestCase { script: &[OpTrue, OpIf], expected_result: Err(TxScriptError::UnbalancedConditional) },
            ScriptTestCase { script: &[OpTrue, OpIf, OpTrue, OpEndIf], expected_result: Ok(()) },
            ScriptTestCase { script: &[OpFalse, OpIf, OpTrue, OpEndIf], expected_result: Err(TxScriptError::EmptyStack) },
            ScriptTestCase { script: &[OpFalse, OpIf, OpElse, OpTrue, OpEndIf], expected_result: Ok(()) },
            ScriptTestCase {
                script: &[OpTrue, OpNotIf, OpTrue, OpElse, OpFalse, OpEndIf],
                expected_result: Err(TxScriptError::EvalFalse),
            },
            ScriptTestCase {
                script: &[OpElse],
                expected_result: Err(TxScriptError::InvalidState("condition stack empty".to_string())),
            },
            // Nested conditionals inside an unexecuted branch stay balanced
            ScriptTestCase {
                script: &[OpTrue, OpFalse, OpIf, OpIf, OpFalse, OpElse, OpFalse, OpEndIf, OpEndIf],
                expected_result: Ok(()),
            },
            // Disabled opcodes fail even when not executed
            ScriptTestCase {
                script: &[OpTrue, OpFalse, OpIf, OpMul, OpEndIf],
                expected_result: Err(TxScriptError::OpcodeDisabled("Opcode<0x95>{ data: [] }".to_string())),
            },
        ]);
    }

    #[test]
    fn test_arithmetic_and_hashing() {
        run_test_script_cases(vec![
            ScriptTestCase { script: &[Op2, Op3, OpAdd, Op3, Op2, OpAdd, OpNumEqual], expected_result: Ok(()) },
            ScriptTestCase { script: &[Op3, Op2, OpSub, Op1, OpEqual], expected_result: Ok(()) },
            ScriptTestCase { script: &[OpTrue, OpVerify], expected_result: Err(TxScriptError::EmptyStack) },
            ScriptTestCase { script: &[OpFalse, OpVerify, OpTrue], expected_result: Err(TxScriptError::VerifyError) },
            ScriptTestCase { script: &[OpReturn], expected_result: Err(TxScriptError::EarlyReturn) },
            ScriptTestCase { script: &[Op1, Op2, Op3, OpWithin], expected_result: Err(TxScriptError::EvalFalse) },
            ScriptTestCase { script: &[Op2, Op1, Op3, OpWithin], expected_result: Ok(()) },
            ScriptTestCase {
                script: &[OpFalse, OpSHA256, OpSize, OpData1, 32, OpEqualVerify, OpDrop, OpTrue],
                expected_result: Ok(()),
            },
        ]);
    }

    #[test]
    fn test_non_minimal_push_is_rejected() {
        let (tx, entry) = spend(ScriptPublicKey::from_vec(0, vec![OpData1, 0x01]), vec![], 0);
        assert!(matches!(execute_spend(&tx, &entry), Err(TxScriptError::NotMinimalData(_))));
    }

    #[test]
    fn test_unknown_script_version() {
        let version = MAX_SCRIPT_PUBLIC_KEY_VERSION + 1;
        let (tx, entry) = spend(ScriptPublicKey::from_vec(version, vec![OpTrue]), vec![], 0);
        assert_eq!(execute_spend(&tx, &entry), Err(TxScriptError::UnknownScriptVersion(version)));
    }

    #[test]
    fn test_splice_opcodes_depend_on_version() {
        let script = ScriptBuilder::new()
            .add_data(b"kest")
            .unwrap()
            .add_data(b"rel")
            .unwrap()
            .add_op(OpCat)
            .unwrap()
            .add_i64(1)
            .unwrap()
            .add_i64(3)
            .unwrap()
            .add_op(OpSubStr)
            .unwrap()
            .add_data(b"est")
            .unwrap()
            .add_op(OpEqual)
            .unwrap()
            .drain();

        let (tx, entry) = spend(ScriptPublicKey::from_vec(1, script.clone()), vec![], 0);
        assert_eq!(execute_spend(&tx, &entry), Ok(()));

        let (tx, entry) = spend(ScriptPublicKey::from_vec(0, script), vec![], 0);
        assert!(matches!(execute_spend(&tx, &entry), Err(TxScriptError::OpcodeUnavailableInVersion(_, 0))));
    }

    #[test]
    fn test_signature_script_must_be_push_only() {
        let (tx, entry) = spend(ScriptPublicKey::from_vec(0, vec![OpTrue]), vec![OpTrue, OpDup], 0);
        assert_eq!(execute_spend(&tx, &entry), Err(TxScriptError::SignatureScriptNotPushOnly));
    }

    #[test]
    fn test_pay_to_pub_key() {
        let kp = keypair(3);
        let spk = pay_to_pub_key(&kp.x_only_public_key().0.serialize());
        let (mut tx, entry) = spend(spk, vec![], 1);
        let signature = schnorr_sign(&tx, &entry, &kp);
        tx.inputs[0].signature_script = ScriptBuilder::new().add_data(&signature).unwrap().drain();
        assert_eq!(execute_spend(&tx, &entry), Ok(()));

        // A signature by another key verifies as false
        let other = schnorr_sign(&tx, &entry, &keypair(4));
        tx.inputs[0].signature_script = ScriptBuilder::new().add_data(&other).unwrap().drain();
        assert_eq!(execute_spend(&tx, &entry), Err(TxScriptError::EvalFalse));
    }

    #[test]
    fn test_pay_to_pub_key_ecdsa() {
        let kp = keypair(5);
        let spk = pay_to_pub_key_ecdsa(&kp.public_key().serialize());
        let (mut tx, entry) = spend(spk, vec![], 1);
        let populated = PopulatedTransaction::new(&tx, vec![entry.clone()]);
        let hash = calc_ecdsa_signature_hash(&populated, 0, SIG_HASH_ALL, &mut SigHashReusedValues::new());
        let sig = kp.secret_key().sign_ecdsa(secp256k1::Message::from_digest(hash.as_bytes()));
        let mut signature = sig.serialize_compact().to_vec();
        signature.push(SIG_HASH_ALL.to_u8());
        tx.inputs[0].signature_script = ScriptBuilder::new().add_data(&signature).unwrap().drain();
        assert_eq!(execute_spend(&tx, &entry), Ok(()));
    }

    #[test]
    fn test_sig_op_count_is_enforced() {
        let kp = keypair(6);
        let spk = pay_to_pub_key(&kp.x_only_public_key().0.serialize());
        let (mut tx, entry) = spend(spk, vec![], 0);
        let signature = schnorr_sign(&tx, &entry, &kp);
        tx.inputs[0].signature_script = ScriptBuilder::new().add_data(&signature).unwrap().drain();
        assert_eq!(execute_spend(&tx, &entry), Err(TxScriptError::SigOpCountExceeded(0)));
    }

    #[test]
    fn test_pay_to_script_hash() {
        let redeem_script = vec![Op2, Op3, OpAdd, Op3, Op2, OpAdd, OpEqual];
        let spk = pay_to_script_hash_script(&redeem_script);
        let signature_script = pay_to_script_hash_signature_script(redeem_script, vec![]).unwrap();
        let (tx, entry) = spend(spk.clone(), signature_script, 0);
        assert_eq!(execute_spend(&tx, &entry), Ok(()));

        let wrong = pay_to_script_hash_signature_script(vec![OpTrue], vec![]).unwrap();
        let (tx, entry) = spend(spk, wrong, 0);
        assert_eq!(execute_spend(&tx, &entry), Err(TxScriptError::EvalFalse));
    }

    #[test]
    fn test_check_template_verify() {
        let (template, _) = spend(ScriptPublicKey::from_vec(0, vec![]), vec![], 0);
        let spk = pay_to_template_hash(calc_template_hash(&template, 0));

        let (tx, entry) = spend(spk.clone(), vec![], 0);
        assert_eq!(execute_spend(&tx, &entry), Ok(()));

        // Any change to the committed shape breaks the covenant
        let (mut changed, entry) = spend(spk.clone(), vec![], 0);
        changed.outputs[0].value += 1;
        assert_eq!(execute_spend(&changed, &entry), Err(TxScriptError::CheckTemplateVerify));

        let (mut changed, entry) = spend(spk, vec![], 0);
        changed.lock_time = 10;
        assert_eq!(execute_spend(&changed, &entry), Err(TxScriptError::CheckTemplateVerify));

        let short = ScriptPublicKey::from_vec(1, vec![OpData1, 0x20, OpCheckTemplateVerify, OpTrue]);
        let (tx, entry) = spend(short, vec![], 0);
        assert_eq!(execute_spend(&tx, &entry), Err(TxScriptError::TemplateHashLength(1)));
    }

    #[test]
    fn test_get_sig_op_count_upper_bound() {
        let p2sh = pay_to_script_hash_script(&[Op2, OpData32]);
        // Unparseable or non-push signature scripts count as zero
        assert_eq!(get_sig_op_count_upper_bound(&[OpPushData1, 0x02], &p2sh), 0);
        assert_eq!(get_sig_op_count_upper_bound(&[OpTrue, OpDup], &p2sh), 0);
        assert_eq!(get_sig_op_count_upper_bound(&[], &p2sh), 0);

        let sig_script = pay_to_script_hash_signature_script(vec![Op2, OpCheckMultiSig, OpCheckSig], vec![]).unwrap();
        assert_eq!(get_sig_op_count_upper_bound(&sig_script, &p2sh), 3);

        let partially_parseable = ScriptPublicKey::from_vec(0, vec![OpCheckSig, OpCheckSig, OpData1]);
        assert_eq!(get_sig_op_count_upper_bound(&[], &partially_parseable), 2);
    }

    #[test]
    fn test_is_unspendable() {
        assert!(is_unspendable(&[OpReturn, OpData1, 0x74]));
        assert!(is_unspendable(&[OpData32, 0x01]));
        assert!(!is_unspendable(&[OpDup, OpBlake3, OpData1, 0x01, OpEqualVerify, OpCheckSig]));
    }

    #[test]
    fn test_standalone_script_cannot_check_signatures() {
        let sig_cache = Cache::new(10);
        let mut reused = SigHashReusedValues::new();
        let script = [0x02, 0x20, 0x01, OpData1, 0x30, OpCheckSig];
        let mut vm = TxScriptEngine::<PopulatedTransaction>::from_script(&script, 0, &mut reused, &sig_cache);
        assert_eq!(vm.execute(), Err(TxScriptError::NotATransactionInput));
    }
}
