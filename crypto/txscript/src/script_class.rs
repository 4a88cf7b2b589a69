use crate::opcodes::codes::{OpBlake3, OpCheckSig, OpCheckSigECDSA, OpCheckTemplateVerify, OpData32, OpData33, OpEqual, OpTrue};
use kestrel_consensus_core::tx::ScriptPublicKey;
use std::fmt::{Display, Formatter};

/// Standard script public key shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptClass {
    /// None of the recognized forms
    NonStandard,
    /// Pay to a 32-byte Schnorr public key
    PubKey,
    /// Pay to a 33-byte ECDSA public key
    PubKeyECDSA,
    /// Pay to the blake3 hash of a redeem script
    ScriptHash,
    /// Spendable only by the transaction whose template hash is committed
    TemplateLock,
}

const NON_STANDARD: &str = "nonstandard";
const PUB_KEY: &str = "pubkey";
const PUB_KEY_ECDSA: &str = "pubkeyecdsa";
const SCRIPT_HASH: &str = "scripthash";
const TEMPLATE_LOCK: &str = "templatelock";

impl ScriptClass {
    pub fn from_script(script_public_key: &ScriptPublicKey) -> Self {
        let script = script_public_key.script();
        match script_public_key.version() {
            0 if Self::is_pay_to_pubkey(script) => ScriptClass::PubKey,
            0 if Self::is_pay_to_pubkey_ecdsa(script) => ScriptClass::PubKeyECDSA,
            0 if Self::is_pay_to_script_hash(script) => ScriptClass::ScriptHash,
            1 if Self::is_template_lock(script) => ScriptClass::TemplateLock,
            _ => ScriptClass::NonStandard,
        }
    }

    #[inline(always)]
    pub fn is_pay_to_pubkey(script: &[u8]) -> bool {
        script.len() == 34 && script[0] == OpData32 && script[33] == OpCheckSig
    }

    #[inline(always)]
    pub fn is_pay_to_pubkey_ecdsa(script: &[u8]) -> bool {
        script.len() == 35 && script[0] == OpData33 && script[34] == OpCheckSigECDSA
    }

    /// `OpBlake3 OpData32 <hash> OpEqual`
    #[inline(always)]
    pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
        script.len() == 35 && script[0] == OpBlake3 && script[1] == OpData32 && script[34] == OpEqual
    }

    /// `OpData32 <template hash> OpCheckTemplateVerify OpTrue`
    #[inline(always)]
    pub fn is_template_lock(script: &[u8]) -> bool {
        script.len() == 35 && script[0] == OpData32 && script[33] == OpCheckTemplateVerify && script[34] == OpTrue
    }

    /// Script public key version the class is defined for
    pub fn version(&self) -> u16 {
        match self {
            ScriptClass::TemplateLock => 1,
            _ => 0,
        }
    }

    pub fn is_standard(&self) -> bool {
        !matches!(self, ScriptClass::NonStandard)
    }
}

impl Display for ScriptClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScriptClass::NonStandard => NON_STANDARD,
            ScriptClass::PubKey => PUB_KEY,
            ScriptClass::PubKeyECDSA => PUB_KEY_ECDSA,
            ScriptClass::ScriptHash => SCRIPT_HASH,
            ScriptClass::TemplateLock => TEMPLATE_LOCK,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::{pay_to_pub_key, pay_to_pub_key_ecdsa, pay_to_script_hash_script, pay_to_template_hash};
    use kestrel_hashes::Hash;

    #[test]
    fn test_classification() {
        assert_eq!(ScriptClass::from_script(&pay_to_pub_key(&[1; 32])), ScriptClass::PubKey);
        assert_eq!(ScriptClass::from_script(&pay_to_pub_key_ecdsa(&[2; 33])), ScriptClass::PubKeyECDSA);
        assert_eq!(ScriptClass::from_script(&pay_to_script_hash_script(&[OpTrue])), ScriptClass::ScriptHash);
        assert_eq!(ScriptClass::from_script(&pay_to_template_hash(Hash::from_u64_word(3))), ScriptClass::TemplateLock);

        // Known shapes under an unexpected version are not standard
        let spk = ScriptPublicKey::from_vec(1, pay_to_pub_key(&[1; 32]).script().to_vec());
        assert_eq!(ScriptClass::from_script(&spk), ScriptClass::NonStandard);
        assert_eq!(ScriptClass::from_script(&ScriptPublicKey::from_vec(0, vec![OpTrue])), ScriptClass::NonStandard);
        assert_eq!(ScriptClass::TemplateLock.to_string(), "templatelock");
    }
}
