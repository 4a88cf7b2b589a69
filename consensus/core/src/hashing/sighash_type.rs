use thiserror::Error;

pub const SIG_HASH_ALL: SigHashType = SigHashType(0b0000_0001);
pub const SIG_HASH_NONE: SigHashType = SigHashType(0b0000_0010);
pub const SIG_HASH_SINGLE: SigHashType = SigHashType(0b0000_0100);
pub const SIG_HASH_ANY_ONE_CAN_PAY: SigHashType = SigHashType(0b1000_0000);

/// Low bits selecting which outputs are committed to
pub const SIG_HASH_MASK: u8 = 0b0000_0111;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid sighash type {0:#04x}")]
pub struct InvalidSigHashType(pub u8);

/// Signature hash type: exactly one output selector, optionally combined with anyone-can-pay
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SigHashType(pub(crate) u8);

impl SigHashType {
    fn outputs_mode(self) -> u8 {
        self.0 & SIG_HASH_MASK
    }

    pub fn is_sighash_all(self) -> bool {
        self.outputs_mode() == SIG_HASH_ALL.0
    }

    pub fn is_sighash_none(self) -> bool {
        self.outputs_mode() == SIG_HASH_NONE.0
    }

    pub fn is_sighash_single(self) -> bool {
        self.outputs_mode() == SIG_HASH_SINGLE.0
    }

    pub fn is_sighash_anyone_can_pay(self) -> bool {
        self.0 & SIG_HASH_ANY_ONE_CAN_PAY.0 != 0
    }

    pub fn to_u8(self) -> u8 {
        self.0
    }

    pub fn from_u8(val: u8) -> Result<Self, InvalidSigHashType> {
        let modifiers = val & !SIG_HASH_MASK;
        let valid_mode = matches!(val & SIG_HASH_MASK, m if m == SIG_HASH_ALL.0 || m == SIG_HASH_NONE.0 || m == SIG_HASH_SINGLE.0);
        if !valid_mode || (modifiers != 0 && modifiers != SIG_HASH_ANY_ONE_CAN_PAY.0) {
            return Err(InvalidSigHashType(val));
        }
        Ok(Self(val))
    }
}

impl TryFrom<u8> for SigHashType {
    type Error = InvalidSigHashType;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        Self::from_u8(val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sighash_type_parsing() {
        let valid: Vec<u8> = (0..=u8::MAX).filter(|&v| SigHashType::from_u8(v).is_ok()).collect();
        assert_eq!(valid, vec![0x01, 0x02, 0x04, 0x81, 0x82, 0x84]);
        assert_eq!(SigHashType::try_from(0x03), Err(InvalidSigHashType(0x03)));

        let acp_single = SigHashType::from_u8(0x84).unwrap();
        assert!(acp_single.is_sighash_single() && acp_single.is_sighash_anyone_can_pay());
        assert!(!acp_single.is_sighash_all());
    }
}
