pub mod uint;

use thiserror::Error;

construct_uint!(Uint192, 3);
construct_uint!(Uint256, 4);
construct_uint!(Uint320, 5);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("hex decoding error: {0}")]
    Hex(&'static str),

    #[error("value does not fit into {0} bits")]
    Overflow(u32),
}

impl Uint256 {
    /// Decodes a compact-encoded target, returning `None` for negative or overflowing encodings
    #[inline]
    pub fn try_from_compact_target_bits(bits: u32) -> Option<Self> {
        let exponent = bits >> 24;
        let mantissa = bits & 0x007f_ffff;
        if bits & 0x0080_0000 != 0 && mantissa != 0 {
            // Negative targets are not allowed
            return None;
        }
        if exponent <= 3 {
            return Some(Uint256::from_u64((mantissa >> (8 * (3 - exponent))) as u64));
        }
        let shift = 8 * (exponent - 3);
        let value = Uint256::from_u64(mantissa as u64);
        if mantissa != 0 && value.bits() + shift > Self::BITS {
            return None;
        }
        Some(value.wrapping_shl(shift))
    }

    /// Lenient decoding used where the bits were already validated: invalid encodings map to zero
    #[inline]
    pub fn from_compact_target_bits(bits: u32) -> Self {
        Self::try_from_compact_target_bits(bits).unwrap_or(Self::ZERO)
    }

    #[inline]
    pub fn compact_target_bits(self) -> u32 {
        let mut size = self.bits().div_ceil(8);
        let mut compact =
            if size <= 3 { (self.as_u64() << (8 * (3 - size))) as u32 } else { (self >> (8 * (size - 3))).as_u64() as u32 };
        if compact & 0x0080_0000 != 0 {
            compact >>= 8;
            size += 1;
        }
        compact | (size << 24)
    }
}

impl From<Uint256> for Uint320 {
    #[inline]
    fn from(u: Uint256) -> Self {
        let mut result = Uint320::ZERO;
        result.0[..4].copy_from_slice(&u.0);
        result
    }
}

impl TryFrom<Uint320> for Uint256 {
    type Error = Error;

    #[inline]
    fn try_from(value: Uint320) -> Result<Self, Self::Error> {
        if value.0[4] != 0 {
            Err(Error::Overflow(Uint256::BITS))
        } else {
            Ok(Uint256([value.0[0], value.0[1], value.0[2], value.0[3]]))
        }
    }
}

impl From<Uint192> for Uint256 {
    #[inline]
    fn from(u: Uint192) -> Self {
        Uint256([u.0[0], u.0[1], u.0[2], 0])
    }
}

impl TryFrom<Uint256> for Uint192 {
    type Error = Error;

    #[inline]
    fn try_from(value: Uint256) -> Result<Self, Self::Error> {
        if value.0[3] != 0 { Err(Error::Overflow(Uint192::BITS)) } else { Ok(Uint192([value.0[0], value.0[1], value.0[2]])) }
    }
}
