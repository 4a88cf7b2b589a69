#[doc(hidden)]
pub use {faster_hex, serde};

/// Declares a little-endian fixed-width unsigned integer type backed by `$n_words` u64 limbs
#[macro_export]
macro_rules! construct_uint {
    ($name:ident, $n_words:literal $(, $derive_trait:ty)*) => {
        /// Little-endian large integer type
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Default $(, $derive_trait )*)]
        pub struct $name(pub [u64; $n_words]);

        #[allow(unused)]
        impl $name {
            pub const ZERO: Self = $name([0; $n_words]);
            pub const MIN: Self = Self::ZERO;
            pub const MAX: Self = $name([u64::MAX; $n_words]);
            pub const BITS: u32 = $n_words * u64::BITS;
            pub const BYTES: usize = $n_words * core::mem::size_of::<u64>();
            pub const LIMBS: usize = $n_words;

            #[inline]
            pub const fn from_u64(n: u64) -> Self {
                let mut ret = Self::ZERO;
                ret.0[0] = n;
                ret
            }

            #[inline]
            pub const fn from_u128(n: u128) -> Self {
                let mut ret = Self::ZERO;
                ret.0[0] = n as u64;
                ret.0[1] = (n >> 64) as u64;
                ret
            }

            #[inline]
            pub fn as_u64(self) -> u64 {
                self.0[0]
            }

            #[inline]
            pub fn as_u128(self) -> u128 {
                self.0[0] as u128 | ((self.0[1] as u128) << 64)
            }

            #[inline(always)]
            pub fn is_zero(self) -> bool {
                self.0.iter().all(|&a| a == 0)
            }

            /// The least number of bits needed to represent the number
            #[inline(always)]
            pub fn bits(&self) -> u32 {
                for (i, &word) in self.0.iter().enumerate().rev() {
                    if word != 0 {
                        return u64::BITS * (i as u32 + 1) - word.leading_zeros();
                    }
                }
                0
            }

            #[inline(always)]
            pub fn leading_zeros(&self) -> u32 {
                Self::BITS - self.bits()
            }

            #[inline]
            pub fn overflowing_shl(self, mut s: u32) -> (Self, bool) {
                let overflows = s >= Self::BITS;
                s %= Self::BITS;
                let mut ret = [0u64; $n_words];
                let words = (s / 64) as usize;
                let shifts = s % 64;
                for i in words..$n_words {
                    ret[i] = self.0[i - words] << shifts;
                }
                if shifts > 0 {
                    for i in words + 1..$n_words {
                        ret[i] |= self.0[i - 1 - words] >> (64 - shifts);
                    }
                }
                (Self(ret), overflows)
            }

            #[inline]
            pub fn wrapping_shl(self, s: u32) -> Self {
                if s >= Self::BITS { Self::ZERO } else { self.overflowing_shl(s).0 }
            }

            #[inline]
            pub fn overflowing_shr(self, mut s: u32) -> (Self, bool) {
                let overflows = s >= Self::BITS;
                s %= Self::BITS;
                let mut ret = [0u64; $n_words];
                let words = (s / 64) as usize;
                let shifts = s % 64;
                for i in words..$n_words {
                    ret[i - words] = self.0[i] >> shifts;
                }
                if shifts > 0 {
                    for i in words + 1..$n_words {
                        ret[i - words - 1] |= self.0[i] << (64 - shifts);
                    }
                }
                (Self(ret), overflows)
            }

            #[inline]
            pub fn wrapping_shr(self, s: u32) -> Self {
                if s >= Self::BITS { Self::ZERO } else { self.overflowing_shr(s).0 }
            }

            #[inline]
            pub fn overflowing_add(mut self, other: Self) -> (Self, bool) {
                let mut carry = false;
                for i in 0..$n_words {
                    let (a, b) = self.0[i].overflowing_add(other.0[i]);
                    let (c, d) = a.overflowing_add(carry as u64);
                    self.0[i] = c;
                    carry = b || d;
                }
                (self, carry)
            }

            #[inline]
            pub fn overflowing_add_u64(mut self, other: u64) -> (Self, bool) {
                let mut carry: bool;
                (self.0[0], carry) = self.0[0].overflowing_add(other);
                for i in 1..$n_words {
                    if !carry {
                        break;
                    }
                    (self.0[i], carry) = self.0[i].overflowing_add(1);
                }
                (self, carry)
            }

            #[inline]
            pub fn saturating_add(self, other: Self) -> Self {
                match self.overflowing_add(other) {
                    (sum, false) => sum,
                    (_, true) => Self::MAX,
                }
            }

            #[inline]
            pub fn overflowing_sub(mut self, other: Self) -> (Self, bool) {
                let mut borrow = false;
                for i in 0..$n_words {
                    let (a, b) = self.0[i].overflowing_sub(other.0[i]);
                    let (c, d) = a.overflowing_sub(borrow as u64);
                    self.0[i] = c;
                    borrow = b || d;
                }
                (self, borrow)
            }

            #[inline]
            pub fn checked_sub(self, other: Self) -> Option<Self> {
                match self.overflowing_sub(other) {
                    (diff, false) => Some(diff),
                    (_, true) => None,
                }
            }

            #[inline]
            pub fn overflowing_mul_u64(mut self, other: u64) -> (Self, bool) {
                let mut carry: u128 = 0;
                for i in 0..$n_words {
                    let n = carry + (other as u128) * (self.0[i] as u128);
                    self.0[i] = n as u64;
                    carry = n >> 64;
                }
                (self, carry != 0)
            }

            #[inline]
            pub fn overflowing_mul(self, other: Self) -> (Self, bool) {
                let mut result = Self::ZERO;
                let mut carry_out = false;
                for j in 0..$n_words {
                    let mut carry = 0u64;
                    let mut i = 0;
                    while i + j < $n_words {
                        let n = (self.0[i] as u128) * (other.0[j] as u128) + (result.0[i + j] as u128) + (carry as u128);
                        result.0[i + j] = n as u64;
                        carry = (n >> 64) as u64;
                        i += 1;
                    }
                    // Any remaining non-zero partial product spills past the top limb
                    carry_out |= carry != 0 || (j > 0 && self.0[$n_words - j..].iter().any(|&w| w != 0) && other.0[j] != 0);
                }
                (result, carry_out)
            }

            #[inline]
            pub fn checked_mul(self, other: Self) -> Option<Self> {
                match self.overflowing_mul(other) {
                    (product, false) => Some(product),
                    (_, true) => None,
                }
            }

            /// Returns `(quotient, remainder)`. Panics on division by zero.
            #[inline]
            pub fn div_rem_u64(mut self, other: u64) -> (Self, u64) {
                let mut rem = 0u64;
                self.0.iter_mut().rev().for_each(|d| {
                    let n = (rem as u128) << 64 | (*d as u128);
                    *d = (n / other as u128) as u64;
                    rem = (n % other as u128) as u64;
                });
                (self, rem)
            }

            /// Bitwise long division returning `(quotient, remainder)`. Panics on division by zero.
            #[inline]
            pub fn div_rem(self, other: Self) -> (Self, Self) {
                let mut rem = self;
                let mut ret = [0u64; $n_words];
                let my_bits = self.bits();
                let your_bits = other.bits();
                assert_ne!(your_bits, 0, "attempted to divide {} by zero", self);
                if my_bits < your_bits {
                    return (Self(ret), rem);
                }
                let mut shift = my_bits - your_bits;
                let mut divisor = other.wrapping_shl(shift);
                loop {
                    if rem >= divisor {
                        ret[(shift / 64) as usize] |= 1 << (shift % 64);
                        rem = rem.overflowing_sub(divisor).0;
                    }
                    divisor = divisor.wrapping_shr(1);
                    if shift == 0 {
                        break;
                    }
                    shift -= 1;
                }
                (Self(ret), rem)
            }

            #[inline(always)]
            pub fn from_le_bytes(bytes: [u8; Self::BYTES]) -> Self {
                let mut out = [0u64; $n_words];
                out.iter_mut().zip(bytes.chunks_exact(8)).for_each(|(word, chunk)| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(chunk);
                    *word = u64::from_le_bytes(buf);
                });
                Self(out)
            }

            #[inline(always)]
            pub fn from_be_bytes(bytes: [u8; Self::BYTES]) -> Self {
                let mut out = [0u64; $n_words];
                out.iter_mut().rev().zip(bytes.chunks_exact(8)).for_each(|(word, chunk)| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(chunk);
                    *word = u64::from_be_bytes(buf);
                });
                Self(out)
            }

            #[inline(always)]
            pub fn to_le_bytes(self) -> [u8; Self::BYTES] {
                let mut out = [0u8; Self::BYTES];
                out.chunks_exact_mut(8).zip(self.0).for_each(|(chunk, word)| chunk.copy_from_slice(&word.to_le_bytes()));
                out
            }

            #[inline(always)]
            pub fn to_be_bytes(self) -> [u8; Self::BYTES] {
                let mut out = [0u8; Self::BYTES];
                out.chunks_exact_mut(8)
                    .zip(self.0.into_iter().rev())
                    .for_each(|(chunk, word)| chunk.copy_from_slice(&word.to_be_bytes()));
                out
            }

            /// Big-endian bytes with leading zeros stripped
            #[inline]
            pub fn to_be_bytes_var(self) -> Vec<u8> {
                let bytes = self.to_be_bytes();
                let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
                bytes[start..].to_vec()
            }

            #[inline]
            pub fn from_be_bytes_var(bytes: &[u8]) -> Result<Self, $crate::Error> {
                if bytes.len() > Self::BYTES {
                    return Err($crate::Error::Overflow(Self::BITS));
                }
                let mut out = [0u8; Self::BYTES];
                out[Self::BYTES - bytes.len()..].copy_from_slice(bytes);
                Ok(Self::from_be_bytes(out))
            }

            /// Parses a big-endian hex string of at most `Self::BYTES * 2` characters
            #[inline]
            pub fn from_hex(hex: &str) -> Result<Self, $crate::Error> {
                if hex.len() > Self::BYTES * 2 {
                    return Err($crate::Error::Overflow(Self::BITS));
                }
                let mut out = [0u8; Self::BYTES];
                let mut input = [b'0'; Self::BYTES * 2];
                let start = input.len() - hex.len();
                input[start..].copy_from_slice(hex.as_bytes());
                $crate::uint::faster_hex::hex_decode(&input, &mut out).map_err(|_| $crate::Error::Hex("invalid hex digit"))?;
                Ok(Self::from_be_bytes(out))
            }

            #[inline]
            pub fn as_f64(&self) -> f64 {
                self.0.iter().rev().fold(0f64, |acc, &w| acc * 18446744073709551616.0 + w as f64)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(n: u64) -> Self {
                Self::from_u64(n)
            }
        }

        impl From<u128> for $name {
            #[inline]
            fn from(n: u128) -> Self {
                Self::from_u128(n)
            }
        }

        impl PartialEq<u64> for $name {
            #[inline]
            fn eq(&self, other: &u64) -> bool {
                self.0[1..].iter().all(|&x| x == 0) && self.0[0] == *other
            }
        }

        impl PartialOrd<u64> for $name {
            #[inline]
            fn partial_cmp(&self, other: &u64) -> Option<core::cmp::Ordering> {
                if self.0[1..].iter().any(|&x| x != 0) { Some(core::cmp::Ordering::Greater) } else { self.0[0].partial_cmp(other) }
            }
        }

        impl PartialOrd for $name {
            #[inline]
            fn partial_cmp(&self, other: &$name) -> Option<core::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            #[inline]
            fn cmp(&self, other: &$name) -> core::cmp::Ordering {
                // Limbs are little-endian, so compare from the most significant one
                Iterator::cmp(self.0.iter().rev(), other.0.iter().rev())
            }
        }

        impl core::ops::Add<$name> for $name {
            type Output = $name;

            #[inline]
            #[track_caller]
            fn add(self, other: $name) -> $name {
                let (sum, carry) = self.overflowing_add(other);
                debug_assert!(!carry, "attempt to add with overflow");
                sum
            }
        }

        impl core::ops::Add<u64> for $name {
            type Output = $name;

            #[inline]
            #[track_caller]
            fn add(self, other: u64) -> $name {
                let (sum, carry) = self.overflowing_add_u64(other);
                debug_assert!(!carry, "attempt to add with overflow");
                sum
            }
        }

        impl core::ops::AddAssign for $name {
            #[inline]
            fn add_assign(&mut self, other: $name) {
                *self = *self + other;
            }
        }

        impl core::ops::Sub<$name> for $name {
            type Output = $name;

            #[inline]
            #[track_caller]
            fn sub(self, other: $name) -> $name {
                let (diff, borrow) = self.overflowing_sub(other);
                debug_assert!(!borrow, "attempt to subtract with overflow");
                diff
            }
        }

        impl core::ops::Mul<$name> for $name {
            type Output = $name;

            #[inline]
            #[track_caller]
            fn mul(self, other: $name) -> $name {
                let (product, carry) = self.overflowing_mul(other);
                debug_assert!(!carry, "attempt to multiply with overflow");
                product
            }
        }

        impl core::ops::Mul<u64> for $name {
            type Output = $name;

            #[inline]
            #[track_caller]
            fn mul(self, other: u64) -> $name {
                let (product, carry) = self.overflowing_mul_u64(other);
                debug_assert!(!carry, "attempt to multiply with overflow");
                product
            }
        }

        impl core::ops::Div<$name> for $name {
            type Output = $name;

            #[inline]
            fn div(self, other: $name) -> $name {
                self.div_rem(other).0
            }
        }

        impl core::ops::Div<u64> for $name {
            type Output = $name;

            #[inline]
            fn div(self, other: u64) -> $name {
                self.div_rem_u64(other).0
            }
        }

        impl core::ops::Rem<$name> for $name {
            type Output = $name;

            #[inline]
            fn rem(self, other: $name) -> $name {
                self.div_rem(other).1
            }
        }

        impl core::ops::Shl<u32> for $name {
            type Output = $name;

            #[inline]
            fn shl(self, shift: u32) -> $name {
                self.wrapping_shl(shift)
            }
        }

        impl core::ops::Shr<u32> for $name {
            type Output = $name;

            #[inline]
            fn shr(self, shift: u32) -> $name {
                self.wrapping_shr(shift)
            }
        }

        impl core::ops::Not for $name {
            type Output = $name;

            #[inline]
            fn not(mut self) -> $name {
                self.0.iter_mut().for_each(|w| *w = !*w);
                self
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = $name;

            #[inline]
            fn bitand(mut self, other: $name) -> $name {
                self.0.iter_mut().zip(other.0).for_each(|(a, b)| *a &= b);
                self
            }
        }

        impl core::ops::BitOr for $name {
            type Output = $name;

            #[inline]
            fn bitor(mut self, other: $name) -> $name {
                self.0.iter_mut().zip(other.0).for_each(|(a, b)| *a |= b);
                self
            }
        }

        impl core::ops::BitXor for $name {
            type Output = $name;

            #[inline]
            fn bitxor(mut self, other: $name) -> $name {
                self.0.iter_mut().zip(other.0).for_each(|(a, b)| *a ^= b);
                self
            }
        }

        impl core::iter::Sum for $name {
            fn sum<I: Iterator<Item = $name>>(iter: I) -> $name {
                iter.fold(Self::ZERO, |acc, x| acc + x)
            }
        }

        impl core::fmt::LowerHex for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let bytes = self.to_be_bytes();
                let mut hex = [0u8; Self::BYTES * 2];
                let encoded = $crate::uint::faster_hex::hex_encode(&bytes, &mut hex).map_err(|_| core::fmt::Error)?;
                let trimmed = encoded.trim_start_matches('0');
                f.pad_integral(true, "0x", if trimmed.is_empty() { "0" } else { trimmed })
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                if self.is_zero() {
                    return f.pad_integral(true, "", "0");
                }
                let mut digits = Vec::with_capacity(Self::BITS as usize / 3 + 1);
                let mut current = *self;
                while !current.is_zero() {
                    let (q, r) = current.div_rem_u64(10);
                    digits.push(b'0' + r as u8);
                    current = q;
                }
                digits.reverse();
                f.pad_integral(true, "", core::str::from_utf8(&digits).map_err(|_| core::fmt::Error)?)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{:#x}", self)
            }
        }

        impl $crate::uint::serde::Serialize for $name {
            fn serialize<S: $crate::uint::serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                use $crate::uint::serde::ser::SerializeTuple;
                let mut seq = serializer.serialize_tuple($n_words)?;
                for limb in self.0.iter() {
                    seq.serialize_element(limb)?;
                }
                seq.end()
            }
        }

        impl<'de> $crate::uint::serde::Deserialize<'de> for $name {
            fn deserialize<D: $crate::uint::serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                <[u64; $n_words] as $crate::uint::serde::Deserialize>::deserialize(deserializer).map($name)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::{Uint256, Uint320};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_mul_div_consistency() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let a = Uint256::from_u128(rng.r#gen());
            let b = Uint256::from_u128(rng.r#gen::<u128>() | 1);
            let product = a * b;
            let (q, r) = product.div_rem(b);
            assert_eq!(q, a);
            assert!(r.is_zero());
            let (q, r) = (product + Uint256::from_u64(7)).div_rem(a.max(Uint256::from_u64(8)));
            assert_eq!(q * a.max(Uint256::from_u64(8)) + r, product + Uint256::from_u64(7));
        }
    }

    #[test]
    fn test_shifts_and_bits() {
        let one = Uint256::from_u64(1);
        assert_eq!((one << 255).bits(), 256);
        assert_eq!((one << 255) >> 255, one);
        assert_eq!(one << 256, Uint256::ZERO);
        assert_eq!(Uint256::MAX.leading_zeros(), 0);
        assert_eq!(Uint256::ZERO.bits(), 0);
    }

    #[test]
    fn test_overflow_detection() {
        assert!(Uint256::MAX.overflowing_add(Uint256::from_u64(1)).1);
        assert!(Uint256::ZERO.overflowing_sub(Uint256::from_u64(1)).1);
        assert!((Uint256::from_u64(1) << 200).overflowing_mul(Uint256::from_u64(1) << 100).1);
        assert!(!(Uint256::from_u64(1) << 100).overflowing_mul(Uint256::from_u64(1) << 100).1);
    }

    #[test]
    fn test_formatting_and_bytes() {
        let x = Uint320::from_u64(1234567890123456789);
        assert_eq!(x.to_string(), "1234567890123456789");
        assert_eq!(format!("{:x}", Uint256::from_u64(0xabcdef)), "abcdef");
        assert_eq!(Uint256::from_hex("abcdef").unwrap(), Uint256::from_u64(0xabcdef));
        let y = Uint256::from_u128(u128::MAX) << 64;
        assert_eq!(Uint256::from_be_bytes(y.to_be_bytes()), y);
        assert_eq!(Uint256::from_le_bytes(y.to_le_bytes()), y);
        assert_eq!(Uint256::from_be_bytes_var(&y.to_be_bytes_var()).unwrap(), y);
    }
}
