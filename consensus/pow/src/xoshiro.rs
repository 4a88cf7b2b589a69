use kestrel_hashes::Hash;
use std::num::Wrapping;

/// xoshiro256++ seeded with the four little endian words of a hash
pub struct XoShiRo256PlusPlus {
    s0: Wrapping<u64>,
    s1: Wrapping<u64>,
    s2: Wrapping<u64>,
    s3: Wrapping<u64>,
}

impl XoShiRo256PlusPlus {
    #[inline(always)]
    pub fn new(seed: Hash) -> Self {
        let [s0, s1, s2, s3] = seed.to_le_u64();
        Self { s0: Wrapping(s0), s1: Wrapping(s1), s2: Wrapping(s2), s3: Wrapping(s3) }
    }

    #[inline(always)]
    pub fn u64(&mut self) -> u64 {
        let res = self.s0 + Wrapping((self.s0 + self.s3).0.rotate_left(23));
        let t = self.s1 << 17;
        self.s2 ^= self.s0;
        self.s3 ^= self.s1;
        self.s1 ^= self.s2;
        self.s0 ^= self.s3;
        self.s2 ^= t;
        self.s3 = Wrapping(self.s3.0.rotate_left(45));
        res.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_sequence() {
        // Seed words 1, 2, 3, 4
        let mut generator = XoShiRo256PlusPlus::new(Hash::from_le_u64([1, 2, 3, 4]));
        assert_eq!(generator.u64(), 41943041);
        assert_eq!(generator.u64(), 58720359);
        assert_eq!(generator.u64(), 3588806011781223);
    }
}
