//! An order independent accumulator over byte strings. Every element is mapped onto a
//! point of secp256k1 and the set is represented by the sum of its points, so adding and
//! removing elements commutes and `add(e); remove(e)` restores the previous state.

use kestrel_hashes::{Hash, Hasher, HasherBase, MultisetElementHash, MultisetFinalizeHash};
use secp256k1::{PublicKey, SECP256K1};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Serialized size: the affine `x || y` coordinates, all zeros for the empty set
pub const SERIALIZED_MULTISET_SIZE: usize = 64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MultisetError {
    #[error("serialized multiset is not a valid curve point")]
    InvalidPoint,

    #[error("serialized multiset has length {0}, expected {SERIALIZED_MULTISET_SIZE}")]
    InvalidLength(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Multiset {
    /// `None` stands for the point at infinity, i.e. the empty set
    point: Option<PublicKey>,
}

impl Multiset {
    pub fn new() -> Self {
        Self { point: None }
    }

    pub fn is_empty(&self) -> bool {
        self.point.is_none()
    }

    pub fn add_element(&mut self, data: &[u8]) {
        self.add_point(hash_to_point(data));
    }

    pub fn remove_element(&mut self, data: &[u8]) {
        self.add_point(hash_to_point(data).negate(SECP256K1));
    }

    /// Adds all elements of `other` into this set
    pub fn combine(&mut self, other: &Self) {
        if let Some(point) = other.point {
            self.add_point(point);
        }
    }

    /// Removes all elements of `other` from this set
    pub fn subtract(&mut self, other: &Self) {
        if let Some(point) = other.point {
            self.add_point(point.negate(SECP256K1));
        }
    }

    fn add_point(&mut self, point: PublicKey) {
        self.point = match self.point {
            None => Some(point),
            // `combine` fails only when the sum is the point at infinity
            Some(current) => current.combine(&point).ok(),
        };
    }

    pub fn finalize(&self) -> Hash {
        match self.point {
            None => Hash::ZERO,
            Some(_) => MultisetFinalizeHash::hash(self.serialize()),
        }
    }

    pub fn serialize(&self) -> [u8; SERIALIZED_MULTISET_SIZE] {
        let mut out = [0u8; SERIALIZED_MULTISET_SIZE];
        if let Some(point) = self.point {
            out.copy_from_slice(&point.serialize_uncompressed()[1..]);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, MultisetError> {
        if bytes.len() != SERIALIZED_MULTISET_SIZE {
            return Err(MultisetError::InvalidLength(bytes.len()));
        }
        if bytes.iter().all(|&b| b == 0) {
            return Ok(Self::new());
        }
        let mut uncompressed = [0u8; SERIALIZED_MULTISET_SIZE + 1];
        uncompressed[0] = 0x04;
        uncompressed[1..].copy_from_slice(bytes);
        let point = PublicKey::from_slice(&uncompressed).map_err(|_| MultisetError::InvalidPoint)?;
        Ok(Self { point: Some(point) })
    }
}

/// Try-and-increment: derive candidate x coordinates from the element hash until one lies on the curve
fn hash_to_point(data: &[u8]) -> PublicKey {
    let seed = MultisetElementHash::hash(data);
    let mut candidate = [0u8; 33];
    candidate[0] = 0x02;
    for counter in 0u64.. {
        let mut hasher = MultisetElementHash::new();
        hasher.update(seed).update(counter.to_le_bytes());
        candidate[1..].copy_from_slice(&hasher.finalize().as_bytes());
        if let Ok(point) = PublicKey::from_slice(&candidate) {
            return point;
        }
    }
    unreachable!("roughly half of all x coordinates are on the curve")
}

impl Serialize for Multiset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&Multiset::serialize(self))
    }
}

impl<'de> Deserialize<'de> for Multiset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        Multiset::deserialize(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng, seq::SliceRandom};
    use rand_chacha::ChaCha8Rng;

    fn random_elements(rng: &mut ChaCha8Rng, count: usize) -> Vec<Vec<u8>> {
        (0..count).map(|_| (0..rng.gen_range(1..80)).map(|_| rng.r#gen()).collect()).collect()
    }

    #[test]
    fn test_order_independence() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut elements = random_elements(&mut rng, 40);
        let mut first = Multiset::new();
        elements.iter().for_each(|e| first.add_element(e));
        elements.shuffle(&mut rng);
        let mut second = Multiset::new();
        elements.iter().for_each(|e| second.add_element(e));
        assert_eq!(first.finalize(), second.finalize());
        assert_eq!(first, second);
    }

    #[test]
    fn test_add_remove_is_noop() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let elements = random_elements(&mut rng, 10);
        let mut set = Multiset::new();
        elements[..5].iter().for_each(|e| set.add_element(e));
        let before = set.finalize();
        set.add_element(&elements[7]);
        assert_ne!(set.finalize(), before);
        set.remove_element(&elements[7]);
        assert_eq!(set.finalize(), before);

        // Removing everything yields the empty set
        elements[..5].iter().for_each(|e| set.remove_element(e));
        assert!(set.is_empty());
        assert_eq!(set.finalize(), Multiset::new().finalize());
    }

    #[test]
    fn test_combine_and_serialization() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let elements = random_elements(&mut rng, 12);
        let (mut a, mut b, mut all) = (Multiset::new(), Multiset::new(), Multiset::new());
        elements[..6].iter().for_each(|e| a.add_element(e));
        elements[6..].iter().for_each(|e| b.add_element(e));
        elements.iter().for_each(|e| all.add_element(e));
        let mut combined = a;
        combined.combine(&b);
        assert_eq!(combined, all);
        combined.subtract(&b);
        assert_eq!(combined, a);

        assert_eq!(Multiset::deserialize(&all.serialize()).unwrap(), all);
        assert_eq!(Multiset::deserialize(&[0u8; SERIALIZED_MULTISET_SIZE]).unwrap(), Multiset::new());
        assert_eq!(Multiset::deserialize(&[1u8; 3]), Err(MultisetError::InvalidLength(3)));

        let encoded = bincode::serialize(&all).unwrap();
        assert_eq!(bincode::deserialize::<Multiset>(&encoded).unwrap(), all);
    }
}
