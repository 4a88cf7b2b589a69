use crate::xoshiro::XoShiRo256PlusPlus;
use kestrel_consensus_core::config::params::PowVariant;
use kestrel_hashes::{Hash, HeavyHasher};

const DIM: usize = 64;

/// The 64x64 matrix of 4-bit cells derived from a pre-pow hash. How cells are interpreted
/// during multiplication depends on the variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Matrix {
    cells: [[u16; DIM]; DIM],
    variant: PowVariant,
}

impl Matrix {
    /// Fills the matrix from an xoshiro256++ stream seeded with `hash`. Integer variants
    /// draw again until the matrix has full rank.
    pub fn generate(hash: Hash, variant: PowVariant) -> Self {
        let mut generator = XoShiRo256PlusPlus::new(hash);
        loop {
            let matrix = Self::rand_matrix_no_rank_check(&mut generator, variant);
            if variant == PowVariant::V110 || matrix.compute_rank() == DIM {
                return matrix;
            }
        }
    }

    fn rand_matrix_no_rank_check(generator: &mut XoShiRo256PlusPlus, variant: PowVariant) -> Self {
        let mut cells = [[0u16; DIM]; DIM];
        for row in cells.iter_mut() {
            for chunk in row.chunks_exact_mut(16) {
                let word = generator.u64();
                for (shift, cell) in chunk.iter_mut().enumerate() {
                    *cell = ((word >> (4 * shift)) & 0x0f) as u16;
                }
            }
        }
        Self { cells, variant }
    }

    /// Rank over the rationals, by Gaussian elimination in f64
    pub fn compute_rank(&self) -> usize {
        const EPS: f64 = 1e-9;
        let mut mat_float = self.cells.map(|row| row.map(f64::from));
        let mut rank = 0;
        let mut row_selected = [false; DIM];
        for i in 0..DIM {
            let Some(j) = (0..DIM).find(|&j| !row_selected[j] && mat_float[j][i].abs() > EPS) else {
                continue;
            };
            rank += 1;
            row_selected[j] = true;
            for p in (i + 1)..DIM {
                mat_float[j][p] /= mat_float[j][i];
            }
            for k in 0..DIM {
                if k != j && mat_float[k][i].abs() > EPS {
                    for p in (i + 1)..DIM {
                        mat_float[k][p] -= mat_float[j][p] * mat_float[k][i];
                    }
                }
            }
        }
        rank
    }

    // Reduces a row product to a nibble
    #[inline(always)]
    fn fold_integer(&self, sum: u16) -> u8 {
        match self.variant {
            PowVariant::V1 => (sum >> 10) as u8,
            _ => ((sum >> 10) ^ (sum >> 6) ^ (sum >> 2)) as u8 & 0x0f,
        }
    }

    // Cells map onto [-1, 1] symmetric around zero
    #[inline(always)]
    fn float_row_nibble(row: &[u16; DIM], vector: &[u8; DIM]) -> u8 {
        let sum: f64 = row.iter().zip(vector).map(|(&cell, &v)| (f64::from(cell) - 7.5) / 7.5 * f64::from(v)).sum();
        ((sum * 16.0).round() as i64).rem_euclid(16) as u8
    }

    #[inline(always)]
    fn row_nibble(&self, row: usize, vector: &[u8; DIM]) -> u8 {
        let row = &self.cells[row];
        if self.variant == PowVariant::V110 {
            return Self::float_row_nibble(row, vector);
        }
        let sum = row.iter().zip(vector).fold(0u16, |acc, (&cell, &v)| acc + cell * v as u16);
        self.fold_integer(sum)
    }

    /// Multiplies the nibble vector of `hash` by the matrix, XORs the folded product
    /// back into the hash and finalizes with unkeyed Blake3
    pub fn heavy_hash(&self, hash: Hash) -> Hash {
        let hash = hash.as_bytes();
        let mut vector = [0u8; DIM];
        for (i, byte) in hash.iter().enumerate() {
            vector[2 * i] = byte >> 4;
            vector[2 * i + 1] = byte & 0x0f;
        }

        let mut product = [0u8; 32];
        for (i, out) in product.iter_mut().enumerate() {
            let high = self.row_nibble(2 * i, &vector);
            let low = self.row_nibble(2 * i + 1, &vector);
            *out = ((high << 4) | low) ^ hash[i];
        }
        HeavyHasher::hash(Hash::from_bytes(product))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_cells(cells: [[u16; DIM]; DIM]) -> Matrix {
        Matrix { cells, variant: PowVariant::V1 }
    }

    #[test]
    fn test_compute_rank() {
        let zero = with_cells([[0; DIM]; DIM]);
        assert_eq!(zero.compute_rank(), 0);

        let mut identity = [[0u16; DIM]; DIM];
        for (i, row) in identity.iter_mut().enumerate() {
            row[i] = 1;
        }
        assert_eq!(with_cells(identity).compute_rank(), DIM);

        // Duplicating a row loses one dimension
        identity[5] = identity[6];
        assert_eq!(with_cells(identity).compute_rank(), DIM - 1);
    }

    #[test]
    fn test_generated_matrices_have_full_rank() {
        for seed in 0..8 {
            let matrix = Matrix::generate(Hash::from_u64_word(seed), PowVariant::V1);
            assert_eq!(matrix.compute_rank(), DIM);
            assert!(matrix.cells.iter().flatten().all(|&c| c < 16));
        }
    }

    #[test]
    fn test_variants_disagree() {
        let seed = Hash::from_u64_word(42);
        let input = Hash::from_bytes([0xa5; 32]);
        let v1 = Matrix::generate(seed, PowVariant::V1).heavy_hash(input);
        let v101 = Matrix::generate(seed, PowVariant::V101).heavy_hash(input);
        let v110 = Matrix::generate(seed, PowVariant::V110).heavy_hash(input);
        assert_ne!(v1, v101);
        assert_ne!(v1, v110);
        assert_ne!(v101, v110);
        // Deterministic
        assert_eq!(v110, Matrix::generate(seed, PowVariant::V110).heavy_hash(input));
    }

    #[test]
    fn test_identity_heavy_hash() {
        // With the identity every row product is a single nibble below 2^10, so V1 folds to zero
        // and the output is Blake3 of the input
        let mut identity = [[0u16; DIM]; DIM];
        for (i, row) in identity.iter_mut().enumerate() {
            row[i] = 1;
        }
        let input = Hash::from_bytes([0x3c; 32]);
        assert_eq!(with_cells(identity).heavy_hash(input), HeavyHasher::hash(input));
    }
}
