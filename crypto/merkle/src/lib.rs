use kestrel_hashes::{Hash, Hasher, HasherBase, MerkleBranchHash, ZERO_HASH};

/// Computes the merkle root of `hashes`. Levels with an odd node count pair the last node
/// with [`ZERO_HASH`]. An empty input yields [`ZERO_HASH`] and a single leaf is its own root.
pub fn calc_merkle_root(hashes: impl IntoIterator<Item = Hash>) -> Hash {
    calc_merkle_root_with_hasher::<MerkleBranchHash>(hashes)
}

pub fn merkle_hash(left: Hash, right: Hash) -> Hash {
    merkle_hash_with_hasher::<MerkleBranchHash>(left, right)
}

pub fn merkle_hash_with_hasher<H: Hasher>(left: Hash, right: Hash) -> Hash {
    let mut hasher = H::default();
    hasher.update(left).update(right);
    hasher.finalize()
}

pub fn calc_merkle_root_with_hasher<H: Hasher>(hashes: impl IntoIterator<Item = Hash>) -> Hash {
    let mut level: Vec<Hash> = hashes.into_iter().collect();
    if level.is_empty() {
        return ZERO_HASH;
    }
    // Pad to a power of two so that the tree shape depends on the leaf count only
    let width = level.len().next_power_of_two();
    let mut present = level.len();
    level.resize(width, ZERO_HASH);
    while level.len() > 1 {
        let next: Vec<Hash> = level
            .chunks(2)
            .enumerate()
            .map(|(i, pair)| if 2 * i < present { merkle_hash_with_hasher::<H>(pair[0], pair[1]) } else { ZERO_HASH })
            .collect();
        present = present.div_ceil(2);
        level = next;
    }
    level[0]
}

/// Returns the sibling path proving the leaf at `index`, bottom level first
pub fn merkle_branch(hashes: &[Hash], index: usize) -> Option<Vec<Hash>> {
    if index >= hashes.len() {
        return None;
    }
    let mut level = hashes.to_vec();
    level.resize(hashes.len().next_power_of_two(), ZERO_HASH);
    let mut present = hashes.len();
    let mut position = index;
    let mut branch = Vec::new();
    while level.len() > 1 {
        branch.push(level[position ^ 1]);
        level = level
            .chunks(2)
            .enumerate()
            .map(|(i, pair)| if 2 * i < present { merkle_hash(pair[0], pair[1]) } else { ZERO_HASH })
            .collect();
        present = present.div_ceil(2);
        position /= 2;
    }
    Some(branch)
}

pub fn verify_merkle_branch(leaf: Hash, mut index: usize, branch: &[Hash], root: Hash) -> bool {
    let computed = branch.iter().fold(leaf, |acc, sibling| {
        let node = if index % 2 == 0 { merkle_hash(acc, *sibling) } else { merkle_hash(*sibling, acc) };
        index /= 2;
        node
    });
    computed == root
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_hashes::TransactionHash;

    fn make_hash(data: &[u8]) -> Hash {
        TransactionHash::hash(data)
    }

    #[test]
    fn test_small_trees() {
        assert_eq!(calc_merkle_root(std::iter::empty()), ZERO_HASH);

        let (h1, h2, h3) = (make_hash(b"h1"), make_hash(b"h2"), make_hash(b"h3"));
        assert_eq!(calc_merkle_root([h1]), h1);
        assert_eq!(calc_merkle_root([h1, h2]), merkle_hash(h1, h2));
        assert_eq!(calc_merkle_root([h1, h2, h3]), merkle_hash(merkle_hash(h1, h2), merkle_hash(h3, ZERO_HASH)));
        assert_ne!(calc_merkle_root([h1, h2]), calc_merkle_root([h2, h1]));
    }

    #[test]
    fn test_five_leaves_prune_empty_subtree() {
        let hashes: Vec<Hash> = (0..5u8).map(|i| make_hash(&[i])).collect();
        let left = merkle_hash(merkle_hash(hashes[0], hashes[1]), merkle_hash(hashes[2], hashes[3]));
        let right = merkle_hash(merkle_hash(hashes[4], ZERO_HASH), ZERO_HASH);
        assert_eq!(calc_merkle_root(hashes.iter().copied()), merkle_hash(left, right));
    }

    #[test]
    fn test_branches_verify() {
        let hashes: Vec<Hash> = (0..7u8).map(|i| make_hash(&[i])).collect();
        let root = calc_merkle_root(hashes.iter().copied());
        for (i, leaf) in hashes.iter().enumerate() {
            let branch = merkle_branch(&hashes, i).unwrap();
            assert!(verify_merkle_branch(*leaf, i, &branch, root));
            assert!(!verify_merkle_branch(make_hash(b"other"), i, &branch, root));
        }
        assert!(merkle_branch(&hashes, 7).is_none());
    }
}
