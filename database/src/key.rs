use std::fmt::{Debug, Display};

/// A full store key: a bucket (store prefix, optionally extended by sub-buckets) followed by the entry key
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DbKey {
    path: Vec<u8>,
    prefix_len: usize,
}

impl DbKey {
    pub fn new<TKey>(prefix: &[u8], key: TKey) -> Self
    where
        TKey: AsRef<[u8]>,
    {
        Self { path: prefix.iter().chain(key.as_ref().iter()).copied().collect(), prefix_len: prefix.len() }
    }

    pub fn prefix_only(prefix: &[u8]) -> Self {
        Self { path: prefix.to_vec(), prefix_len: prefix.len() }
    }

    /// Appends a bucket to the key. The bucket becomes part of the prefix
    pub fn add_bucket<TBucket>(&mut self, bucket: TBucket)
    where
        TBucket: AsRef<[u8]>,
    {
        debug_assert_eq!(self.path.len(), self.prefix_len, "buckets must be added before the key");
        self.path.extend_from_slice(bucket.as_ref());
        self.prefix_len += bucket.as_ref().len();
    }

    /// Appends key bytes. This does not change the prefix length
    pub fn add_key<TKey>(&mut self, key: TKey)
    where
        TKey: AsRef<[u8]>,
    {
        self.path.extend_from_slice(key.as_ref());
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn prefix(&self) -> &[u8] {
        &self.path[..self.prefix_len]
    }

    pub fn key(&self) -> &[u8] {
        &self.path[self.prefix_len..]
    }
}

impl AsRef<[u8]> for DbKey {
    fn as_ref(&self) -> &[u8] {
        &self.path
    }
}

impl Display for DbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&faster_hex::hex_string(self.prefix()))?;
        f.write_str("/")?;
        f.write_str(&faster_hex::hex_string(self.key()))
    }
}

impl Debug for DbKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self, f)
    }
}

/// The smallest key greater than every key starting with `prefix`, or `None` if no such key exists
/// (an empty or all-`0xff` prefix)
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut bound = prefix.to_vec();
    while let Some(last) = bound.pop() {
        if last < u8::MAX {
            bound.push(last + 1);
            return Some(bound);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_hashes::Hash;

    #[test]
    fn test_key_layout() {
        let hash = Hash::from_u64_word(34567890);
        let mut key = DbKey::prefix_only(&[7]);
        key.add_bucket([1]);
        key.add_key(hash);
        assert_eq!(key.prefix(), &[7, 1]);
        assert_eq!(key.key(), hash.as_ref());
        assert_eq!(key.as_ref().len(), 34);
        assert_eq!(key, DbKey::new(&[7, 1], hash));
        assert!(key.to_string().starts_with("0701/"));
    }

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_upper_bound(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_upper_bound(&[0xff, 0xff]), None);
        assert_eq!(prefix_upper_bound(&[]), None);
    }
}
