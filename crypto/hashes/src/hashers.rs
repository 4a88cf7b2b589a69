//! Domain separated hashers. Every domain uses Blake3 in keyed mode where the key is
//! the domain name right-padded with zeros to 32 bytes, so the same preimage hashed
//! under two domains can never collide.

use crate::Hash;
use sha2::Digest;

pub trait HasherBase {
    fn update<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self;
}

pub trait Hasher: HasherBase + Clone + Default {
    fn finalize(self) -> Hash;
    fn reset(&mut self);
    #[inline(always)]
    fn hash<A: AsRef<[u8]>>(data: A) -> Hash {
        let mut hasher = Self::default();
        hasher.update(data);
        hasher.finalize()
    }
}

const fn domain_key(domain: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    let mut i = 0;
    while i < domain.len() {
        key[i] = domain[i];
        i += 1;
    }
    key
}

macro_rules! keyed_blake3_hasher {
    ($(struct $name:ident => $domain_sep:literal),+ $(,)? ) => {$(
        #[derive(Clone)]
        pub struct $name(blake3::Hasher);

        impl $name {
            const KEY: [u8; 32] = domain_key($domain_sep);

            #[inline(always)]
            pub fn new() -> Self {
                Self(blake3::Hasher::new_keyed(&Self::KEY))
            }

            pub fn write<A: AsRef<[u8]>>(&mut self, data: A) {
                self.0.update(data.as_ref());
            }

            #[inline(always)]
            pub fn finalize(self) -> Hash {
                Hash::from_bytes(*self.0.finalize().as_bytes())
            }
        }

        impl HasherBase for $name {
            #[inline(always)]
            fn update<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self {
                self.write(data);
                self
            }
        }

        impl Hasher for $name {
            #[inline(always)]
            fn finalize(self) -> Hash {
                $name::finalize(self)
            }

            fn reset(&mut self) {
                *self = Self::new();
            }
        }

        impl Default for $name {
            #[inline(always)]
            fn default() -> Self {
                Self::new()
            }
        }
    )*};
}

keyed_blake3_hasher! {
    struct TransactionHash => b"TransactionHash",
    struct TransactionID => b"TransactionID",
    struct TransactionSigningHash => b"TransactionSigningHash",
    struct TransactionTemplateHash => b"TransactionTemplateHash",
    struct BlockHash => b"BlockHash",
    struct MerkleBranchHash => b"MerkleBranchHash",
    struct MultisetElementHash => b"MultisetElementHash",
    struct MultisetFinalizeHash => b"MultisetFinalizeHash",
}

/// Sha256 over the schnorr signing hash, used for ECDSA signature messages
#[derive(Clone)]
pub struct TransactionSigningHashECDSA(sha2::Sha256);

impl Default for TransactionSigningHashECDSA {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionSigningHashECDSA {
    const DOMAIN: &'static [u8] = b"TransactionSigningHashECDSA";

    #[inline(always)]
    pub fn new() -> Self {
        let mut hasher = sha2::Sha256::new();
        hasher.update(Self::DOMAIN);
        Self(hasher)
    }

    #[inline(always)]
    pub fn finalize(self) -> Hash {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.0.finalize().as_slice());
        Hash::from_bytes(out)
    }
}

impl HasherBase for TransactionSigningHashECDSA {
    #[inline(always)]
    fn update<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self {
        Digest::update(&mut self.0, data.as_ref());
        self
    }
}

/// Writes into a hasher while counting the produced bytes, used to measure serialized sizes
/// without allocating.
#[derive(Clone, Default)]
pub struct LengthCounter(pub usize);

impl HasherBase for LengthCounter {
    fn update<A: AsRef<[u8]>>(&mut self, data: A) -> &mut Self {
        self.0 += data.as_ref().len();
        self
    }
}
