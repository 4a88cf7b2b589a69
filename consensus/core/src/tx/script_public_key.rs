use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::{Debug, Formatter};
use std::str::{self, FromStr};

/// Size of the underlying script vector of a script.
pub const SCRIPT_VECTOR_SIZE: usize = 36;

/// Used as the underlying type for script public key data, optimized for the common p2pk script size (34).
pub type ScriptVec = SmallVec<[u8; SCRIPT_VECTOR_SIZE]>;

/// Represents the ScriptPublicKey Version
pub type ScriptPublicKeyVersion = u16;

/// Alias the `smallvec!` macro to ease maintenance
pub use smallvec::smallvec as scriptvec;

/// Represents a script public key: a versioned locking script
#[derive(Default, PartialEq, Eq, Clone, Hash, Serialize, Deserialize)]
pub struct ScriptPublicKey {
    pub version: ScriptPublicKeyVersion,
    script: ScriptVec, // Kept private to preserve read-only semantics
}

impl Debug for ScriptPublicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut hex = vec![0u8; self.script.len() * 2];
        faster_hex::hex_encode(&self.script, &mut hex).map_err(|_| std::fmt::Error)?;
        f.debug_struct("ScriptPublicKey")
            .field("version", &self.version)
            .field("script", &str::from_utf8(&hex).map_err(|_| std::fmt::Error)?)
            .finish()
    }
}

impl ScriptPublicKey {
    pub fn new(version: ScriptPublicKeyVersion, script: ScriptVec) -> Self {
        Self { version, script }
    }

    pub fn from_vec(version: ScriptPublicKeyVersion, script: Vec<u8>) -> Self {
        Self { version, script: ScriptVec::from_vec(script) }
    }

    pub fn version(&self) -> ScriptPublicKeyVersion {
        self.version
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }
}

/// Parses `"{version:04x}{script hex}"`, the form used in config files and logs
impl FromStr for ScriptPublicKey {
    type Err = faster_hex::Error;

    fn from_str(hex_str: &str) -> Result<Self, Self::Err> {
        let hex_bytes = hex_str.as_bytes();
        if hex_bytes.len() < 4 || hex_bytes.len() % 2 != 0 {
            return Err(faster_hex::Error::InvalidLength(hex_bytes.len()));
        }
        let mut version = [0u8; 2];
        faster_hex::hex_decode(&hex_bytes[..4], &mut version)?;
        let mut script = vec![0u8; (hex_bytes.len() - 4) / 2];
        faster_hex::hex_decode(&hex_bytes[4..], &mut script)?;
        Ok(Self::from_vec(u16::from_be_bytes(version), script))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spk_from_str() {
        let spk = ScriptPublicKey::from_str("0000208325613d2eeaf7176ac6c670b13c0043156c427438ed72d74b7800862ad884e8ac").unwrap();
        assert_eq!(spk.version(), 0);
        assert_eq!(spk.script().len(), 34);
        assert_eq!(spk.script()[0], 0x20);
        assert!(ScriptPublicKey::from_str("000").is_err());
        assert!(ScriptPublicKey::from_str("00zz").is_err());
    }
}
