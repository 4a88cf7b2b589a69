use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkTypeError {
    #[error("invalid network type: {0}")]
    InvalidNetworkType(String),
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Devnet,
    Simnet,
}

impl NetworkType {
    pub fn default_p2p_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => 17111,
            NetworkType::Testnet => 17211,
            NetworkType::Simnet => 17511,
            NetworkType::Devnet => 17611,
        }
    }

    /// Four bytes identifying the network in the database manifest and the handshake
    pub fn magic(&self) -> u32 {
        match self {
            NetworkType::Mainnet => 0x4b45_5301,
            NetworkType::Testnet => 0x4b45_5302,
            NetworkType::Devnet => 0x4b45_5303,
            NetworkType::Simnet => 0x4b45_5304,
        }
    }

    pub fn iter() -> impl Iterator<Item = Self> {
        static NETWORK_TYPES: [NetworkType; 4] =
            [NetworkType::Mainnet, NetworkType::Testnet, NetworkType::Devnet, NetworkType::Simnet];
        NETWORK_TYPES.iter().copied()
    }
}

impl FromStr for NetworkType {
    type Err = NetworkTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            "simnet" => Ok(NetworkType::Simnet),
            "devnet" => Ok(NetworkType::Devnet),
            _ => Err(NetworkTypeError::InvalidNetworkType(s.to_string())),
        }
    }
}

impl Display for NetworkType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Simnet => "simnet",
            NetworkType::Devnet => "devnet",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_type_parsing() {
        for net in NetworkType::iter() {
            assert_eq!(NetworkType::from_str(&net.to_string()).unwrap(), net);
        }
        assert_eq!(NetworkType::from_str("MainNet").unwrap(), NetworkType::Mainnet);
        assert!(NetworkType::from_str("moonnet").is_err());
    }
}
