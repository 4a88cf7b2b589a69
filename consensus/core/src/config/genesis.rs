use crate::{
    BlueWorkType, block::Block, header::Header, merkle::calc_hash_merkle_root, subnets::SUBNETWORK_ID_COINBASE, tx::Transaction,
};
use kestrel_hashes::{Hash, ZERO_HASH};

/// The constant part of a network genesis block. The genesis hash is derived from these fields,
/// so it is never hard-coded and can never drift from the header it identifies.
#[derive(Clone, Debug)]
pub struct GenesisBlock {
    pub version: u16,
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u64,
    pub daa_score: u64,
    pub coinbase_payload: &'static [u8],
}

impl GenesisBlock {
    pub fn build_genesis_transactions(&self) -> Vec<Transaction> {
        vec![Transaction::new(0, Vec::new(), Vec::new(), 0, SUBNETWORK_ID_COINBASE, 0, self.coinbase_payload.to_vec())]
    }

    pub fn build_header(&self) -> Header {
        let txs = self.build_genesis_transactions();
        Header::new_finalized(
            self.version,
            Vec::new(),
            calc_hash_merkle_root(txs.iter()),
            ZERO_HASH,
            // The UTXO commitment of an empty multiset
            ZERO_HASH,
            self.timestamp,
            self.bits,
            self.nonce,
            self.daa_score,
            BlueWorkType::ZERO,
            0,
            ZERO_HASH,
        )
    }

    pub fn hash(&self) -> Hash {
        self.build_header().hash
    }

    pub fn build_block(&self) -> Block {
        Block::new(self.build_header(), self.build_genesis_transactions())
    }
}

impl From<&GenesisBlock> for Header {
    fn from(genesis: &GenesisBlock) -> Self {
        genesis.build_header()
    }
}

impl From<&GenesisBlock> for Block {
    fn from(genesis: &GenesisBlock) -> Self {
        genesis.build_block()
    }
}

pub const GENESIS: GenesisBlock = GenesisBlock {
    version: 1,
    timestamp: 1_767_225_600_000,
    bits: 0x1e7fffff,
    nonce: 0x3392c,
    daa_score: 0,
    #[rustfmt::skip]
    coinbase_payload: &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // Blue score
        0x00, 0xf2, 0x05, 0x2a, 0x01, 0x00, 0x00, 0x00, // Subsidy
        0x00, 0x00, // Script version
        0x01,       // Varint
        0x00,       // OP-FALSE
        b'k', b'e', b's', b't', b'r', b'e', b'l', b' ', b'm', b'a', b'i', b'n', b'n', b'e', b't',
    ],
};

pub const TESTNET_GENESIS: GenesisBlock = GenesisBlock {
    version: 1,
    timestamp: 1_767_225_600_000,
    bits: 0x1e7fffff,
    nonce: 0x14582,
    daa_score: 0,
    #[rustfmt::skip]
    coinbase_payload: &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0xf2, 0x05, 0x2a, 0x01, 0x00, 0x00, 0x00,
        0x00, 0x00,
        0x01,
        0x00,
        b'k', b'e', b's', b't', b'r', b'e', b'l', b' ', b't', b'e', b's', b't', b'n', b'e', b't',
    ],
};

pub const DEVNET_GENESIS: GenesisBlock = GenesisBlock {
    version: 1,
    timestamp: 1_767_225_600_000,
    bits: 0x207fffff,
    nonce: 0,
    daa_score: 0,
    #[rustfmt::skip]
    coinbase_payload: &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0xf2, 0x05, 0x2a, 0x01, 0x00, 0x00, 0x00,
        0x00, 0x00,
        0x01,
        0x00,
        b'k', b'e', b's', b't', b'r', b'e', b'l', b' ', b'd', b'e', b'v', b'n', b'e', b't',
    ],
};

pub const SIMNET_GENESIS: GenesisBlock = GenesisBlock {
    version: 1,
    timestamp: 1_767_225_600_000,
    bits: 0x207fffff,
    nonce: 0,
    daa_score: 0,
    #[rustfmt::skip]
    coinbase_payload: &[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0xf2, 0x05, 0x2a, 0x01, 0x00, 0x00, 0x00,
        0x00, 0x00,
        0x01,
        0x00,
        b'k', b'e', b's', b't', b'r', b'e', b'l', b' ', b's', b'i', b'm', b'n', b'e', b't',
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coinbase::CoinbaseData;

    #[test]
    fn test_genesis_hashes_are_distinct_and_stable() {
        let hashes = [GENESIS.hash(), TESTNET_GENESIS.hash(), DEVNET_GENESIS.hash(), SIMNET_GENESIS.hash()];
        for (i, a) in hashes.iter().enumerate() {
            for b in hashes.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(GENESIS.hash(), GENESIS.hash());
        let block = GENESIS.build_block();
        assert_eq!(block.hash(), GENESIS.hash());
        assert!(block.transactions[0].is_coinbase());
        assert!(block.header.direct_parents().is_empty());
    }

    #[test]
    fn test_genesis_coinbase_payload_is_well_formed() {
        for genesis in [GENESIS, TESTNET_GENESIS, DEVNET_GENESIS, SIMNET_GENESIS] {
            let data = CoinbaseData::deserialize(genesis.coinbase_payload).unwrap();
            assert_eq!(data.blue_score, 0);
            assert_eq!(data.subsidy, 50 * crate::constants::SOMPI_PER_KESTREL);
            assert!(data.miner_data.extra_data.starts_with(b"kestrel"));
        }
    }
}
