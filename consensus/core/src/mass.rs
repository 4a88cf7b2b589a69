use crate::{
    config::params::Params,
    subnets::SUBNETWORK_ID_SIZE,
    tx::{Transaction, TransactionInput, TransactionOutput},
};
use kestrel_hashes::HASH_SIZE;

/// The estimated size of a transaction in its canonical serialization. This has to be deterministic,
/// but not necessarily accurate, since it's only used as the size component of the mass formula.
pub fn transaction_estimated_serialized_size(tx: &Transaction) -> u64 {
    let mut size: u64 = 0;
    size += 2; // Tx version (u16)
    size += 8; // Number of inputs (u64)
    size += tx.inputs.iter().map(transaction_input_estimated_serialized_size).sum::<u64>();

    size += 8; // Number of outputs (u64)
    size += tx.outputs.iter().map(transaction_output_estimated_serialized_size).sum::<u64>();

    size += 8; // Lock time (u64)
    size += SUBNETWORK_ID_SIZE as u64;
    size += 8; // Gas (u64)
    size += HASH_SIZE as u64; // Payload hash

    size += 8; // Length of the payload (u64)
    size += tx.payload.len() as u64;
    size
}

fn transaction_input_estimated_serialized_size(input: &TransactionInput) -> u64 {
    let mut size = 0;
    size += HASH_SIZE as u64; // Previous tx ID
    size += 4; // Previous output index (u32)

    size += 8; // Length of signature script (u64)
    size += input.signature_script.len() as u64;

    size += 8; // Sequence (u64)
    size += 1; // Sig op count (u8)
    size
}

pub fn transaction_output_estimated_serialized_size(output: &TransactionOutput) -> u64 {
    let mut size: u64 = 0;
    size += 8; // Value (u64)
    size += 2; // Script public key version (u16)
    size += 8; // Length of script public key (u64)
    size += output.script_public_key.script().len() as u64;
    size
}

/// Calculates transaction mass as a weighted sum of its serialized size, the size of its
/// script public keys and its signature operation count
#[derive(Clone, Debug)]
pub struct MassCalculator {
    mass_per_tx_byte: u64,
    mass_per_script_pub_key_byte: u64,
    mass_per_sig_op: u64,
}

impl MassCalculator {
    pub fn new(mass_per_tx_byte: u64, mass_per_script_pub_key_byte: u64, mass_per_sig_op: u64) -> Self {
        Self { mass_per_tx_byte, mass_per_script_pub_key_byte, mass_per_sig_op }
    }

    pub fn new_with_consensus_params(params: &Params) -> Self {
        Self::new(params.mass_per_tx_byte, params.mass_per_script_pub_key_byte, params.mass_per_sig_op)
    }

    pub fn calc_tx_mass(&self, tx: &Transaction) -> u64 {
        let size = transaction_estimated_serialized_size(tx);
        let total_script_public_key_size: u64 = tx
            .outputs
            .iter()
            .map(|output| 2 /* script public key version (u16) */ + output.script_public_key.script().len() as u64)
            .sum();

        // Coinbase inputs carry no signatures, so the sig op component is skipped for them
        let total_sig_ops: u64 =
            if tx.is_coinbase() { 0 } else { tx.inputs.iter().map(|input| input.sig_op_count as u64).sum() };

        size * self.mass_per_tx_byte
            + total_script_public_key_size * self.mass_per_script_pub_key_byte
            + total_sig_ops * self.mass_per_sig_op
    }

    /// The mass of a block is the sum of its transaction masses. Returns `None` on overflow
    pub fn calc_block_mass<'a>(&self, txs: impl IntoIterator<Item = &'a Transaction>) -> Option<u64> {
        txs.into_iter().try_fold(0u64, |acc, tx| acc.checked_add(self.calc_tx_mass(tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        subnets::SUBNETWORK_ID_NATIVE,
        tx::{ScriptPublicKey, TransactionOutpoint, scriptvec},
    };
    use kestrel_hashes::Hash;

    fn generate_tx(sig_script_len: usize, sig_op_count: u8) -> Transaction {
        let input =
            TransactionInput::new(TransactionOutpoint::new(Hash::from_u64_word(1), 0), vec![0; sig_script_len], 0, sig_op_count);
        let output = TransactionOutput::new(100, ScriptPublicKey::new(0, scriptvec![0xaa; 34]));
        Transaction::new(0, vec![input], vec![output], 0, SUBNETWORK_ID_NATIVE, 0, vec![])
    }

    #[test]
    fn test_mass_components() {
        let calc = MassCalculator::new(1, 10, 1000);
        let tx = generate_tx(66, 1);
        let size = transaction_estimated_serialized_size(&tx);
        assert_eq!(size, 2 + 8 + (32 + 4 + 8 + 66 + 8 + 1) + 8 + (8 + 2 + 8 + 34) + 8 + 20 + 8 + 32 + 8);
        assert_eq!(calc.calc_tx_mass(&tx), size + 36 * 10 + 1000);

        // A longer signature script increases the size component only
        let bigger = generate_tx(100, 1);
        assert_eq!(calc.calc_tx_mass(&bigger) - calc.calc_tx_mass(&tx), 34);

        // Each sig op adds the sig op mass
        let more_sig_ops = generate_tx(66, 3);
        assert_eq!(calc.calc_tx_mass(&more_sig_ops) - calc.calc_tx_mass(&tx), 2000);

        assert_eq!(calc.calc_block_mass([&tx, &bigger]), Some(calc.calc_tx_mass(&tx) + calc.calc_tx_mass(&bigger)));
    }
}
