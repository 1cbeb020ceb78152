//! Segregated-witness commitment and block weight.

use crate::constants::WITNESS_SCALE_FACTOR;
use crate::error::{Result, RuleError};
use crate::merkle::witness_merkle_root;
use crate::types::{Block, Hash, Transaction};

/// Leading bytes of the coinbase output that carries the witness
/// commitment: OP_RETURN, a 36-byte push, and the commitment tag.
const WITNESS_COMMITMENT_HEADER: [u8; 6] = [0x6a, 0x24, 0xaa, 0x21, 0xa9, 0xed];

/// Weight units of one transaction: stripped size counted at the full
/// scale factor, witness bytes at one.
pub fn transaction_weight(tx: &Transaction) -> usize {
    tx.serialized_size_stripped() * (WITNESS_SCALE_FACTOR - 1) + tx.serialized_size()
}

/// Weight units of a block.
pub fn block_weight(block: &Block) -> usize {
    block.serialized_size_stripped() * (WITNESS_SCALE_FACTOR - 1) + block.serialized_size()
}

/// Locates the witness commitment output in a coinbase: the last output
/// whose script starts with the commitment header. Returns the 32
/// commitment bytes.
fn find_witness_commitment(coinbase: &Transaction) -> Option<&[u8]> {
    coinbase.outputs.iter().rev().find_map(|output| {
        let script = &output.pk_script;
        if script.len() >= 38 && script[..6] == WITNESS_COMMITMENT_HEADER {
            Some(&script[6..38])
        } else {
            None
        }
    })
}

/// Validates the block's witness data against the coinbase commitment.
///
/// When no commitment output exists the block must carry no witness data
/// at all. When one exists, the coinbase witness must be a single 32-byte
/// nonce and the commitment must equal the double-SHA256 of the witness
/// merkle root concatenated with that nonce. With segwit inactive,
/// witness data is rejected outright.
pub fn validate_witness_commitment(block: &Block, segwit_active: bool) -> Result<()> {
    let has_witness = block.transactions.iter().any(Transaction::has_witness);
    if !segwit_active {
        if has_witness {
            return Err(RuleError::UnexpectedWitness.into());
        }
        return Ok(());
    }
    let coinbase = match block.transactions.first() {
        Some(coinbase) => coinbase,
        None => return Err(RuleError::NoTransactions.into()),
    };

    let commitment = match find_witness_commitment(coinbase) {
        Some(commitment) => commitment,
        None => {
            if has_witness {
                return Err(RuleError::UnexpectedWitness.into());
            }
            return Ok(());
        }
    };

    let witness = &coinbase.inputs[0].witness;
    if witness.len() != 1 || witness[0].len() != 32 {
        return Err(RuleError::InvalidWitnessCommitment.into());
    }

    let root = witness_merkle_root(block);
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(root.as_bytes());
    preimage[32..].copy_from_slice(&witness[0]);
    let computed = Hash::double_sha256(&preimage);
    if computed.as_bytes() != commitment {
        return Err(RuleError::InvalidWitnessCommitment.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHeader, OutPoint, TxIn, TxOut};

    fn coinbase_with_nonce(nonce: [u8; 32]) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_outpoint: OutPoint::null(),
                signature_script: vec![0x01, 0x01],
                witness: vec![nonce.to_vec()],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut { value: 100, pk_script: vec![0x51] }],
            lock_time: 0,
        }
    }

    fn witness_spend() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxIn {
                previous_outpoint: OutPoint::new(Hash([8; 32]), 0),
                signature_script: vec![],
                witness: vec![vec![0x30; 72], vec![0x02; 33]],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut { value: 50, pk_script: vec![0x51] }],
            lock_time: 0,
        }
    }

    fn committed_block(nonce: [u8; 32]) -> Block {
        let mut block = Block {
            header: BlockHeader {
                version: 2,
                prev_block: Hash::ZERO,
                merkle_root: Hash::ZERO,
                timestamp: 1_600_000_000,
                bits: 0x1d00ffff,
                nonce: 0,
            },
            transactions: vec![coinbase_with_nonce(nonce), witness_spend()],
        };
        let root = witness_merkle_root(&block);
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(root.as_bytes());
        preimage[32..].copy_from_slice(&nonce);
        let mut script = WITNESS_COMMITMENT_HEADER.to_vec();
        script.extend_from_slice(Hash::double_sha256(&preimage).as_bytes());
        block.transactions[0].outputs.push(TxOut { value: 0, pk_script: script });
        block
    }

    #[test]
    fn valid_commitment_accepted() {
        let block = committed_block([0x42; 32]);
        validate_witness_commitment(&block, true).unwrap();
    }

    #[test]
    fn tampered_witness_breaks_commitment() {
        let mut block = committed_block([0x42; 32]);
        block.transactions[1].inputs[0].witness[0][0] ^= 0xff;
        let err = validate_witness_commitment(&block, true).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::InvalidWitnessCommitment)));
    }

    #[test]
    fn bad_nonce_shape_rejected() {
        let mut block = committed_block([0x42; 32]);
        block.transactions[0].inputs[0].witness = vec![vec![0u8; 31]];
        let err = validate_witness_commitment(&block, true).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::InvalidWitnessCommitment)));

        let mut block = committed_block([0x42; 32]);
        block.transactions[0].inputs[0].witness = vec![vec![0u8; 32], vec![0u8; 32]];
        assert!(validate_witness_commitment(&block, true).is_err());
    }

    #[test]
    fn witness_without_commitment_rejected() {
        let mut block = committed_block([0x42; 32]);
        block.transactions[0].outputs.pop();
        let err = validate_witness_commitment(&block, true).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::UnexpectedWitness)));
    }

    #[test]
    fn no_witness_no_commitment_is_fine() {
        let mut block = committed_block([0x42; 32]);
        block.transactions[0].outputs.pop();
        block.transactions[0].inputs[0].witness.clear();
        block.transactions[1].inputs[0].witness.clear();
        validate_witness_commitment(&block, true).unwrap();
        validate_witness_commitment(&block, false).unwrap();
    }

    #[test]
    fn inactive_segwit_rejects_witness_data() {
        let block = committed_block([0x42; 32]);
        let err = validate_witness_commitment(&block, false).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::UnexpectedWitness)));
    }

    #[test]
    fn weight_discounts_witness_bytes() {
        let tx = witness_spend();
        let stripped = tx.serialized_size_stripped();
        let total = tx.serialized_size();
        assert!(total > stripped);
        assert_eq!(transaction_weight(&tx), stripped * 3 + total);

        let block = committed_block([0x42; 32]);
        assert_eq!(
            block_weight(&block),
            block.serialized_size_stripped() * 3 + block.serialized_size()
        );
    }
}
