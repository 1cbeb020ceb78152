//! Block-level validation.
//!
//! Sanity checks are context-free and may run on any block in isolation;
//! contextual checks position the block against the chain index and the
//! active soft forks. Callers run sanity first, the contextual checks on
//! accept, and the connect checks last.

use std::time::{SystemTime, UNIX_EPOCH};

use log::trace;

use crate::checkpoints;
use crate::constants::{
    MAX_BLOCK_BASE_SIZE, MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT, MAX_TIME_OFFSET_SECONDS,
    SERIALIZED_HEIGHT_VERSION, WITNESS_SCALE_FACTOR,
};
use crate::error::{Result, RuleError};
use crate::index::{ChainIndex, NodeKey};
use crate::merkle::block_merkle_root;
use crate::params::{ChainParams, DeploymentId};
use crate::pow::{calc_next_required_difficulty, check_proof_of_work};
use crate::segwit::{block_weight, validate_witness_commitment};
use crate::sigop::transaction_sig_ops;
use crate::thresholds::deployment_active;
use crate::transaction::{
    check_serialized_height, check_transaction_sanity, is_coinbase, is_finalized_transaction,
};
use crate::types::{Block, BlockHeader};

/// Validation behavior tweaks, combined by bitwise or.
pub type BehaviorFlags = u32;

/// Full validation.
pub const BF_NONE: BehaviorFlags = 0;

/// The block is known good (for instance replayed from local storage):
/// skip expensive contextual work such as difficulty and finality checks.
pub const BF_FAST_ADD: BehaviorFlags = 1 << 0;

/// Skip the proof-of-work hash comparison. The claimed difficulty is still
/// range-checked.
pub const BF_NO_POW_CHECK: BehaviorFlags = 1 << 1;

/// Source of the network-adjusted wall-clock time used for the future
/// timestamp bound.
pub trait TimeSource {
    fn adjusted_time(&self) -> u64;
}

/// System clock without peer adjustment.
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn adjusted_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Fixed time source for tests and replay.
pub struct FixedTimeSource(pub u64);

impl TimeSource for FixedTimeSource {
    fn adjusted_time(&self) -> u64 {
        self.0
    }
}

/// Context-free header checks: the proof of work under the algorithm the
/// version selects at `height`, and the future timestamp bound.
pub fn check_block_header_sanity(
    header: &BlockHeader,
    params: &ChainParams,
    height: u64,
    time_source: &dyn TimeSource,
    flags: BehaviorFlags,
) -> Result<()> {
    // The header encodes its timestamp in 32 bits; anything larger cannot
    // round-trip the wire format and is rejected outright.
    if header.timestamp > u64::from(u32::MAX) {
        return Err(RuleError::TimeTooNew {
            timestamp: header.timestamp,
            max: u64::from(u32::MAX),
        }
        .into());
    }

    let algo = params.algo_for_version(header.version, height);
    check_proof_of_work(header, algo, flags)?;

    let max = time_source.adjusted_time() + MAX_TIME_OFFSET_SECONDS;
    if header.timestamp > max {
        return Err(RuleError::TimeTooNew { timestamp: header.timestamp, max }.into());
    }
    Ok(())
}

/// Context-free block checks: header sanity, coinbase placement, size,
/// per-transaction sanity, the merkle root, duplicate transactions, and
/// the legacy signature-operation ceiling.
pub fn check_block_sanity(
    block: &Block,
    params: &ChainParams,
    height: u64,
    time_source: &dyn TimeSource,
    flags: BehaviorFlags,
) -> Result<()> {
    check_block_header_sanity(&block.header, params, height, time_source, flags)?;

    if block.transactions.is_empty() {
        return Err(RuleError::NoTransactions.into());
    }

    let serialized = block.serialized_size_stripped();
    if serialized > MAX_BLOCK_BASE_SIZE {
        return Err(RuleError::BlockTooBig { got: serialized, max: MAX_BLOCK_BASE_SIZE }.into());
    }

    if !is_coinbase(&block.transactions[0]) {
        return Err(RuleError::FirstTxNotCoinbase.into());
    }
    for (i, tx) in block.transactions.iter().enumerate().skip(1) {
        if is_coinbase(tx) {
            return Err(RuleError::MultipleCoinbases { index: i }.into());
        }
    }

    for tx in &block.transactions {
        check_transaction_sanity(tx)?;
    }

    let computed = block_merkle_root(block);
    if computed != block.header.merkle_root {
        return Err(RuleError::BadMerkleRoot {
            claimed: block.header.merkle_root,
            computed,
        }
        .into());
    }

    let mut seen = std::collections::HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
        let txid = tx.txid();
        if !seen.insert(txid) {
            return Err(RuleError::DuplicateTx { txid }.into());
        }
    }

    // Preliminary ceiling on legacy operations alone; the precise scaled
    // count including pay-to-script-hash and witness operations runs at
    // connect time when the spent outputs are known.
    let mut total_sig_ops = 0usize;
    for tx in &block.transactions {
        total_sig_ops += transaction_sig_ops(tx) * WITNESS_SCALE_FACTOR;
        if total_sig_ops > MAX_BLOCK_SIGOPS_COST {
            return Err(
                RuleError::TooManySigOps { got: total_sig_ops, max: MAX_BLOCK_SIGOPS_COST }.into()
            );
        }
    }

    Ok(())
}

/// Contextual header checks against the chain the block extends: required
/// difficulty, median-time-past monotonicity, and checkpoints. `prev` is
/// the parent node, or `None` for genesis.
pub fn check_block_header_context(
    header: &BlockHeader,
    prev: Option<NodeKey>,
    index: &ChainIndex,
    params: &ChainParams,
    flags: BehaviorFlags,
) -> Result<()> {
    let height = match prev {
        Some(prev) => index.node(prev).height + 1,
        None => 0,
    };

    if flags & BF_FAST_ADD == 0 {
        let expected = calc_next_required_difficulty(index, prev, params, header.version)?;
        if header.bits != expected {
            return Err(RuleError::UnexpectedDifficulty { got: header.bits, expected }.into());
        }
        if let Some(prev) = prev {
            let median = index.median_time_past(prev);
            if header.timestamp <= median {
                return Err(
                    RuleError::TimeTooOld { timestamp: header.timestamp, median }.into()
                );
            }
        }
    }

    checkpoints::verify_checkpoint(params, height, &header.block_hash())
}

/// Contextual block checks: the header context, transaction finality under
/// the lock-time rules in force, the serialized coinbase height, the
/// witness commitment, and the block weight ceiling.
pub fn check_block_context(
    block: &Block,
    prev: Option<NodeKey>,
    index: &ChainIndex,
    params: &ChainParams,
    flags: BehaviorFlags,
) -> Result<()> {
    check_block_header_context(&block.header, prev, index, params, flags)?;

    let height = match prev {
        Some(prev) => index.node(prev).height + 1,
        None => 0,
    };
    trace!("contextual checks for block at height {}", height);

    // Fast add trusts the block (it was validated before being stored), so
    // everything past the header context is skipped.
    if flags & BF_FAST_ADD != 0 {
        return Ok(());
    }

    let csv_active = deployment_active(index, prev, params, DeploymentId::Csv);
    // Once relative lock-times are in force, absolute lock-times are
    // measured against median-time-past rather than the header time.
    let block_time = match (csv_active, prev) {
        (true, Some(prev)) => index.median_time_past(prev),
        _ => block.header.timestamp,
    };
    for tx in &block.transactions {
        if !is_finalized_transaction(tx, height, block_time) {
            return Err(RuleError::UnfinalizedTx { txid: tx.txid() }.into());
        }
    }

    if block.header.version >= SERIALIZED_HEIGHT_VERSION
        && height >= params.bip34_height
        && !block.transactions.is_empty()
    {
        check_serialized_height(&block.transactions[0], height)?;
    }

    let segwit_active = deployment_active(index, prev, params, DeploymentId::Segwit);
    validate_witness_commitment(block, segwit_active)?;

    let weight = block_weight(block);
    if weight > MAX_BLOCK_WEIGHT {
        return Err(RuleError::BlockWeightTooHigh { got: weight, max: MAX_BLOCK_WEIGHT }.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::encode_coinbase_height;
    use crate::types::{Hash, OutPoint, Transaction, TxIn, TxOut};

    fn coinbase_at(height: u64) -> Transaction {
        let mut script = encode_coinbase_height(height);
        while script.len() < 2 {
            script.push(0x00);
        }
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_outpoint: OutPoint::null(),
                signature_script: script,
                witness: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut { value: 200_000_000, pk_script: vec![0x51] }],
            lock_time: 0,
        }
    }

    fn block_at(height: u64, prev: Hash, timestamp: u64) -> Block {
        let mut block = Block {
            header: BlockHeader {
                version: 2,
                prev_block: prev,
                merkle_root: Hash::ZERO,
                timestamp,
                bits: 0x1d00ffff,
                nonce: 0,
            },
            transactions: vec![coinbase_at(height)],
        };
        block.header.merkle_root = block_merkle_root(&block);
        block
    }

    fn clock_after(block: &Block) -> FixedTimeSource {
        FixedTimeSource(block.header.timestamp)
    }

    #[test]
    fn sane_block_passes() {
        let params = ChainParams::mainnet();
        let block = block_at(1, Hash([1; 32]), 1_600_000_000);
        check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK).unwrap();
    }

    #[test]
    fn future_timestamp_rejected() {
        let params = ChainParams::mainnet();
        let block = block_at(1, Hash([1; 32]), 1_600_000_000);
        let clock = FixedTimeSource(block.header.timestamp - MAX_TIME_OFFSET_SECONDS - 1);
        let err =
            check_block_sanity(&block, &params, 1, &clock, BF_NO_POW_CHECK).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::TimeTooNew { .. })));
    }

    #[test]
    fn timestamp_beyond_wire_range_rejected() {
        let params = ChainParams::mainnet();
        // One past the largest value the 32-bit wire field can carry.
        let block = block_at(1, Hash([1; 32]), u64::from(u32::MAX) + 1);
        let err = check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK)
            .unwrap_err();
        assert!(matches!(
            err.rule(),
            Some(RuleError::TimeTooNew { timestamp, max })
                if *timestamp == u64::from(u32::MAX) + 1 && *max == u64::from(u32::MAX)
        ));
    }

    #[test]
    fn empty_block_rejected() {
        let params = ChainParams::mainnet();
        let mut block = block_at(1, Hash([1; 32]), 1_600_000_000);
        block.transactions.clear();
        let err = check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK)
            .unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::NoTransactions)));
    }

    #[test]
    fn first_tx_must_be_coinbase() {
        let params = ChainParams::mainnet();
        let mut block = block_at(1, Hash([1; 32]), 1_600_000_000);
        block.transactions[0].inputs[0].previous_outpoint = OutPoint::new(Hash([2; 32]), 0);
        block.header.merkle_root = block_merkle_root(&block);
        let err = check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK)
            .unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::FirstTxNotCoinbase)));
    }

    #[test]
    fn second_coinbase_rejected() {
        let params = ChainParams::mainnet();
        let mut block = block_at(1, Hash([1; 32]), 1_600_000_000);
        let mut dup = coinbase_at(1);
        dup.lock_time = 7;
        block.transactions.push(dup);
        block.header.merkle_root = block_merkle_root(&block);
        let err = check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK)
            .unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::MultipleCoinbases { index: 1 })));
    }

    #[test]
    fn tampered_merkle_root_rejected() {
        let params = ChainParams::mainnet();
        let mut block = block_at(1, Hash([1; 32]), 1_600_000_000);
        block.header.merkle_root.0[0] ^= 0xff;
        let err = check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK)
            .unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::BadMerkleRoot { .. })));
    }

    #[test]
    fn duplicate_transactions_rejected() {
        let params = ChainParams::mainnet();
        let mut block = block_at(1, Hash([1; 32]), 1_600_000_000);
        let spend = Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_outpoint: OutPoint::new(Hash([3; 32]), 0),
                signature_script: vec![0x51],
                witness: vec![],
                sequence: u32::MAX,
            }],
            outputs: vec![TxOut { value: 1, pk_script: vec![0x51] }],
            lock_time: 0,
        };
        block.transactions.push(spend.clone());
        block.transactions.push(spend);
        block.header.merkle_root = block_merkle_root(&block);
        let err = check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK)
            .unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::DuplicateTx { .. })));
    }

    #[test]
    fn sig_op_ceiling_enforced() {
        let params = ChainParams::mainnet();
        let mut block = block_at(1, Hash([1; 32]), 1_600_000_000);
        // 20001 legacy operations at scale 4 exceed the 80000 ceiling.
        block.transactions[0].outputs[0].pk_script = vec![0xac; 20_001];
        block.header.merkle_root = block_merkle_root(&block);
        let err = check_block_sanity(&block, &params, 1, &clock_after(&block), BF_NO_POW_CHECK)
            .unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::TooManySigOps { .. })));
    }

    fn grow_chain(index: &mut ChainIndex, params: &ChainParams, length: u64) -> Option<NodeKey> {
        let mut prev = None;
        let mut prev_hash = Hash::ZERO;
        for i in 0..length {
            let header = BlockHeader {
                version: 2,
                prev_block: prev_hash,
                merkle_root: Hash([i as u8; 32]),
                timestamp: 1_600_000_000 + i * 300,
                bits: params.algo("sha256d", i).min_bits,
                nonce: 0,
            };
            prev_hash = header.block_hash();
            prev = Some(index.insert(&header, prev).unwrap());
        }
        prev
    }

    #[test]
    fn header_context_enforces_difficulty_and_time() {
        let params = ChainParams::mainnet();
        let mut index = ChainIndex::new();
        let tip = grow_chain(&mut index, &params, 20);
        let tip_node = index.node(tip.unwrap()).clone();

        let mut header = BlockHeader {
            version: 2,
            prev_block: tip_node.hash,
            merkle_root: Hash::ZERO,
            timestamp: tip_node.timestamp + 300,
            bits: 0x1d00ffff,
            nonce: 0,
        };
        check_block_header_context(&header, tip, &index, &params, BF_NONE).unwrap();

        header.bits = 0x1c7fff80;
        let err = check_block_header_context(&header, tip, &index, &params, BF_NONE).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::UnexpectedDifficulty { .. })));
        // Fast add skips the difficulty requirement.
        check_block_header_context(&header, tip, &index, &params, BF_FAST_ADD).unwrap();

        header.bits = 0x1d00ffff;
        header.timestamp = index.median_time_past(tip.unwrap());
        let err = check_block_header_context(&header, tip, &index, &params, BF_NONE).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::TimeTooOld { .. })));
    }

    #[test]
    fn block_context_requires_serialized_height() {
        let mut params = ChainParams::mainnet();
        params.bip34_height = 5;
        let mut index = ChainIndex::new();
        let tip = grow_chain(&mut index, &params, 20);
        let tip_node = index.node(tip.unwrap()).clone();

        // Height 20 block claiming height 19 in its coinbase.
        let mut block = block_at(19, tip_node.hash, tip_node.timestamp + 300);
        block.header.bits =
            calc_next_required_difficulty(&index, tip, &params, block.header.version).unwrap();
        let err = check_block_context(&block, tip, &index, &params, BF_NONE).unwrap_err();
        assert!(matches!(
            err.rule(),
            Some(RuleError::BadCoinbaseHeight { got: 19, want: 20 })
        ));

        block = block_at(20, tip_node.hash, tip_node.timestamp + 300);
        block.header.bits =
            calc_next_required_difficulty(&index, tip, &params, block.header.version).unwrap();
        check_block_context(&block, tip, &index, &params, BF_NONE).unwrap();
    }

    #[test]
    fn fast_add_skips_serialized_height() {
        let mut params = ChainParams::mainnet();
        params.bip34_height = 5;
        let mut index = ChainIndex::new();
        let tip = grow_chain(&mut index, &params, 20);
        let tip_node = index.node(tip.unwrap()).clone();

        // A replayed block is trusted: the wrong coinbase height passes.
        let block = block_at(19, tip_node.hash, tip_node.timestamp + 300);
        check_block_context(&block, tip, &index, &params, BF_FAST_ADD).unwrap();
    }

    #[test]
    fn block_context_rejects_unfinalized_transaction() {
        let params = ChainParams::mainnet();
        let mut index = ChainIndex::new();
        let tip = grow_chain(&mut index, &params, 20);
        let tip_node = index.node(tip.unwrap()).clone();

        let mut block = block_at(20, tip_node.hash, tip_node.timestamp + 300);
        block.transactions.push(Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_outpoint: OutPoint::new(Hash([4; 32]), 0),
                signature_script: vec![0x51],
                witness: vec![],
                sequence: 0,
            }],
            outputs: vec![TxOut { value: 1, pk_script: vec![0x51] }],
            lock_time: 1_000,
        });
        block.header.merkle_root = block_merkle_root(&block);
        // Finality is only checked under normal flags, which also demand
        // the retargeted difficulty.
        block.header.bits =
            calc_next_required_difficulty(&index, tip, &params, block.header.version).unwrap();
        let err = check_block_context(&block, tip, &index, &params, BF_NONE).unwrap_err();
        assert!(matches!(err.rule(), Some(RuleError::UnfinalizedTx { .. })));
    }
}
