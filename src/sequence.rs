//! Relative lock-time (sequence) calculation.
//!
//! A transaction's sequence lock is the latest time-based and height-based
//! constraint across its inputs; both must lie in the past relative to the
//! block that includes the transaction. Time constraints are evaluated
//! against median-time-past, not raw timestamps.

use crate::constants::{
    SEQUENCE_LOCK_TIME_DISABLED, SEQUENCE_LOCK_TIME_GRANULARITY, SEQUENCE_LOCK_TIME_IS_SECONDS,
    SEQUENCE_LOCK_TIME_MASK,
};
use crate::error::{Result, RuleError};
use crate::index::{ChainIndex, NodeKey};
use crate::transaction::is_coinbase;
use crate::types::Transaction;
use crate::utxo::UtxoView;

/// The earliest block a transaction may enter, as a pair of exclusive
/// bounds: the included block's median-time-past must exceed `seconds` and
/// its height must exceed `block_height`. The values -1 mean no
/// constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceLock {
    pub seconds: i64,
    pub block_height: i64,
}

impl SequenceLock {
    fn unrestricted() -> SequenceLock {
        SequenceLock { seconds: -1, block_height: -1 }
    }
}

/// Computes the sequence lock for `tx` against the view, where `prev_node`
/// is the chain tip the including block builds on. Inactive enforcement,
/// coinbases, and pre-version-2 transactions are unrestricted.
pub fn calc_sequence_lock(
    tx: &Transaction,
    view: &UtxoView,
    index: &ChainIndex,
    prev_node: NodeKey,
    csv_active: bool,
) -> Result<SequenceLock> {
    let mut lock = SequenceLock::unrestricted();
    if !csv_active || tx.version < 2 || is_coinbase(tx) {
        return Ok(lock);
    }

    for input in &tx.inputs {
        // Entries may already be marked spent when this runs after the
        // block's transactions have connected; the origin height survives.
        let entry = view
            .lookup_entry(&input.previous_outpoint)
            .ok_or(RuleError::MissingTxOut { outpoint: input.previous_outpoint })?;

        let sequence = input.sequence;
        if sequence & SEQUENCE_LOCK_TIME_DISABLED != 0 {
            continue;
        }

        let input_height = entry.block_height();
        let masked = i64::from(sequence & SEQUENCE_LOCK_TIME_MASK);
        if sequence & SEQUENCE_LOCK_TIME_IS_SECONDS != 0 {
            // Time-based locks count from the median-time-past of the
            // block before the one containing the spent output.
            let prev_input_height = input_height.saturating_sub(1);
            let anchor = index
                .ancestor(prev_node, prev_input_height)
                .unwrap_or(prev_node);
            let median_time = index.median_time_past(anchor) as i64;
            let relative = masked << SEQUENCE_LOCK_TIME_GRANULARITY;
            lock.seconds = lock.seconds.max(median_time + relative - 1);
        } else {
            let height_lock = input_height as i64 + masked - 1;
            lock.block_height = lock.block_height.max(height_lock);
        }
    }
    Ok(lock)
}

/// Whether a transaction with the given lock may be included in a block of
/// `block_height` whose parent chain has `median_time_past`.
pub fn sequence_lock_active(lock: &SequenceLock, block_height: u64, median_time_past: u64) -> bool {
    lock.seconds < median_time_past as i64 && lock.block_height < block_height as i64
}
