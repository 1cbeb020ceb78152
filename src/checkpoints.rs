//! Checkpoint enforcement.
//!
//! Checkpoints pin known-good block hashes at fixed heights. A candidate
//! block landing exactly on a checkpoint height must match its hash, and
//! no candidate may extend the chain from below the most recent
//! checkpoint. Script validation may also be skipped at or below the
//! latest checkpoint since any mutation would break a later pin.

use crate::error::{Result, RuleError};
use crate::params::{ChainParams, Checkpoint};
use crate::types::Hash;

/// The highest configured checkpoint, if any. Assumes the table is sorted
/// by ascending height, which the parameter constructors guarantee.
pub fn latest_checkpoint(params: &ChainParams) -> Option<&Checkpoint> {
    params.checkpoints.last()
}

/// The checkpoint pinned at exactly `height`.
pub fn checkpoint_at(params: &ChainParams, height: u64) -> Option<&Checkpoint> {
    params
        .checkpoints
        .iter()
        .find(|checkpoint| checkpoint.height == height)
}

/// Checks a candidate block at (`height`, `hash`) against the checkpoint
/// table: an exact-height candidate must carry the pinned hash, and any
/// candidate below the latest checkpoint is a stale fork.
pub fn verify_checkpoint(params: &ChainParams, height: u64, hash: &Hash) -> Result<()> {
    if let Some(checkpoint) = checkpoint_at(params, height) {
        if checkpoint.hash != *hash {
            return Err(RuleError::BadCheckpoint { height }.into());
        }
        return Ok(());
    }
    if let Some(latest) = latest_checkpoint(params) {
        if height < latest.height {
            return Err(RuleError::ForkTooOld { height, checkpoint_height: latest.height }.into());
        }
    }
    Ok(())
}

/// Whether scripts must be executed for a block at `height`: blocks at or
/// below the latest checkpoint are covered by the pins.
pub fn scripts_required(params: &ChainParams, height: u64) -> bool {
    match latest_checkpoint(params) {
        Some(latest) => height > latest.height,
        None => true,
    }
}
