//! Version-bits soft-fork deployment tracking.
//!
//! A deployment moves through its states only at retarget-window
//! boundaries, driven by the median-time-past of the last block of each
//! window and by how many blocks in a window signal the deployment's bit.
//! State is a pure function of the chain, so it is recomputed on demand;
//! windows are walked backward to the deployment's defined origin and
//! transitions replayed forward.

use crate::index::{ChainIndex, NodeKey};
use crate::params::{ChainParams, Deployment, DeploymentId};

/// Bits 29..31 of the block version must carry this pattern for the
/// remaining bits to be read as deployment signals.
const VERSION_BITS_TOP_MASK: u32 = 0xe000_0000;
const VERSION_BITS_TOP_BITS: u32 = 0x2000_0000;

/// Deployment lifecycle state in effect for a window of blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
    /// Before the start time; the first state of every deployment.
    Defined,
    /// Signalling window: miners vote with the deployment bit.
    Started,
    /// The threshold was met; the rules activate one window later.
    LockedIn,
    /// Rules are in force. Terminal.
    Active,
    /// The deployment expired before locking in. Terminal.
    Failed,
}

fn signals(version: i32, deployment: &Deployment) -> bool {
    let version = version as u32;
    version & VERSION_BITS_TOP_MASK == VERSION_BITS_TOP_BITS
        && version >> deployment.bit & 1 == 1
}

/// Counts blocks signalling `deployment` in the window ending at
/// `window_end` (inclusive).
fn count_signals(
    index: &ChainIndex,
    window_end: NodeKey,
    window: u64,
    deployment: &Deployment,
) -> u64 {
    let mut count = 0;
    let mut current = Some(window_end);
    for _ in 0..window {
        let key = match current {
            Some(key) => key,
            None => break,
        };
        let node = index.node(key);
        if signals(node.version, deployment) {
            count += 1;
        }
        current = node.parent;
    }
    count
}

/// State of `id` for the block that would follow `prev`. `None` means the
/// next block is genesis, where every deployment is defined.
pub fn threshold_state(
    index: &ChainIndex,
    prev: Option<NodeKey>,
    params: &ChainParams,
    id: DeploymentId,
) -> ThresholdState {
    let deployment = &params.deployments[id as usize];
    let window = params.miner_confirmation_window;

    // Rewind to the last node of the window preceding the next block.
    let mut boundary = match prev {
        Some(prev) => {
            let height = index.node(prev).height;
            // Within the first, incomplete window no transition can have
            // happened yet.
            let aligned = match height.checked_sub((height + 1) % window) {
                Some(aligned) => aligned,
                None => return ThresholdState::Defined,
            };
            match index.ancestor(prev, aligned) {
                Some(node) => Some(node),
                None => return ThresholdState::Defined,
            }
        }
        None => None,
    };

    // Walk back one window at a time until the deployment cannot yet have
    // left its initial state.
    let mut boundaries = Vec::new();
    while let Some(node) = boundary {
        if index.median_time_past(node) < deployment.start_time {
            break;
        }
        boundaries.push(node);
        let height = index.node(node).height;
        boundary = height
            .checked_sub(window)
            .and_then(|h| index.ancestor(node, h));
    }

    // Replay transitions forward across the collected boundaries.
    let mut state = ThresholdState::Defined;
    for node in boundaries.into_iter().rev() {
        let median_time = index.median_time_past(node);
        state = match state {
            ThresholdState::Defined => {
                if median_time >= deployment.expire_time {
                    ThresholdState::Failed
                } else if median_time >= deployment.start_time {
                    ThresholdState::Started
                } else {
                    ThresholdState::Defined
                }
            }
            ThresholdState::Started => {
                if median_time >= deployment.expire_time {
                    ThresholdState::Failed
                } else if count_signals(index, node, window, deployment)
                    >= params.rule_change_activation_threshold
                {
                    ThresholdState::LockedIn
                } else {
                    ThresholdState::Started
                }
            }
            ThresholdState::LockedIn => ThresholdState::Active,
            terminal @ (ThresholdState::Active | ThresholdState::Failed) => terminal,
        };
    }
    state
}

/// Whether `id` is in force for the block following `prev`.
pub fn deployment_active(
    index: &ChainIndex,
    prev: Option<NodeKey>,
    params: &ChainParams,
    id: DeploymentId,
) -> bool {
    threshold_state(index, prev, params, id) == ThresholdState::Active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHeader, Hash};

    const WINDOW: u64 = 8;
    const THRESHOLD: u64 = 6;
    const START: u64 = 10_000;
    const EXPIRE: u64 = 90_000;

    fn test_params() -> ChainParams {
        let mut params = ChainParams::mainnet();
        params.miner_confirmation_window = WINDOW;
        params.rule_change_activation_threshold = THRESHOLD;
        params.deployments[DeploymentId::Csv as usize] =
            Deployment { bit: 0, start_time: START, expire_time: EXPIRE };
        params
    }

    struct ChainBuilder {
        index: ChainIndex,
        tip: Option<NodeKey>,
        prev_hash: Hash,
        next_time: u64,
        salt: u32,
    }

    impl ChainBuilder {
        fn new() -> ChainBuilder {
            ChainBuilder {
                index: ChainIndex::new(),
                tip: None,
                prev_hash: Hash::ZERO,
                next_time: 1_000,
                salt: 0,
            }
        }

        /// Extends the chain by `count` blocks at fixed spacing, each with
        /// the given version, advancing timestamps by 100 seconds.
        fn extend(&mut self, count: u64, version: i32) {
            for _ in 0..count {
                self.salt += 1;
                let header = BlockHeader {
                    version,
                    prev_block: self.prev_hash,
                    merkle_root: Hash::double_sha256(&self.salt.to_le_bytes()),
                    timestamp: self.next_time,
                    bits: 0x1d00ffff,
                    nonce: 0,
                };
                self.next_time += 100;
                self.prev_hash = header.block_hash();
                self.tip = Some(self.index.insert(&header, self.tip).unwrap());
            }
        }

        /// Jumps the next timestamp so upcoming medians pass `time`.
        fn warp_past(&mut self, time: u64) {
            self.next_time = self.next_time.max(time + 1);
        }
    }

    const SIGNAL: i32 = 0x2000_0001;
    const QUIET: i32 = 0x2000_0000;

    fn state(builder: &ChainBuilder, params: &ChainParams) -> ThresholdState {
        threshold_state(&builder.index, builder.tip, params, DeploymentId::Csv)
    }

    #[test]
    fn defined_before_start_time() {
        let params = test_params();
        let mut builder = ChainBuilder::new();
        assert_eq!(state(&builder, &params), ThresholdState::Defined);
        builder.extend(WINDOW * 3, SIGNAL);
        // Medians still precede the start time; signalling is ignored.
        assert_eq!(state(&builder, &params), ThresholdState::Defined);
    }

    #[test]
    fn full_lifecycle_to_active() {
        let params = test_params();
        let mut builder = ChainBuilder::new();
        builder.extend(WINDOW - 1, QUIET);
        builder.warp_past(START);
        builder.extend(WINDOW + 1, QUIET);
        assert_eq!(state(&builder, &params), ThresholdState::Started);

        // A fully signalling window locks in at its boundary.
        let height = builder.index.node(builder.tip.unwrap()).height;
        let to_boundary = (WINDOW - (height + 1) % WINDOW) % WINDOW;
        builder.extend(to_boundary, SIGNAL);
        builder.extend(WINDOW, SIGNAL);
        assert_eq!(state(&builder, &params), ThresholdState::LockedIn);

        builder.extend(WINDOW, QUIET);
        assert_eq!(state(&builder, &params), ThresholdState::Active);

        // Terminal: later windows never regress.
        builder.extend(WINDOW * 2, QUIET);
        assert_eq!(state(&builder, &params), ThresholdState::Active);
    }

    #[test]
    fn below_threshold_stays_started() {
        let params = test_params();
        let mut builder = ChainBuilder::new();
        builder.warp_past(START);
        builder.extend(WINDOW * 2, QUIET);
        assert_eq!(state(&builder, &params), ThresholdState::Started);

        // One signal short of the threshold.
        builder.extend(THRESHOLD - 1, SIGNAL);
        builder.extend(WINDOW - (THRESHOLD - 1), QUIET);
        assert_eq!(state(&builder, &params), ThresholdState::Started);
    }

    #[test]
    fn expires_to_failed() {
        let params = test_params();
        let mut builder = ChainBuilder::new();
        builder.warp_past(START);
        builder.extend(WINDOW * 2, QUIET);
        builder.warp_past(EXPIRE);
        builder.extend(WINDOW, QUIET);
        assert_eq!(state(&builder, &params), ThresholdState::Failed);

        builder.extend(WINDOW * 2, SIGNAL);
        assert_eq!(state(&builder, &params), ThresholdState::Failed);
    }

    #[test]
    fn signals_requires_top_bits() {
        let deployment = Deployment { bit: 1, start_time: 0, expire_time: u64::MAX };
        assert!(signals(0x2000_0002, &deployment));
        assert!(!signals(0x2000_0001, &deployment));
        // Legacy versions and other top patterns never signal.
        assert!(!signals(2, &deployment));
        assert!(!signals(514, &deployment));
        assert!(!signals(0x6000_0002_u32 as i32, &deployment));
    }
}
