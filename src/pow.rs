//! Proof-of-work targets and difficulty retargeting.
//!
//! Targets are 256-bit integers stored compactly in the header `bits`
//! field as a base-256 exponent and 23-bit mantissa with a sign bit. The
//! retarget rule runs per block over a short window of same-algorithm
//! ancestors: the previous target is scaled by the ratio of observed to
//! nominal spacing, the observed span clamped to a bounded adjustment
//! factor, and the result never exceeds the algorithm's limit.

use crate::block::{BehaviorFlags, BF_NO_POW_CHECK};
use crate::error::{Result, RuleError};
use crate::index::{ChainIndex, NodeKey};
use crate::params::{AlgoSpec, ChainParams};
use crate::types::BlockHeader;

/// 256-bit unsigned integer as four little-endian 64-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U256([u64; 4]);

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);
    pub const MAX: U256 = U256([u64::MAX; 4]);

    pub fn from_u32(value: u32) -> U256 {
        U256([u64::from(value), 0, 0, 0])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    /// Interprets a hash as a little-endian 256-bit integer.
    pub fn from_le_bytes(bytes: &[u8; 32]) -> U256 {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[i * 8..(i + 1) * 8]);
            *word = u64::from_le_bytes(buf);
        }
        U256(words)
    }

    /// Index of the highest set bit plus one; zero for zero.
    fn bit_len(&self) -> u32 {
        for (i, &word) in self.0.iter().enumerate().rev() {
            if word != 0 {
                return (i as u32) * 64 + (64 - word.leading_zeros());
            }
        }
        0
    }

    fn shl(&self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        result
    }

    fn shr(&self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i >= word_shift {
                result.0[i - word_shift] |= self.0[i] >> bit_shift;
                if bit_shift > 0 && i - word_shift + 1 < 4 {
                    result.0[i - word_shift + 1] |= self.0[i] << (64 - bit_shift);
                }
            }
        }
        result
    }

    /// Multiplication by a word, saturating at the 256-bit maximum.
    pub fn mul_u64(&self, factor: u64) -> U256 {
        let mut result = [0u64; 4];
        let mut carry: u128 = 0;
        for i in 0..4 {
            let product = u128::from(self.0[i]) * u128::from(factor) + carry;
            result[i] = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            return U256::MAX;
        }
        U256(result)
    }

    /// Division by a word. Division by zero yields zero; retarget spans are
    /// clamped to at least one second before reaching here.
    pub fn div_u64(&self, divisor: u64) -> U256 {
        if divisor == 0 {
            return U256::ZERO;
        }
        let mut result = [0u64; 4];
        let mut remainder: u128 = 0;
        for i in (0..4).rev() {
            let acc = (remainder << 64) | u128::from(self.0[i]);
            result[i] = (acc / u128::from(divisor)) as u64;
            remainder = acc % u128::from(divisor);
        }
        U256(result)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        std::cmp::Ordering::Equal
    }
}

/// Expands a compact `bits` value to its full target. Returns `None` when
/// the sign bit is set or the value does not fit in 256 bits.
pub fn expand_compact(bits: u32) -> Option<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 && mantissa != 0 {
        return None;
    }
    if mantissa == 0 {
        return Some(U256::ZERO);
    }
    if exponent <= 3 {
        Some(U256::from_u32(mantissa).shr(8 * (3 - exponent)))
    } else {
        let shift = 8 * (exponent - 3);
        // A mantissa needs at most 24 bits, so anything shifted past the
        // top cannot be represented.
        if shift > 256 - 24 && U256::from_u32(mantissa).bit_len() + shift > 256 {
            return None;
        }
        Some(U256::from_u32(mantissa).shl(shift))
    }
}

/// Compresses a target to canonical compact form, the inverse of
/// [`expand_compact`] for canonical values.
pub fn compact_from_target(target: &U256) -> u32 {
    let mut exponent = (target.bit_len() + 7) / 8;
    let mut mantissa = if exponent <= 3 {
        (target.0[0] as u32) << (8 * (3 - exponent))
    } else {
        target.shr(8 * (exponent - 3)).0[0] as u32
    };
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    (exponent << 24) | (mantissa & 0x007f_ffff)
}

/// Checks the header's claimed difficulty and its proof of work under the
/// given algorithm: the target must be positive and no easier than the
/// algorithm's limit, and the algorithm's hash of the header must not
/// exceed the target. `BF_NO_POW_CHECK` skips the hash comparison only.
pub fn check_proof_of_work(
    header: &BlockHeader,
    algo: &AlgoSpec,
    flags: BehaviorFlags,
) -> Result<()> {
    let target = expand_compact(header.bits)
        .filter(|t| !t.is_zero())
        .ok_or(RuleError::UnexpectedDifficulty { got: header.bits, expected: algo.min_bits })?;

    let limit = expand_compact(algo.min_bits)
        .filter(|t| !t.is_zero())
        .ok_or(RuleError::UnexpectedDifficulty { got: header.bits, expected: algo.min_bits })?;
    if target > limit {
        return Err(
            RuleError::UnexpectedDifficulty { got: header.bits, expected: algo.min_bits }.into()
        );
    }

    if flags & BF_NO_POW_CHECK != 0 {
        return Ok(());
    }

    let pow_hash = (algo.pow_hash)(&header.serialize());
    if U256::from_le_bytes(pow_hash.as_bytes()) > target {
        return Err(RuleError::HighHash.into());
    }
    Ok(())
}

/// Collects up to `limit` most-recent ancestors of `tip` (inclusive) mined
/// with `algo`, newest first.
fn same_algo_ancestors(
    index: &ChainIndex,
    tip: NodeKey,
    params: &ChainParams,
    algo: &AlgoSpec,
    limit: usize,
) -> Vec<NodeKey> {
    let mut found = Vec::with_capacity(limit);
    let mut current = Some(tip);
    while let Some(key) = current {
        if found.len() == limit {
            break;
        }
        let node = index.node(key);
        if params.algo_for_version(node.version, node.height).name == algo.name {
            found.push(key);
        }
        current = node.parent;
    }
    found
}

/// Required difficulty for the block of `algo_version` that would extend
/// `tip`.
///
/// The observed span across the last `retarget_window` same-algorithm
/// intervals is clamped to within `max_adjustment_factor` of nominal, and
/// the previous same-algorithm target scales by observed over nominal.
/// With fewer than two same-algorithm ancestors the limit applies.
pub fn calc_next_required_difficulty(
    index: &ChainIndex,
    tip: Option<NodeKey>,
    params: &ChainParams,
    algo_version: i32,
) -> Result<u32> {
    let tip = match tip {
        Some(tip) => tip,
        None => {
            let algo = params.algo_for_version(algo_version, 0);
            return Ok(algo.min_bits);
        }
    };
    let height = index.node(tip).height + 1;
    let algo = params.algo_for_version(algo_version, height);

    let window =
        same_algo_ancestors(index, tip, params, algo, (params.retarget_window + 1) as usize);
    if window.len() < 2 {
        return Ok(algo.min_bits);
    }

    let newest = index.node(window[0]);
    let oldest = index.node(*window.last().expect("window has at least two nodes"));
    let intervals = (window.len() - 1) as u64;
    let target_timespan = algo.target_spacing * intervals;

    let actual_timespan = newest.timestamp.saturating_sub(oldest.timestamp).max(1);
    let factor = params.max_adjustment_factor;
    let clamped = actual_timespan.clamp(target_timespan / factor, target_timespan * factor);

    let old_target = expand_compact(newest.bits)
        .filter(|t| !t.is_zero())
        .ok_or(RuleError::UnexpectedDifficulty { got: newest.bits, expected: algo.min_bits })?;
    let new_target = old_target.mul_u64(clamped).div_u64(target_timespan);

    let limit = expand_compact(algo.min_bits)
        .unwrap_or(U256::MAX);
    if new_target > limit || new_target.is_zero() {
        return Ok(algo.min_bits);
    }
    Ok(compact_from_target(&new_target))
}
