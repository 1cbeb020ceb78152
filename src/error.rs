//! Error types for consensus validation.
//!
//! Two disjoint failure classes exist: [`RuleError`] for consensus rule
//! violations (expected outcomes of adversarial input, never retried with
//! the same data) and [`ValidateError::Assertion`] for internal invariant
//! breaks that indicate a bug in the caller's orchestration.

use thiserror::Error;

use crate::types::{Hash, OutPoint};

/// A consensus rule violation. Each variant is a reason code carrying the
/// structured context (expected/actual values) needed by callers and tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("transaction has no inputs")]
    NoTxInputs,

    #[error("transaction has no outputs")]
    NoTxOutputs,

    #[error("serialized transaction is too big - got {got}, max {max}")]
    TxTooBig { got: usize, max: usize },

    #[error("transaction output value of {value} is out of range")]
    BadTxOutValue { value: i64 },

    #[error("transaction contains duplicate inputs")]
    DuplicateTxInputs,

    #[error("transaction input refers to a null previous output")]
    BadTxInput,

    #[error("coinbase script length {len} is out of range [{min}, {max}]")]
    BadCoinbaseScriptLen { len: usize, min: usize, max: usize },

    #[error("block does not contain any transactions")]
    NoTransactions,

    #[error("block is too big - got {got}, max {max}")]
    BlockTooBig { got: usize, max: usize },

    #[error("first transaction in block is not a coinbase")]
    FirstTxNotCoinbase,

    #[error("block contains second coinbase at index {index}")]
    MultipleCoinbases { index: usize },

    #[error("block contains duplicate transaction {txid}")]
    DuplicateTx { txid: Hash },

    #[error("block merkle root is invalid - header indicates {claimed}, calculated {computed}")]
    BadMerkleRoot { claimed: Hash, computed: Hash },

    #[error("block contains too many signature operations - got {got}, max {max}")]
    TooManySigOps { got: usize, max: usize },

    #[error("block timestamp of {timestamp} is too far in the future (max {max})")]
    TimeTooNew { timestamp: u64, max: u64 },

    #[error("block timestamp of {timestamp} is not after median time {median}")]
    TimeTooOld { timestamp: u64, median: u64 },

    #[error("block difficulty of {got:08x} is not the expected value of {expected:08x}")]
    UnexpectedDifficulty { got: u32, expected: u32 },

    #[error("block hash is higher than the target difficulty")]
    HighHash,

    #[error("block at height {height} does not match checkpoint hash")]
    BadCheckpoint { height: u64 },

    #[error("block at height {height} forks the chain before checkpoint at height {checkpoint_height}")]
    ForkTooOld { height: u64, checkpoint_height: u64 },

    #[error("block contains unfinalized transaction {txid}")]
    UnfinalizedTx { txid: Hash },

    #[error("coinbase script does not start with a serialized block height")]
    MissingCoinbaseHeight,

    #[error("coinbase serialized block height is {got} when {want} was expected")]
    BadCoinbaseHeight { got: u64, want: u64 },

    #[error("bad coinbase value: {0}")]
    BadCoinbaseValue(CoinbaseValueError),

    #[error("block weight is too high - got {got}, max {max}")]
    BlockWeightTooHigh { got: usize, max: usize },

    #[error("coinbase witness data is invalid or unexpected")]
    UnexpectedWitness,

    #[error("witness commitment does not match computed witness merkle root")]
    InvalidWitnessCommitment,

    #[error("output {outpoint} does not exist or has already been spent")]
    MissingTxOut { outpoint: OutPoint },

    #[error(
        "coinbase output {outpoint} from height {origin_height} spent at height \
         {spend_height} before maturity of {maturity} blocks"
    )]
    ImmatureSpend {
        outpoint: OutPoint,
        origin_height: u64,
        spend_height: u64,
        maturity: u64,
    },

    #[error("total inputs {total_in} are less than total outputs {total_out}")]
    SpendTooHigh { total_in: i64, total_out: i64 },

    #[error("tried to overwrite unspent output {outpoint} created at height {height}")]
    OverwriteTx { outpoint: OutPoint, height: u64 },

    #[error("total fees for block overflow the accumulator")]
    BadFees,

    #[error("previous block {got} is not the current chain tip {tip}")]
    PrevBlockNotBest { got: Hash, tip: Hash },

    #[error("script validation failed: {0}")]
    ScriptValidation(String),
}

/// Detail for [`RuleError::BadCoinbaseValue`]: either the coinbase pays more
/// than subsidy plus fees, or the one-time hard-fork disbursement coinbase
/// deviates from the configured payee structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinbaseValueError {
    #[error("coinbase pays {got} which is more than the expected value of {allowed}")]
    Overpays { got: i64, allowed: i64 },

    #[error("hard-fork coinbase does not pay the correct amount to payee {index}")]
    PayeeAmount { index: usize },

    #[error("hard-fork coinbase does not pay to the correct address for payee {index}")]
    PayeeAddress { index: usize },

    #[error("hard-fork coinbase pays {got} to the core fund, expected {want}")]
    CoreAmount { got: i64, want: i64 },

    #[error("hard-fork coinbase core fund script has missing or incorrect public keys")]
    CorePubkeys,
}

/// Top-level validation error separating rule violations from assertion
/// failures. Assertion failures signal caller bugs (such as handing a view
/// whose best hash is not the block's parent) and are fatal to the attempt
/// rather than grounds to penalize the block's source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
    #[error("consensus rule violated: {0}")]
    Rule(#[from] RuleError),

    #[error("internal assertion failed: {0}")]
    Assertion(String),
}

impl ValidateError {
    /// The underlying rule violation, if this is one.
    pub fn rule(&self) -> Option<&RuleError> {
        match self {
            ValidateError::Rule(e) => Some(e),
            ValidateError::Assertion(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ValidateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_error_carries_context() {
        let err = RuleError::TooManySigOps { got: 90_000, max: 80_000 };
        let msg = err.to_string();
        assert!(msg.contains("90000"));
        assert!(msg.contains("80000"));
    }

    #[test]
    fn validate_error_classifies() {
        let rule: ValidateError = RuleError::NoTxInputs.into();
        assert!(rule.rule().is_some());

        let assertion = ValidateError::Assertion("view best hash mismatch".into());
        assert!(assertion.rule().is_none());
    }
}
