//! Network-independent consensus constants.
//!
//! Per-network values (activation heights, payee lists, algorithm tables)
//! live in [`crate::params::ChainParams`] so multiple parameter sets can
//! coexist in tests.

/// Maximum unit supply: the largest valid transaction output amount and the
/// cap on any running total of amounts.
pub const MAX_MONEY: i64 = 21_000_000 * UNITS_PER_COIN;

/// Indivisible units per whole coin.
pub const UNITS_PER_COIN: i64 = 100_000_000;

/// Maximum serialized block size excluding witness data.
pub const MAX_BLOCK_BASE_SIZE: usize = 1_000_000;

/// Witness data is discounted by this factor in weight and sigop accounting.
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Maximum block weight: base size times the witness scale factor.
pub const MAX_BLOCK_WEIGHT: usize = MAX_BLOCK_BASE_SIZE * WITNESS_SCALE_FACTOR;

/// Maximum scaled signature-operation cost permitted in one block.
pub const MAX_BLOCK_SIGOPS_COST: usize = 80_000;

/// Lock times below this threshold are block heights; at or above it they
/// are Unix timestamps.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Number of ancestor blocks in the median-time-past window.
pub const MEDIAN_TIME_BLOCKS: usize = 11;

/// Maximum number of seconds a block timestamp may be ahead of the adjusted
/// time. Currently 2 hours.
pub const MAX_TIME_OFFSET_SECONDS: u64 = 2 * 60 * 60;

/// Minimum length of a coinbase signature script.
pub const MIN_COINBASE_SCRIPT_LEN: usize = 2;

/// Maximum length of a coinbase signature script.
pub const MAX_COINBASE_SCRIPT_LEN: usize = 100;

/// Block version from which coinbases must start with the serialized block
/// height.
pub const SERIALIZED_HEIGHT_VERSION: i32 = 2;

/// Block version from which strict DER signatures are enforced once the
/// activation height is reached (BIP0066).
pub const DER_SIGNATURES_VERSION: i32 = 3;

/// Block version from which CHECKLOCKTIMEVERIFY is enforced once the
/// activation height is reached (BIP0065).
pub const CHECKLOCKTIMEVERIFY_VERSION: i32 = 4;

/// Maximum script length; longer scripts are provably unspendable.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Sequence value that exempts an input from lock-time rules.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Sequence bit that disables relative lock-time for an input.
pub const SEQUENCE_LOCK_TIME_DISABLED: u32 = 1 << 31;

/// Sequence bit selecting time-based (rather than height-based) relative
/// lock-time.
pub const SEQUENCE_LOCK_TIME_IS_SECONDS: u32 = 1 << 22;

/// Mask extracting the relative lock-time value from a sequence number.
pub const SEQUENCE_LOCK_TIME_MASK: u32 = 0x0000_ffff;

/// Time-based relative lock-times are multiples of 512 seconds.
pub const SEQUENCE_LOCK_TIME_GRANULARITY: u32 = 9;
