//! # Consensus-Core
//!
//! Consensus validation core for a multi-algorithm proof-of-work chain.
//!
//! This crate implements the full block acceptance pipeline: stateless
//! sanity checks, contextual header and block rules, and connection of a
//! block's transactions against an unspent-output view. It is a pure
//! validation library; networking, persistent storage, and script
//! execution live behind small traits supplied by the caller
//! ([`utxo::UtxoStore`], [`connect::ScriptVerifier`],
//! [`block::TimeSource`]).
//!
//! ## Architecture
//!
//! Validation is split into three stages, mirrored by the modules:
//! - Sanity: rules checkable from the block alone ([`block`],
//!   [`transaction`], [`merkle`], [`sigop`])
//! - Context: rules against the header chain ([`pow`], [`thresholds`],
//!   [`checkpoints`], [`index`])
//! - Connection: rules against the output set ([`connect`], [`utxo`],
//!   [`sequence`], [`economic`], [`segwit`])
//!
//! [`chain::Chain`] ties the stages together and tracks the best tip.
//!
//! ## Usage
//!
//! ```rust
//! use consensus_core::params::ChainParams;
//! use consensus_core::chain::Chain;
//!
//! let chain = Chain::new(ChainParams::mainnet());
//! assert!(chain.tip().is_none());
//! ```

pub mod block;
pub mod chain;
pub mod checkpoints;
pub mod connect;
pub mod constants;
pub mod economic;
pub mod error;
pub mod index;
pub mod merkle;
pub mod params;
pub mod pow;
pub mod segwit;
pub mod sequence;
pub mod sigop;
pub mod thresholds;
pub mod transaction;
pub mod types;
pub mod utxo;

// Re-export the types nearly every caller touches.
pub use block::{BehaviorFlags, TimeSource, BF_FAST_ADD, BF_NONE, BF_NO_POW_CHECK};
pub use chain::Chain;
pub use connect::ScriptVerifier;
pub use error::{Result, RuleError, ValidateError};
pub use params::ChainParams;
pub use types::{Block, BlockHeader, Hash, OutPoint, Transaction, TxIn, TxOut};
pub use utxo::{UtxoEntry, UtxoStore, UtxoView};
