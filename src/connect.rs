//! Full block connection checks.
//!
//! This is the final validation stage: the block has passed sanity and
//! contextual checks, and the caller supplies a view positioned at the
//! parent block. On success the view has
//! the block's spends and outputs applied and its best hash advanced to
//! the block.

use log::{debug, trace};

use crate::checkpoints;
use crate::constants::{
    CHECKLOCKTIMEVERIFY_VERSION, DER_SIGNATURES_VERSION, MAX_BLOCK_SIGOPS_COST, MAX_MONEY,
};
use crate::economic::{calc_block_subsidy, check_hardfork_coinbase};
use crate::error::{CoinbaseValueError, Result, RuleError, ValidateError};
use crate::index::{ChainIndex, NodeKey};
use crate::params::{ChainParams, DeploymentId};
use crate::sequence::{calc_sequence_lock, sequence_lock_active};
use crate::sigop::get_sig_op_cost;
use crate::thresholds::deployment_active;
use crate::transaction::check_transaction_inputs;
use crate::types::{Amount, Block, OutPoint};
use crate::utxo::{SpentOutput, UtxoStore, UtxoView};

/// Script evaluation flags handed to the script engine.
pub const SCRIPT_BIP16: u32 = 1 << 0;
pub const SCRIPT_VERIFY_DER_SIGNATURES: u32 = 1 << 1;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 2;
pub const SCRIPT_VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 3;
pub const SCRIPT_VERIFY_WITNESS: u32 = 1 << 4;
pub const SCRIPT_VERIFY_NULLDUMMY: u32 = 1 << 5;

/// External script engine. Implementations execute every input script of
/// every non-coinbase transaction under `flags` against the entries in the
/// view, reporting the first failure.
pub trait ScriptVerifier {
    fn check_block_scripts(
        &self,
        block: &Block,
        view: &UtxoView,
        flags: u32,
    ) -> std::result::Result<(), RuleError>;
}

/// Script engine that accepts everything. Suitable for replaying blocks
/// whose scripts were validated elsewhere.
pub struct NoopScriptVerifier;

impl ScriptVerifier for NoopScriptVerifier {
    fn check_block_scripts(
        &self,
        _block: &Block,
        _view: &UtxoView,
        _flags: u32,
    ) -> std::result::Result<(), RuleError> {
        Ok(())
    }
}

/// Rejects blocks that would recreate an outstanding output of an earlier
/// transaction with the same id (BIP0030). The scan is skipped for the
/// grandfathered exception blocks and once serialized coinbase heights
/// make id collisions impossible.
pub fn check_bip30(
    block: &Block,
    height: u64,
    view: &mut UtxoView,
    store: &dyn UtxoStore,
    params: &ChainParams,
) -> Result<()> {
    if height >= params.bip34_height {
        return Ok(());
    }
    if params.is_bip30_exception(height, &block.block_hash()) {
        return Ok(());
    }

    let mut outpoints = Vec::new();
    for tx in &block.transactions {
        let txid = tx.txid();
        for i in 0..tx.outputs.len() {
            outpoints.push(OutPoint::new(txid, i as u32));
        }
    }
    view.fetch_utxos(store, &outpoints);
    for outpoint in outpoints {
        if let Some(entry) = view.lookup_entry(&outpoint) {
            if !entry.is_spent() {
                return Err(RuleError::OverwriteTx {
                    outpoint,
                    height: entry.block_height(),
                }
                .into());
            }
        }
    }
    Ok(())
}

/// Script flags for a block at `height` given the soft-fork states. The
/// strict-signature and lock-time opcodes are gated on the block version as
/// well as the activation height.
fn script_flags(
    height: u64,
    block_version: i32,
    bip16_active: bool,
    csv_active: bool,
    segwit_active: bool,
    params: &ChainParams,
) -> u32 {
    let mut flags = 0;
    if bip16_active {
        flags |= SCRIPT_BIP16;
    }
    if block_version >= DER_SIGNATURES_VERSION && height >= params.bip66_height {
        flags |= SCRIPT_VERIFY_DER_SIGNATURES;
    }
    if block_version >= CHECKLOCKTIMEVERIFY_VERSION && height >= params.bip65_height {
        flags |= SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY;
    }
    if csv_active {
        flags |= SCRIPT_VERIFY_CHECKSEQUENCEVERIFY;
    }
    if segwit_active {
        flags |= SCRIPT_VERIFY_WITNESS | SCRIPT_VERIFY_NULLDUMMY;
    }
    flags
}

/// Performs the connection checks for a block extending `parent` at
/// `height` and applies it to `view`. The view must be positioned at the
/// block's parent; anything else is an orchestration bug, not a property
/// of the block.
///
/// When `stxos` is supplied, every spent entry is appended in spend order
/// for later disconnection.
pub fn check_connect_block(
    block: &Block,
    height: u64,
    parent: NodeKey,
    index: &ChainIndex,
    params: &ChainParams,
    view: &mut UtxoView,
    store: &dyn UtxoStore,
    script_verifier: &dyn ScriptVerifier,
    mut stxos: Option<&mut Vec<SpentOutput>>,
) -> Result<()> {
    let block_hash = block.block_hash();
    // The genesis coinbase is unspendable, so there is no state to connect.
    if block_hash == params.genesis_hash {
        return Err(RuleError::MissingTxOut { outpoint: OutPoint::null() }.into());
    }
    if *view.best_hash() != block.header.prev_block {
        return Err(ValidateError::Assertion(format!(
            "view best hash {} is not the parent of block {}",
            view.best_hash(),
            block_hash
        )));
    }
    trace!("connecting block {} at height {}", block_hash, height);

    check_bip30(block, height, view, store, params)?;

    let bip16_active = block.header.timestamp >= params.bip16_activation_time;
    let csv_active = deployment_active(index, Some(parent), params, DeploymentId::Csv);
    let segwit_active = deployment_active(index, Some(parent), params, DeploymentId::Segwit);

    view.fetch_input_utxos(store, block);

    // Exact scaled signature-operation cost now that spent outputs are
    // known; the sanity pass only bounded the legacy portion.
    let mut total_sig_ops = 0usize;
    for (i, tx) in block.transactions.iter().enumerate() {
        let cost = get_sig_op_cost(tx, i == 0, view, bip16_active, segwit_active)?;
        total_sig_ops = total_sig_ops.saturating_add(cost);
        if total_sig_ops > MAX_BLOCK_SIGOPS_COST {
            return Err(
                RuleError::TooManySigOps { got: total_sig_ops, max: MAX_BLOCK_SIGOPS_COST }.into()
            );
        }
    }

    let mut total_fees: Amount = 0;
    for (i, tx) in block.transactions.iter().enumerate() {
        let fee = check_transaction_inputs(tx, height, view, params)?;
        total_fees = total_fees
            .checked_add(fee)
            .filter(|t| *t <= MAX_MONEY)
            .ok_or(RuleError::BadFees)?;
        view.connect_transaction(tx, height, i == 0, &mut stxos)?;
    }

    let coinbase_paid: Amount = block.transactions[0].outputs.iter().map(|o| o.value).sum();
    let allowed = calc_block_subsidy(height, params, block.header.version) + total_fees;
    if coinbase_paid > allowed {
        return Err(RuleError::BadCoinbaseValue(CoinbaseValueError::Overpays {
            got: coinbase_paid,
            allowed,
        })
        .into());
    }

    if params.is_hard_fork_height(height) {
        check_hardfork_coinbase(&block.transactions[0], params)?;
    }

    if csv_active {
        let median_time = index.median_time_past(parent);
        for tx in &block.transactions {
            let lock = calc_sequence_lock(tx, view, index, parent, true)?;
            if !sequence_lock_active(&lock, height, median_time) {
                return Err(RuleError::UnfinalizedTx { txid: tx.txid() }.into());
            }
        }
    }

    // Scripts at or below the latest checkpoint are vouched for by the
    // checkpoint itself; running them is by far the most expensive part
    // of connecting.
    if checkpoints::scripts_required(params, height) {
        let flags = script_flags(
            height,
            block.header.version,
            bip16_active,
            csv_active,
            segwit_active,
            params,
        );
        debug!("running scripts for block {} with flags {:#x}", block_hash, flags);
        script_verifier.check_block_scripts(block, view, flags)?;
    }

    view.set_best_hash(block_hash);
    Ok(())
}
