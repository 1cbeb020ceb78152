//! Block subsidy schedule and coinbase payout validation.
//!
//! Before the hard fork the subsidy halves on a fixed interval. The fork
//! block itself carries the one-time disbursement: the configured payee
//! amounts, the core fund, and the first post-fork subsidy. From the next
//! block on, emission follows a smooth exponential decay fitted to the
//! pre-fork halving cycle and the algorithm's emission interval.

use log::trace;

use crate::error::{CoinbaseValueError, Result, RuleError};
use crate::params::ChainParams;
use crate::types::{Amount, Transaction};

/// Subsidy for a block at `height` mined with `version`, excluding fees.
pub fn calc_block_subsidy(height: u64, params: &ChainParams, version: i32) -> Amount {
    if params.subsidy_halving_interval == 0 {
        return params.base_subsidy;
    }
    match params.fork_era(height) {
        0 => {
            let halvings = height / params.subsidy_halving_interval;
            if halvings >= 64 {
                0
            } else {
                params.base_subsidy >> halvings
            }
        }
        _ => {
            if params.is_hard_fork_height(height) {
                let mut total: Amount = params.hard_fork_payees.iter().map(|p| p.amount).sum();
                total += calc_block_subsidy(height + 1, params, version);
                total += params.core_amount;
                return total;
            }
            // Exponential decay fitted against the pre-fork cycle; the
            // constants are part of the emission schedule and must not be
            // simplified.
            let ttpb = params.algo_for_version(version, height).version_interval as f64;
            (2.7 * ttpb / 300.0
                * 2.7f64.powf(-(height as f64) * 300.0 * 9.0 / ttpb / 375_000.0)
                * 100_000_000.0
                / 9.0) as Amount
        }
    }
}

/// Validates the structure of the one-time hard-fork coinbase: payee
/// amounts and addresses in configured order, then the core fund output
/// with the configured public keys embedded in its script. Any surplus the
/// miner smuggles into further outputs is caught by the overall coinbase
/// value check.
pub fn check_hardfork_coinbase(coinbase: &Transaction, params: &ChainParams) -> Result<()> {
    trace!("checking contents of hard fork coinbase");
    let outputs = &coinbase.outputs;
    for (i, payee) in params.hard_fork_payees.iter().enumerate() {
        let output = outputs
            .get(i)
            .ok_or(RuleError::BadCoinbaseValue(CoinbaseValueError::PayeeAmount { index: i }))?;
        if output.value != payee.amount {
            return Err(
                RuleError::BadCoinbaseValue(CoinbaseValueError::PayeeAmount { index: i }).into()
            );
        }
        // The address bytes sit at a fixed offset of the expected
        // pay-to-pubkey-hash script; no need to decode the whole script.
        let proposed = output
            .pk_script
            .get(3..23)
            .ok_or(RuleError::BadCoinbaseValue(CoinbaseValueError::PayeeAddress { index: i }))?;
        if proposed != payee.script_address {
            return Err(
                RuleError::BadCoinbaseValue(CoinbaseValueError::PayeeAddress { index: i }).into()
            );
        }
    }

    let core = outputs.get(params.hard_fork_payees.len()).ok_or(RuleError::BadCoinbaseValue(
        CoinbaseValueError::CoreAmount { got: 0, want: params.core_amount },
    ))?;
    if core.value != params.core_amount {
        return Err(RuleError::BadCoinbaseValue(CoinbaseValueError::CoreAmount {
            got: core.value,
            want: params.core_amount,
        })
        .into());
    }

    // The multisig script carries the first key at offset 2, each later
    // key preceded by its one-byte length.
    let mut remainder = core
        .pk_script
        .get(2..)
        .ok_or(RuleError::BadCoinbaseValue(CoinbaseValueError::CorePubkeys))?;
    for key in &params.core_pubkeys {
        if remainder.len() < key.len() || &remainder[..key.len()] != key.as_slice() {
            return Err(RuleError::BadCoinbaseValue(CoinbaseValueError::CorePubkeys).into());
        }
        let advance = (key.len() + 1).min(remainder.len());
        remainder = &remainder[advance..];
    }
    Ok(())
}
