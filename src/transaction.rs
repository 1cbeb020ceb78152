//! Transaction-level validation.
//!
//! Sanity checks are context-free and depend only on the transaction
//! itself; input checks need an output view and the spending height.

use crate::constants::{
    LOCKTIME_THRESHOLD, MAX_BLOCK_BASE_SIZE, MAX_COINBASE_SCRIPT_LEN, MAX_MONEY,
    MIN_COINBASE_SCRIPT_LEN, SEQUENCE_FINAL,
};
use crate::error::{Result, RuleError};
use crate::params::ChainParams;
use crate::types::{Amount, Transaction};
use crate::utxo::UtxoView;

/// Whether the transaction has the coinbase shape: exactly one input whose
/// previous outpoint is null.
pub fn is_coinbase(tx: &Transaction) -> bool {
    tx.inputs.len() == 1 && tx.inputs[0].previous_outpoint.is_null()
}

/// Context-free transaction checks: input and output presence, size,
/// output value ranges, duplicate inputs, and the coinbase/non-coinbase
/// shape of previous outpoints.
pub fn check_transaction_sanity(tx: &Transaction) -> Result<()> {
    if tx.inputs.is_empty() {
        return Err(RuleError::NoTxInputs.into());
    }
    if tx.outputs.is_empty() {
        return Err(RuleError::NoTxOutputs.into());
    }

    let serialized = tx.serialized_size_stripped();
    if serialized > MAX_BLOCK_BASE_SIZE {
        return Err(RuleError::TxTooBig { got: serialized, max: MAX_BLOCK_BASE_SIZE }.into());
    }

    // Output values are checked individually and as a running total; both
    // must stay within [0, MAX_MONEY].
    let mut total: Amount = 0;
    for output in &tx.outputs {
        if output.value < 0 || output.value > MAX_MONEY {
            return Err(RuleError::BadTxOutValue { value: output.value }.into());
        }
        total = total
            .checked_add(output.value)
            .filter(|t| *t <= MAX_MONEY)
            .ok_or(RuleError::BadTxOutValue { value: total })?;
    }

    let mut seen = std::collections::HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.previous_outpoint) {
            return Err(RuleError::DuplicateTxInputs.into());
        }
    }

    if is_coinbase(tx) {
        let len = tx.inputs[0].signature_script.len();
        if !(MIN_COINBASE_SCRIPT_LEN..=MAX_COINBASE_SCRIPT_LEN).contains(&len) {
            return Err(RuleError::BadCoinbaseScriptLen {
                len,
                min: MIN_COINBASE_SCRIPT_LEN,
                max: MAX_COINBASE_SCRIPT_LEN,
            }
            .into());
        }
    } else {
        for input in &tx.inputs {
            if input.previous_outpoint.is_null() {
                return Err(RuleError::BadTxInput.into());
            }
        }
    }

    Ok(())
}

/// Whether the transaction is finalized with respect to the given block
/// height and time. A lock time below [`LOCKTIME_THRESHOLD`] is a height,
/// otherwise a Unix timestamp; inputs with a final sequence number opt out
/// of lock-time enforcement entirely.
pub fn is_finalized_transaction(tx: &Transaction, block_height: u64, block_time: u64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if u64::from(tx.lock_time) < u64::from(LOCKTIME_THRESHOLD) {
        block_height
    } else {
        block_time
    };
    if u64::from(tx.lock_time) < threshold {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Serializes a block height the way coinbase scripts carry it: a small
/// integer opcode for 0 through 16, otherwise a length-prefixed
/// little-endian number with a sign-clearing pad byte when needed.
pub fn encode_coinbase_height(height: u64) -> Vec<u8> {
    match height {
        0 => vec![0x00],
        1..=16 => vec![0x50 + height as u8],
        _ => {
            let mut bytes = Vec::new();
            let mut rest = height;
            while rest > 0 {
                bytes.push((rest & 0xff) as u8);
                rest >>= 8;
            }
            if bytes.last().is_some_and(|b| b & 0x80 != 0) {
                bytes.push(0x00);
            }
            let mut script = Vec::with_capacity(bytes.len() + 1);
            script.push(bytes.len() as u8);
            script.extend_from_slice(&bytes);
            script
        }
    }
}

/// Reads the serialized height from the front of a coinbase signature
/// script.
pub fn extract_coinbase_height(coinbase: &Transaction) -> Result<u64> {
    let script = &coinbase.inputs[0].signature_script;
    let opcode = *script.first().ok_or(RuleError::MissingCoinbaseHeight)?;
    match opcode {
        0x00 => Ok(0),
        0x51..=0x60 => Ok(u64::from(opcode - 0x50)),
        // Any other leading byte is the length of the height payload; the
        // full payload must be present but only the first eight bytes
        // contribute to the little-endian value.
        len => {
            let len = len as usize;
            if script.len() < 1 + len {
                return Err(RuleError::MissingCoinbaseHeight.into());
            }
            let mut height: u64 = 0;
            for (i, byte) in script[1..1 + len].iter().take(8).enumerate() {
                height |= u64::from(*byte) << (8 * i);
            }
            Ok(height)
        }
    }
}

/// Checks that the coinbase's serialized height matches the height the
/// block occupies.
pub fn check_serialized_height(coinbase: &Transaction, want: u64) -> Result<()> {
    let got = extract_coinbase_height(coinbase)?;
    if got != want {
        return Err(RuleError::BadCoinbaseHeight { got, want }.into());
    }
    Ok(())
}

/// Checks a non-coinbase transaction's inputs against the output view:
/// existence, coinbase maturity, input value ranges, and that inputs cover
/// outputs. Returns the fee. Coinbases have no inputs to check and pay no
/// fee.
pub fn check_transaction_inputs(
    tx: &Transaction,
    tx_height: u64,
    view: &UtxoView,
    params: &ChainParams,
) -> Result<Amount> {
    if is_coinbase(tx) {
        return Ok(0);
    }

    let mut total_in: Amount = 0;
    for input in &tx.inputs {
        let entry = view
            .lookup_entry(&input.previous_outpoint)
            .filter(|e| !e.is_spent())
            .ok_or(RuleError::MissingTxOut { outpoint: input.previous_outpoint })?;

        if entry.is_coinbase() {
            let confirmations = tx_height.saturating_sub(entry.block_height());
            if confirmations < params.coinbase_maturity {
                return Err(RuleError::ImmatureSpend {
                    outpoint: input.previous_outpoint,
                    origin_height: entry.block_height(),
                    spend_height: tx_height,
                    maturity: params.coinbase_maturity,
                }
                .into());
            }
        }

        let amount = entry.amount();
        if amount < 0 || amount > MAX_MONEY {
            return Err(RuleError::BadTxOutValue { value: amount }.into());
        }
        total_in = total_in
            .checked_add(amount)
            .filter(|t| *t <= MAX_MONEY)
            .ok_or(RuleError::BadTxOutValue { value: total_in })?;
    }

    let total_out: Amount = tx.outputs.iter().map(|o| o.value).sum();
    if total_in < total_out {
        return Err(RuleError::SpendTooHigh { total_in, total_out }.into());
    }
    Ok(total_in - total_out)
}
