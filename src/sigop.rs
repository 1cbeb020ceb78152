//! Signature-operation accounting.
//!
//! Blocks are limited by scaled signature-operation cost: legacy operations
//! in input and output scripts weigh `WITNESS_SCALE_FACTOR` each, pay-to-
//! script-hash redeem scripts are counted precisely at the same weight, and
//! witness operations weigh one. Script parsing here is tolerant of
//! malformed scripts, counting the operations that parse; whether such a
//! script actually executes is the script engine's concern.

use crate::constants::WITNESS_SCALE_FACTOR;
use crate::error::{Result, RuleError};
use crate::types::{Transaction, TxIn};
use crate::utxo::UtxoView;

pub const OP_0: u8 = 0x00;
pub const OP_DATA_20: u8 = 0x14;
pub const OP_DATA_32: u8 = 0x20;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// Key count charged for a CHECKMULTISIG whose key count cannot be read
/// from the preceding opcode.
const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// A parsed script operation: the opcode and its immediate data, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScriptOp<'a> {
    opcode: u8,
    data: &'a [u8],
}

/// Parses as many operations as the script yields before any malformed
/// trailing push. The boolean is false when parsing stopped early.
fn parse_script(script: &[u8]) -> (Vec<ScriptOp<'_>>, bool) {
    let mut ops = Vec::new();
    let mut i = 0;
    while i < script.len() {
        let opcode = script[i];
        i += 1;
        let data_len = match opcode {
            0x01..=0x4b => opcode as usize,
            OP_PUSHDATA1 => {
                if script.len() - i < 1 {
                    return (ops, false);
                }
                let n = script[i] as usize;
                i += 1;
                n
            }
            OP_PUSHDATA2 => {
                if script.len() - i < 2 {
                    return (ops, false);
                }
                let n = u16::from_le_bytes([script[i], script[i + 1]]) as usize;
                i += 2;
                n
            }
            OP_PUSHDATA4 => {
                if script.len() - i < 4 {
                    return (ops, false);
                }
                let n = u32::from_le_bytes([script[i], script[i + 1], script[i + 2], script[i + 3]])
                    as usize;
                i += 4;
                n
            }
            _ => 0,
        };
        if script.len() - i < data_len {
            return (ops, false);
        }
        ops.push(ScriptOp { opcode, data: &script[i..i + data_len] });
        i += data_len;
    }
    (ops, true)
}

fn sig_op_count(ops: &[ScriptOp<'_>], precise: bool) -> usize {
    let mut count = 0;
    for (i, op) in ops.iter().enumerate() {
        match op.opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let prev = i.checked_sub(1).map(|j| ops[j].opcode);
                match prev {
                    Some(op) if precise && (OP_1..=OP_16).contains(&op) => {
                        count += (op - OP_1 + 1) as usize;
                    }
                    _ => count += MAX_PUBKEYS_PER_MULTISIG,
                }
            }
            _ => {}
        }
    }
    count
}

/// Counts legacy signature operations in a single script. With `precise`,
/// CHECKMULTISIG key counts are read from a small-integer opcode directly
/// preceding them when present.
pub fn count_sig_ops(script: &[u8], precise: bool) -> usize {
    let (ops, _) = parse_script(script);
    sig_op_count(&ops, precise)
}

/// Legacy (pre-witness, pre-P2SH) signature operations in a transaction:
/// every input signature script and every output script, imprecisely.
pub fn transaction_sig_ops(tx: &Transaction) -> usize {
    let mut total = 0;
    for input in &tx.inputs {
        total += count_sig_ops(&input.signature_script, false);
    }
    for output in &tx.outputs {
        total += count_sig_ops(&output.pk_script, false);
    }
    total
}

fn is_push_only(ops: &[ScriptOp<'_>]) -> bool {
    ops.iter().all(|op| op.opcode <= OP_16)
}

/// Whether the script matches the pay-to-script-hash template exactly.
pub fn is_pay_to_script_hash(script: &[u8]) -> bool {
    script.len() == 23
        && script[0] == OP_HASH160
        && script[1] == OP_DATA_20
        && script[22] == OP_EQUAL
}

/// Whether the script is provably unspendable, so its output may be
/// omitted from the unspent set: an OP_RETURN lead byte or an oversized
/// script.
pub fn is_unspendable(pk_script: &[u8]) -> bool {
    if pk_script.len() > crate::constants::MAX_SCRIPT_SIZE {
        return true;
    }
    matches!(pk_script.first(), Some(&OP_RETURN))
}

/// Returns the witness program version and payload when the script matches
/// the witness program template.
fn witness_program(script: &[u8]) -> Option<(u8, &[u8])> {
    if script.len() < 4 || script.len() > 42 {
        return None;
    }
    let version = match script[0] {
        OP_0 => 0,
        op @ OP_1..=OP_16 => op - OP_1 + 1,
        _ => return None,
    };
    let push_len = script[1] as usize;
    if push_len != script.len() - 2 || !(2..=40).contains(&push_len) {
        return None;
    }
    Some((version, &script[2..]))
}

/// Precise signature operations for one input under pay-to-script-hash
/// rules: for a P2SH output the redeem script (the final push of a
/// push-only signature script) is counted, otherwise the output script is.
pub fn precise_sig_ops(sig_script: &[u8], pk_script: &[u8], bip16_active: bool) -> usize {
    let (pk_ops, _) = parse_script(pk_script);
    if !(bip16_active && is_pay_to_script_hash(pk_script)) {
        return sig_op_count(&pk_ops, true);
    }
    let (sig_ops, complete) = parse_script(sig_script);
    if !complete || !is_push_only(&sig_ops) {
        return 0;
    }
    match sig_ops.last() {
        Some(op) => count_sig_ops(op.data, true),
        None => 0,
    }
}

/// Witness signature operations for one input: one for a version-0
/// key-hash program, a precise count of the witness script for a version-0
/// script-hash program, zero otherwise. P2SH-nested programs are resolved
/// through the redeem script.
fn witness_sig_ops(input: &TxIn, pk_script: &[u8]) -> usize {
    let redeem;
    let program_script = if is_pay_to_script_hash(pk_script) {
        let (sig_ops, complete) = parse_script(&input.signature_script);
        if !complete || !is_push_only(&sig_ops) {
            return 0;
        }
        match sig_ops.last() {
            Some(op) => {
                redeem = op.data;
                redeem
            }
            None => return 0,
        }
    } else {
        pk_script
    };
    match witness_program(program_script) {
        Some((0, payload)) if payload.len() == 20 => 1,
        Some((0, payload)) if payload.len() == 32 => match input.witness.last() {
            Some(witness_script) => count_sig_ops(witness_script, true),
            None => 0,
        },
        _ => 0,
    }
}

/// Total scaled signature-operation cost of a transaction: legacy and
/// P2SH operations scaled by [`WITNESS_SCALE_FACTOR`], witness operations
/// at unit weight. Non-coinbase inputs must be present in the view.
pub fn get_sig_op_cost(
    tx: &Transaction,
    is_coinbase: bool,
    view: &UtxoView,
    bip16_active: bool,
    segwit_active: bool,
) -> Result<usize> {
    let mut cost = transaction_sig_ops(tx) * WITNESS_SCALE_FACTOR;
    if is_coinbase {
        return Ok(cost);
    }
    for input in &tx.inputs {
        let entry = view
            .lookup_entry(&input.previous_outpoint)
            .filter(|e| !e.is_spent())
            .ok_or(RuleError::MissingTxOut { outpoint: input.previous_outpoint })?;
        if bip16_active && is_pay_to_script_hash(entry.pk_script()) {
            cost += precise_sig_ops(&input.signature_script, entry.pk_script(), true)
                * WITNESS_SCALE_FACTOR;
        }
        if segwit_active {
            cost += witness_sig_ops(input, entry.pk_script());
        }
    }
    Ok(cost)
}
