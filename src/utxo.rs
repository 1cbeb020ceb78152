//! Unspent transaction output view.
//!
//! The view is an in-memory overlay over the persistent output set and is
//! the unit of state mutation during validation. Spent entries are marked,
//! not deleted, so one pass can still detect duplicate spends and
//! duplicate-output (BIP0030) violations; the view is owned by exactly one
//! in-flight validation and must be discarded after a failed connect.

use std::collections::HashMap;

use crate::error::{Result, ValidateError};
use crate::sigop::is_unspendable;
use crate::types::{Amount, Block, ByteString, Hash, OutPoint, Transaction};

/// One unspent (or freshly spent) transaction output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoEntry {
    amount: Amount,
    pk_script: ByteString,
    block_height: u64,
    is_coinbase: bool,
    spent: bool,
}

impl UtxoEntry {
    pub fn new(amount: Amount, pk_script: ByteString, block_height: u64, is_coinbase: bool) -> UtxoEntry {
        UtxoEntry { amount, pk_script, block_height, is_coinbase, spent: false }
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn pk_script(&self) -> &[u8] {
        &self.pk_script
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    pub fn is_coinbase(&self) -> bool {
        self.is_coinbase
    }

    pub fn is_spent(&self) -> bool {
        self.spent
    }

    fn spend(&mut self) {
        self.spent = true;
    }
}

/// Journal entry recording an output at the moment it was spent, in the
/// order the block spends them. Callers use the journal to disconnect
/// blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentOutput {
    pub amount: Amount,
    pub pk_script: ByteString,
    pub height: u64,
    pub is_coinbase: bool,
}

/// Backing persistent output store.
///
/// Absence of an output is reported as `None`, never as an error, and the
/// same state must always return the same entries.
pub trait UtxoStore {
    fn fetch_utxos(&self, outpoints: &[OutPoint]) -> Vec<Option<UtxoEntry>>;
}

/// An empty backing store, useful for template validation over a view that
/// was populated by the caller.
pub struct EmptyUtxoStore;

impl UtxoStore for EmptyUtxoStore {
    fn fetch_utxos(&self, outpoints: &[OutPoint]) -> Vec<Option<UtxoEntry>> {
        vec![None; outpoints.len()]
    }
}

/// Mutable overlay over the unspent output set.
#[derive(Debug, Default)]
pub struct UtxoView {
    entries: HashMap<OutPoint, UtxoEntry>,
    best_hash: Hash,
}

impl UtxoView {
    pub fn new() -> UtxoView {
        UtxoView { entries: HashMap::new(), best_hash: Hash::ZERO }
    }

    /// The block whose state this view currently represents.
    pub fn best_hash(&self) -> &Hash {
        &self.best_hash
    }

    pub fn set_best_hash(&mut self, hash: Hash) {
        self.best_hash = hash;
    }

    pub fn lookup_entry(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Directly places an entry in the view. Used by tests and by callers
    /// that pre-populate a view from state they already hold.
    pub fn add_entry(&mut self, outpoint: OutPoint, entry: UtxoEntry) {
        self.entries.insert(outpoint, entry);
    }

    /// Loads the requested outputs from the backing store into the view,
    /// skipping any already present. Missing outputs stay absent.
    pub fn fetch_utxos(&mut self, store: &dyn UtxoStore, outpoints: &[OutPoint]) {
        let needed: Vec<OutPoint> = outpoints
            .iter()
            .filter(|o| !self.entries.contains_key(o))
            .copied()
            .collect();
        if needed.is_empty() {
            return;
        }
        for (outpoint, entry) in needed.iter().zip(store.fetch_utxos(&needed)) {
            if let Some(entry) = entry {
                self.entries.insert(*outpoint, entry);
            }
        }
    }

    /// Loads all outputs referenced by the block's inputs from the backing
    /// store. Inputs referencing outputs created earlier in the same block
    /// are skipped; they appear in the view as those transactions connect.
    pub fn fetch_input_utxos(&mut self, store: &dyn UtxoStore, block: &Block) {
        let mut in_block: HashMap<Hash, usize> = HashMap::new();
        for (i, tx) in block.transactions.iter().enumerate() {
            in_block.insert(tx.txid(), i);
        }
        let mut needed = Vec::new();
        for (i, tx) in block.transactions.iter().enumerate().skip(1) {
            for input in &tx.inputs {
                let origin = &input.previous_outpoint.txid;
                if let Some(&origin_index) = in_block.get(origin) {
                    if origin_index < i {
                        continue;
                    }
                }
                needed.push(input.previous_outpoint);
            }
        }
        self.fetch_utxos(store, &needed);
    }

    /// Spends the transaction's inputs and adds its outputs to the view,
    /// appending each spent entry to the journal when one is supplied.
    ///
    /// Input availability is a precondition here: the rule-level existence
    /// and double-spend checks run before connection, so a missing or
    /// already-spent entry at this point is an orchestration bug.
    pub fn connect_transaction(
        &mut self,
        tx: &Transaction,
        height: u64,
        is_coinbase: bool,
        stxos: &mut Option<&mut Vec<SpentOutput>>,
    ) -> Result<()> {
        if !is_coinbase {
            for input in &tx.inputs {
                let entry = self
                    .entries
                    .get_mut(&input.previous_outpoint)
                    .filter(|e| !e.is_spent())
                    .ok_or_else(|| {
                        ValidateError::Assertion(format!(
                            "view missing unspent input {} while connecting transaction",
                            input.previous_outpoint
                        ))
                    })?;
                entry.spend();
                if let Some(journal) = stxos.as_deref_mut() {
                    journal.push(SpentOutput {
                        amount: entry.amount,
                        pk_script: entry.pk_script.clone(),
                        height: entry.block_height,
                        is_coinbase: entry.is_coinbase,
                    });
                }
            }
        }
        let txid = tx.txid();
        for (i, output) in tx.outputs.iter().enumerate() {
            if is_unspendable(&output.pk_script) {
                continue;
            }
            self.entries.insert(
                OutPoint::new(txid, i as u32),
                UtxoEntry::new(output.value, output.pk_script.clone(), height, is_coinbase),
            );
        }
        Ok(())
    }
}
