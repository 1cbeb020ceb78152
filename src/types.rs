//! Core chain types for consensus validation.
//!
//! All hashes are stored in internal (non-reversed) byte order; the textual
//! form reverses the bytes, matching the convention used by block explorers.

use std::fmt;
use std::str::FromStr;

use bitcoin_hashes::{sha256d, Hash as _};
use serde::{Deserialize, Serialize};

/// Amount type: the smallest indivisible unit of the currency.
pub type Amount = i64;

/// Byte string type for scripts and witness items.
pub type ByteString = Vec<u8>;

/// 256-bit content identifier.
///
/// Equality is exact byte match. The all-zero value denotes "no previous
/// output" in coinbase inputs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Double-SHA256 of arbitrary bytes, in internal byte order.
    pub fn double_sha256(data: &[u8]) -> Hash {
        Hash(sha256d::Hash::hash(data).into_inner())
    }
}

impl fmt::Display for Hash {
    /// Hexadecimal string of the byte-reversed hash.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter().rev() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl FromStr for Hash {
    type Err = String;

    /// Parses the byte-reversed hexadecimal form produced by `Display`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(format!("hash string must be 64 characters, got {}", s.len()));
        }
        let mut bytes = [0u8; 32];
        for i in 0..32 {
            let byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|e| format!("invalid hex in hash string: {}", e))?;
            bytes[31 - i] = byte;
        }
        Ok(Hash(bytes))
    }
}

/// Reference to a transaction output: (transaction identifier, output index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, index: u32) -> OutPoint {
        OutPoint { txid, index }
    }

    /// The null outpoint used by coinbase inputs: zero hash, max index.
    pub fn null() -> OutPoint {
        OutPoint { txid: Hash::ZERO, index: u32::MAX }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.txid.is_zero()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// Transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub previous_outpoint: OutPoint,
    pub signature_script: ByteString,
    /// Segregated witness stack; empty when the input carries no witness.
    pub witness: Vec<ByteString>,
    pub sequence: u32,
}

/// Transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: Amount,
    pub pk_script: ByteString,
}

/// Transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Whether any input carries witness data.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Transaction identifier: double-SHA256 of the serialization without
    /// witness data.
    pub fn txid(&self) -> Hash {
        Hash::double_sha256(&self.serialize(false))
    }

    /// Witness transaction identifier: double-SHA256 of the full
    /// serialization. Equal to `txid` when no witness data is present.
    pub fn wtxid(&self) -> Hash {
        if !self.has_witness() {
            return self.txid();
        }
        Hash::double_sha256(&self.serialize(true))
    }

    /// Serialized size excluding witness data.
    pub fn serialized_size_stripped(&self) -> usize {
        self.serialize(false).len()
    }

    /// Serialized size including witness data.
    pub fn serialized_size(&self) -> usize {
        self.serialize(self.has_witness()).len()
    }

    pub fn serialize(&self, include_witness: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + 64 * self.inputs.len());
        buf.extend_from_slice(&self.version.to_le_bytes());
        if include_witness {
            // BIP141 marker and flag.
            buf.push(0x00);
            buf.push(0x01);
        }
        write_var_int(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(input.previous_outpoint.txid.as_bytes());
            buf.extend_from_slice(&input.previous_outpoint.index.to_le_bytes());
            write_var_bytes(&mut buf, &input.signature_script);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_var_int(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.to_le_bytes());
            write_var_bytes(&mut buf, &output.pk_script);
        }
        if include_witness {
            for input in &self.inputs {
                write_var_int(&mut buf, input.witness.len() as u64);
                for item in &input.witness {
                    write_var_bytes(&mut buf, item);
                }
            }
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }
}

/// Block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash,
    pub merkle_root: Hash,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// 80-byte wire encoding.
    pub fn serialize(&self) -> [u8; 80] {
        let mut buf = [0u8; 80];
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..36].copy_from_slice(self.prev_block.as_bytes());
        buf[36..68].copy_from_slice(self.merkle_root.as_bytes());
        // The wire field is 32 bits; sanity checking rejects timestamps
        // that do not fit before any header reaches consensus logic.
        buf[68..72].copy_from_slice(&(self.timestamp as u32).to_le_bytes());
        buf[72..76].copy_from_slice(&self.bits.to_le_bytes());
        buf[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Block identity hash: double-SHA256 of the 80-byte header.
    pub fn block_hash(&self) -> Hash {
        Hash::double_sha256(&self.serialize())
    }
}

/// Block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn block_hash(&self) -> Hash {
        self.header.block_hash()
    }

    /// Serialized size excluding all witness data.
    pub fn serialized_size_stripped(&self) -> usize {
        let mut size = 80 + var_int_size(self.transactions.len() as u64);
        for tx in &self.transactions {
            size += tx.serialized_size_stripped();
        }
        size
    }

    /// Serialized size including witness data.
    pub fn serialized_size(&self) -> usize {
        let mut size = 80 + var_int_size(self.transactions.len() as u64);
        for tx in &self.transactions {
            size += tx.serialized_size();
        }
        size
    }
}

pub(crate) fn write_var_int(buf: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        buf.push(value as u8);
    } else if value <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

pub(crate) fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_var_int(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

pub(crate) fn var_int_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
