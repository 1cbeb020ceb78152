//! Shared fixtures for the integration tests: a chain seeded with a
//! crafted genesis block and builders that produce blocks the acceptance
//! pipeline passes under `BF_NO_POW_CHECK`.

use consensus_core::block::FixedTimeSource;
use consensus_core::params::ChainParams;
use consensus_core::pow::calc_next_required_difficulty;
use consensus_core::merkle::block_merkle_root;
use consensus_core::types::{Block, BlockHeader, Hash, OutPoint, Transaction, TxIn, TxOut};
use consensus_core::{Chain, UtxoView};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn genesis_header() -> BlockHeader {
    BlockHeader {
        version: 2,
        prev_block: Hash::ZERO,
        merkle_root: Hash([0xaa; 32]),
        timestamp: 1_600_000_000,
        bits: 0x1d00ffff,
        nonce: 0,
    }
}

/// A chain on mainnet-shaped parameters whose genesis is the crafted
/// header above, plus a view positioned at that genesis.
pub fn test_chain() -> (Chain, UtxoView) {
    init_logging();
    let genesis = genesis_header();
    let mut params = ChainParams::mainnet();
    params.genesis_hash = genesis.block_hash();
    let mut chain = Chain::with_time_source(params, Box::new(FixedTimeSource(1_700_000_000)));
    chain.connect_genesis(&genesis).unwrap();
    let mut view = UtxoView::new();
    view.set_best_hash(chain.best_hash().unwrap());
    (chain, view)
}

/// Coinbase paying `value` to an anyone-can-spend output. The salt byte
/// keeps equal-valued coinbases at different heights distinct.
pub fn coinbase(value: i64, salt: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxIn {
            previous_outpoint: OutPoint::null(),
            signature_script: vec![0x51, salt as u8, (salt >> 8) as u8],
            witness: vec![],
            sequence: u32::MAX,
        }],
        outputs: vec![TxOut { value, pk_script: vec![0x51] }],
        lock_time: 0,
    }
}

/// Builds a block on the current tip: 300-second spacing, the retargeted
/// difficulty for the sha256d algorithm, and a computed merkle root.
pub fn next_block(chain: &Chain, transactions: Vec<Transaction>) -> Block {
    let tip = chain.index().node(chain.tip().unwrap());
    let bits =
        calc_next_required_difficulty(chain.index(), chain.tip(), chain.params(), 2).unwrap();
    let mut block = Block {
        header: BlockHeader {
            version: 2,
            prev_block: tip.hash,
            merkle_root: Hash::ZERO,
            timestamp: tip.timestamp + 300,
            bits,
            nonce: 0,
        },
        transactions,
    };
    block.header.merkle_root = block_merkle_root(&block);
    block
}
