//! Chain state and the block acceptance pipeline.
//!
//! [`Chain`] owns the parameters and the in-memory index and tracks a
//! single best tip. Persistent output state stays with the caller: every
//! acceptance takes a view positioned at the tip plus the backing store,
//! keeping this type free of storage concerns.

use log::{debug, info};

use crate::block::{
    check_block_context, check_block_sanity, BehaviorFlags, SystemTimeSource, TimeSource,
    BF_NO_POW_CHECK,
};
use crate::connect::{check_connect_block, ScriptVerifier};
use crate::error::{Result, RuleError, ValidateError};
use crate::index::{ChainIndex, NodeKey};
use crate::params::ChainParams;
use crate::types::{Block, BlockHeader, Hash};
use crate::utxo::{SpentOutput, UtxoStore, UtxoView};

/// A validating chain: parameters, block index, and the current best tip.
pub struct Chain {
    params: ChainParams,
    index: ChainIndex,
    tip: Option<NodeKey>,
    time_source: Box<dyn TimeSource>,
}

impl Chain {
    pub fn new(params: ChainParams) -> Chain {
        Chain::with_time_source(params, Box::new(SystemTimeSource))
    }

    pub fn with_time_source(params: ChainParams, time_source: Box<dyn TimeSource>) -> Chain {
        Chain { params, index: ChainIndex::new(), tip: None, time_source }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn index(&self) -> &ChainIndex {
        &self.index
    }

    pub fn tip(&self) -> Option<NodeKey> {
        self.tip
    }

    pub fn best_hash(&self) -> Option<Hash> {
        self.tip.map(|key| self.index.node(key).hash)
    }

    pub fn best_height(&self) -> Option<u64> {
        self.tip.map(|key| self.index.node(key).height)
    }

    /// Seeds the chain with its genesis header. The genesis block is
    /// trusted by definition; only its identity is verified.
    pub fn connect_genesis(&mut self, header: &BlockHeader) -> Result<NodeKey> {
        if self.tip.is_some() {
            return Err(ValidateError::Assertion("genesis connected twice".into()));
        }
        let hash = header.block_hash();
        if hash != self.params.genesis_hash {
            return Err(ValidateError::Assertion(format!(
                "header {} is not the configured genesis {}",
                hash, self.params.genesis_hash
            )));
        }
        let key = self.index.insert(header, None)?;
        self.tip = Some(key);
        info!("chain initialized at genesis {}", hash);
        Ok(key)
    }

    fn require_tip(&self) -> Result<NodeKey> {
        self.tip
            .ok_or_else(|| ValidateError::Assertion("chain has no genesis".into()))
    }

    /// Runs the full validation pipeline on a block extending the current
    /// tip and, on success, advances the tip: sanity, contextual checks,
    /// then connection against `view`, which must be positioned at the
    /// tip.
    pub fn accept_block(
        &mut self,
        block: &Block,
        view: &mut UtxoView,
        store: &dyn UtxoStore,
        script_verifier: &dyn ScriptVerifier,
        flags: BehaviorFlags,
        stxos: Option<&mut Vec<SpentOutput>>,
    ) -> Result<NodeKey> {
        let tip = self.require_tip()?;
        let tip_node = self.index.node(tip);
        if block.header.prev_block != tip_node.hash {
            return Err(RuleError::PrevBlockNotBest {
                got: block.header.prev_block,
                tip: tip_node.hash,
            }
            .into());
        }
        let height = tip_node.height + 1;

        check_block_sanity(block, &self.params, height, &*self.time_source, flags)?;
        check_block_context(block, Some(tip), &self.index, &self.params, flags)?;
        check_connect_block(
            block,
            height,
            tip,
            &self.index,
            &self.params,
            view,
            store,
            script_verifier,
            stxos,
        )?;

        let key = self.index.insert(&block.header, Some(tip))?;
        self.tip = Some(key);
        debug!("tip advanced to {} at height {}", block.block_hash(), height);
        Ok(key)
    }

    /// Validates a proposed block template against the current tip without
    /// extending the chain. Proof-of-work hashing is skipped since the
    /// template has not been mined; everything else runs exactly as
    /// acceptance would.
    pub fn check_connect_block_template(
        &self,
        block: &Block,
        view: &mut UtxoView,
        store: &dyn UtxoStore,
        script_verifier: &dyn ScriptVerifier,
    ) -> Result<()> {
        let flags = BF_NO_POW_CHECK;
        let tip = self.require_tip()?;
        let tip_node = self.index.node(tip);
        if block.header.prev_block != tip_node.hash {
            return Err(RuleError::PrevBlockNotBest {
                got: block.header.prev_block,
                tip: tip_node.hash,
            }
            .into());
        }
        let height = tip_node.height + 1;

        check_block_sanity(block, &self.params, height, &*self.time_source, flags)?;
        check_block_context(block, Some(tip), &self.index, &self.params, flags)?;
        check_connect_block(
            block,
            height,
            tip,
            &self.index,
            &self.params,
            view,
            store,
            script_verifier,
            None,
        )
    }
}
