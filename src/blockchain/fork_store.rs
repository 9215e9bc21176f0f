//! Thin façade over the persisted side-chain blocks.

use crate::blockcfg::{Block, BlockHash};
use crate::dal::{Dal, DalResult};
use std::sync::Arc;

#[derive(Clone)]
pub struct ForkStore {
    dal: Arc<dyn Dal>,
}

impl ForkStore {
    pub fn new(dal: Arc<dyn Dal>) -> Self {
        ForkStore { dal }
    }

    /// Canonical-chain lookup only.
    pub fn canonical_block(&self, number: u64, hash: &BlockHash) -> DalResult<Option<Block>> {
        self.dal.get_block_by_number_and_hash(number, hash)
    }

    /// Lookup across the canonical chain and the side chains.
    pub fn absolute_block(&self, number: u64, hash: &BlockHash) -> DalResult<Option<Block>> {
        self.dal.get_absolute_block_by_number_and_hash(number, hash)
    }

    /// Flags a side block after a failed switch attempt on its branch.
    pub fn mark_wrong(&self, number: u64, hash: &BlockHash) -> DalResult<()> {
        self.dal.set_side_block_wrong(number, hash)
    }
}
