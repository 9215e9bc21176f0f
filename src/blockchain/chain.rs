//! The chain context: validation and mutation of the canonical head.
//!
//! Every mutation here runs inside the block admission lane; the context
//! itself holds no chain state. The head is whatever the DAL currently
//! answers, and it is re-read after any sub-operation that could have
//! moved it.

use crate::blockcfg::Block;
use crate::blockchain::bookkeeper;
use crate::dal::{Dal, DalError};
use crate::generator::GeneratorError;
use crate::rules::{CheckMode, RulesEngine, RulesError};
use crate::settings::Settings;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("block already processed")]
    AlreadyProcessed,

    #[error("block not found")]
    BlockNotFound,

    #[error("side block is outside of the fork window")]
    OutOfForkWindow,

    #[error("block does not extend the head and forking was not allowed")]
    ForkRejected,

    #[error("invalid block: {reason}")]
    InvalidBlock { reason: String },

    #[error("cannot query {count} blocks at once")]
    RangeTooLarge { count: u64 },

    #[error("no block to revert")]
    NothingToRevert,

    #[error(transparent)]
    Dal(#[from] DalError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error("the admission task dropped the reply")]
    ReplyCanceled,

    #[error("the admission task is not running")]
    AdmissionUnreachable,
}

impl From<RulesError> for Error {
    fn from(err: RulesError) -> Self {
        match err {
            RulesError::Violation(violation) => Error::InvalidBlock {
                reason: violation.reason,
            },
            RulesError::Dal(e) => Error::Dal(e),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

/// Validates and mutates the canonical chain head.
#[derive(Clone)]
pub struct Chain {
    dal: Arc<dyn Dal>,
    rules: Arc<dyn RulesEngine>,
    settings: Arc<Settings>,
}

impl Chain {
    pub fn new(dal: Arc<dyn Dal>, rules: Arc<dyn RulesEngine>, settings: Arc<Settings>) -> Self {
        Chain {
            dal,
            rules,
            settings,
        }
    }

    pub fn dal(&self) -> &Arc<dyn Dal> {
        &self.dal
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The current head, or none before the root block is admitted.
    pub fn current(&self) -> Result<Option<Block>> {
        Ok(self.dal.current_block()?)
    }

    /// Delegates validation to the rules engine.
    pub fn check_block(&self, block: &Block, mode: CheckMode) -> Result<()> {
        self.rules
            .check_block(block, mode, &self.settings, &*self.dal)
            .map_err(Error::from)
    }

    /// Extends the canonical chain with `block`.
    ///
    /// The block must follow the current head (or be the root block of an
    /// empty chain). All derived state is updated: monetary mass, UD
    /// time, members, memberships, certifications, links and sources.
    /// Nothing is persisted when the rule check fails.
    pub fn add_block(&self, block: Block, do_check: bool) -> Result<Block> {
        let current = self.dal.current_block()?;
        match &current {
            Some(head) if block.follows(head) => {}
            None if block.number == 0 => {}
            _ => {
                return Err(Error::InvalidBlock {
                    reason: format!("block {} does not extend the head", block.description()),
                })
            }
        }

        if do_check {
            self.check_block(&block, CheckMode::WithSignaturesAndPow)?;
        }

        let block = bookkeeper::position_block(block, current.as_ref(), &self.settings);
        if block.number == 0 {
            self.save_parameters_for_root_block(&block)?;
        }
        self.dal.save_block(&block)?;
        bookkeeper::index_block(&*self.dal, &block)?;

        tracing::info!("block {} added to the blockchain", block.description());
        Ok(block)
    }

    /// Records a block on a side chain. The block does not extend the
    /// head but its predecessor is known, on the canonical chain or on
    /// another side chain.
    pub fn add_side_block(&self, block: Block, do_check: bool) -> Result<Block> {
        if do_check {
            self.check_block(&block, CheckMode::Structure)?;
        }

        let mut block = block;
        block.fork = true;
        self.dal.save_side_block(&block)?;

        tracing::info!("side block {} recorded", block.description());
        Ok(block)
    }

    /// Undoes the current head: restores every derived index, removes
    /// the block from the canonical chain and keeps it in the fork store
    /// so the branch remains switchable.
    pub fn revert_current_block(&self) -> Result<Block> {
        let head = self.dal.current_block()?.ok_or(Error::NothingToRevert)?;
        if head.number == 0 {
            return Err(Error::NothingToRevert);
        }

        self.dal.revert_block(&head)?;
        let mut removed = self.dal.remove_current_block()?;
        removed.fork = true;
        self.dal.save_side_block(&removed)?;

        tracing::info!("block {} reverted", removed.description());
        Ok(removed)
    }

    /// Persists the currency parameters carried by the root block.
    pub fn save_parameters_for_root_block(&self, root: &Block) -> Result<()> {
        let parameters = root.parameters.as_deref().ok_or_else(|| Error::InvalidBlock {
            reason: "root block carries no currency parameters".to_owned(),
        })?;
        self.dal.save_parameters(parameters)?;
        Ok(())
    }
}
