//! Fork choice: deciding whether a side branch should replace the
//! current head, and performing the swap.
//!
//! A switch reverts the canonical suffix down to the branch base, then
//! applies the side chain block by block with full checks. When any
//! side block is refused, the controller rolls its own revert back,
//! marks the whole side chain as wrong and tries the next candidate.
//! Nothing of this surfaces to the submitter.

use crate::blockcfg::Block;
use crate::blockchain::branches;
use crate::blockchain::chain::{Chain, Error, Result};
use crate::blockchain::fork_store::ForkStore;
use crate::settings::Settings;
use std::sync::Arc;

/// A branch is only worth switching on when it is ahead of the current
/// head by this much wall-clock time, both in blocks and in median time.
pub const SWITCH_ON_BRANCH_AHEAD_BY_X_MINUTES: u64 = 30;

#[derive(Clone)]
pub struct ForkSwitcher {
    chain: Chain,
    fork_store: ForkStore,
    settings: Arc<Settings>,
}

impl ForkSwitcher {
    pub fn new(chain: Chain, fork_store: ForkStore, settings: Arc<Settings>) -> Self {
        ForkSwitcher {
            chain,
            fork_store,
            settings,
        }
    }

    /// Evaluates the switch policy against `prev_current` and returns
    /// whether the head moved.
    pub fn try_to_fork(&self, prev_current: &Block) -> Result<bool> {
        self.eventually_switch_on_side_chain(prev_current)?;
        let head = self.chain.current()?;
        Ok(head
            .map(|head| head.number != prev_current.number || head.hash != prev_current.hash)
            .unwrap_or(true))
    }

    fn eventually_switch_on_side_chain(&self, current: &Block) -> Result<()> {
        let min_blocks_ahead = (SWITCH_ON_BRANCH_AHEAD_BY_X_MINUTES * 60)
            / self.settings.avg_gen_time.max(1);
        let min_time_ahead = SWITCH_ON_BRANCH_AHEAD_BY_X_MINUTES * 60;

        let potentials: Vec<Block> = branches::branch_heads(&**self.chain.dal())?
            .into_iter()
            .filter(|head| head.number != current.number || head.hash != current.hash)
            .filter(|head| {
                let blocks_ahead = head.number as i64 - current.number as i64;
                let time_ahead = head.median_time as i64 - current.median_time as i64;
                blocks_ahead >= min_blocks_ahead as i64 && time_ahead >= min_time_ahead as i64
            })
            .collect();

        if !potentials.is_empty() {
            tracing::debug!(
                "{} branch(es) ahead enough to try a switch",
                potentials.len()
            );
        }

        for potential in potentials {
            let side_chain = self.whole_fork_branch(&potential)?;
            let base = match side_chain.first() {
                Some(base) if base.number > 0 => base.clone(),
                // unanchored branch, or one that would rewind below the
                // root: not a switch candidate
                _ => continue,
            };

            match self.attempt_switch(&side_chain, &base) {
                Ok(()) => {
                    tracing::info!(
                        "switched branch from {} to {}",
                        current.description(),
                        potential.description()
                    );
                    break;
                }
                Err(err) => {
                    tracing::warn!(
                        "could not switch on branch of {}: {}",
                        potential.description(),
                        err
                    );
                    self.rollback(current)?;
                    self.mark_side_chain_wrong(&side_chain)?;
                }
            }
        }
        Ok(())
    }

    fn attempt_switch(&self, side_chain: &[Block], base: &Block) -> Result<()> {
        self.revert_to_block(base.number - 1)?;
        for block in side_chain {
            let mut block = block.clone();
            block.fork = false;
            block.wrong = false;
            self.chain.add_block(block, true)?;
        }
        Ok(())
    }

    /// Puts the chain back on the branch it was on before a failed
    /// attempt.
    ///
    /// When the side branch anchored directly on the head, the attempt
    /// reverted nothing of the original chain and dropping the applied
    /// side prefix is enough. Otherwise the blocks reverted by the
    /// attempt are in the fork store by now, and the original suffix is
    /// recoverable like any branch.
    fn rollback(&self, original_head: &Block) -> Result<()> {
        if self
            .fork_store
            .canonical_block(original_head.number, &original_head.hash)?
            .is_some()
        {
            return self.revert_to_block(original_head.number);
        }
        let reverted_chain = self.whole_fork_branch(original_head)?;
        let base = reverted_chain.first().ok_or(Error::BlockNotFound)?;
        self.revert_to_block(base.number.saturating_sub(1))?;
        for block in &reverted_chain {
            let mut block = block.clone();
            block.fork = false;
            block.wrong = false;
            self.chain.add_block(block, true)?;
        }
        Ok(())
    }

    /// Walks backward from `tip` through the fork store and returns the
    /// branch in ascending order. The walk stops at the canonical
    /// anchor, which is never included; a predecessor that cannot be
    /// found also ends the walk, and such a dangling branch is returned
    /// empty.
    fn whole_fork_branch(&self, tip: &Block) -> Result<Vec<Block>> {
        let mut chain = vec![tip.clone()];
        loop {
            let last = match chain.last() {
                Some(last) => last.clone(),
                None => break,
            };
            if last.number == 0 {
                break;
            }
            let previous_hash = match &last.previous_hash {
                Some(hash) => hash.clone(),
                None => break,
            };
            match self
                .fork_store
                .absolute_block(last.number - 1, &previous_hash)?
            {
                Some(previous) if previous.fork => chain.push(previous),
                _ => break,
            }
        }
        chain.reverse();

        let anchored = match chain.first() {
            Some(first) if first.number > 0 => match &first.previous_hash {
                Some(previous_hash) => self
                    .fork_store
                    .canonical_block(first.number - 1, previous_hash)?
                    .is_some(),
                None => false,
            },
            _ => false,
        };
        if !anchored {
            return Ok(Vec::new());
        }
        Ok(chain)
    }

    fn revert_to_block(&self, number: u64) -> Result<()> {
        loop {
            let head = self.chain.current()?.ok_or(Error::NothingToRevert)?;
            if head.number <= number {
                return Ok(());
            }
            self.chain.revert_current_block()?;
        }
    }

    fn mark_side_chain_wrong(&self, side_chain: &[Block]) -> Result<()> {
        for block in side_chain {
            self.fork_store.mark_wrong(block.number, &block.hash)?;
        }
        Ok(())
    }
}
