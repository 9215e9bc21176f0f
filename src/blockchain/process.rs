//! The block admission task.
//!
//! All chain-mutating operations are serialized through a single
//! consumer draining one message queue: each request, including every
//! revert/apply sub-step of a fork switch, runs to completion before the
//! next request is looked at. Read-only queries do not travel through
//! this task.

use crate::blockcfg::Block;
use crate::blockchain::bookkeeper;
use crate::blockchain::chain::{Chain, Error, Result};
use crate::blockchain::fork_store::ForkStore;
use crate::blockchain::switch::ForkSwitcher;
use crate::intercom::BlockMsg;
use crate::prover::Prover;
use crate::settings::Settings;
use crate::stats_counter::StatsCounter;
use crate::utils::async_msg::MessageQueue;
use futures::prelude::*;
use std::sync::Arc;

pub struct Process {
    chain: Chain,
    fork_store: ForkStore,
    switcher: ForkSwitcher,
    prover: Prover,
    stats_counter: StatsCounter,
    settings: Arc<Settings>,
}

impl Process {
    pub fn new(
        chain: Chain,
        fork_store: ForkStore,
        switcher: ForkSwitcher,
        prover: Prover,
        stats_counter: StatsCounter,
        settings: Arc<Settings>,
    ) -> Self {
        Process {
            chain,
            fork_store,
            switcher,
            prover,
            stats_counter,
            settings,
        }
    }

    pub async fn run(self, mut queue: MessageQueue<BlockMsg>) {
        while let Some(input) = queue.next().await {
            self.handle_input(input);
        }
        tracing::debug!("block admission queue closed, stopping");
    }

    fn handle_input(&self, input: BlockMsg) {
        match input {
            BlockMsg::Submit {
                block,
                do_check,
                fork_allowed,
                reply,
            } => {
                reply.reply(self.submit_block(*block, do_check, fork_allowed));
            }
            BlockMsg::Revert { reply } => {
                reply.reply(self.revert_current_block());
            }
            BlockMsg::SaveBunch {
                blocks,
                target_last_number,
                reply,
            } => {
                reply.reply(bookkeeper::save_blocks_in_main_branch(
                    &**self.chain.dal(),
                    blocks,
                    target_last_number,
                    &self.settings,
                ));
            }
        }
    }

    fn submit_block(
        &self,
        mut block: Block,
        do_check: bool,
        fork_allowed: bool,
    ) -> Result<Option<Block>> {
        self.stats_counter.add_block_recv_cnt(1);
        bookkeeper::fingerprint_tx_issuers(&mut block);

        if self
            .fork_store
            .canonical_block(block.number, &block.hash)?
            .is_some()
        {
            return Err(Error::AlreadyProcessed);
        }

        let current = self.chain.current()?;
        let follows_current = match &current {
            None => true,
            Some(head) => block.follows(head),
        };

        if follows_current {
            let added = self.chain.add_block(block, do_check)?;
            self.stats_counter.add_block_added_cnt(1);
            self.chain
                .dal()
                .push_stats(&bookkeeper::compute_stats(
                    std::slice::from_ref(&added),
                    added.number,
                ))?;
            // the head moved under the prover's feet
            self.prover.cancel();
            Ok(Some(added))
        } else if fork_allowed {
            let head = match current {
                Some(head) => head,
                None => return Err(Error::ForkRejected),
            };
            let rewind_depth = head.number as i64 - block.number as i64 + 1;
            if rewind_depth >= self.settings.forksize as i64 {
                return Err(Error::OutOfForkWindow);
            }

            let saved = if self
                .fork_store
                .absolute_block(block.number, &block.hash)?
                .is_none()
            {
                let side = self.chain.add_side_block(block, do_check)?;
                self.stats_counter.add_fork_block_cnt(1);
                Some(side)
            } else {
                None
            };

            if self.switcher.try_to_fork(&head)? {
                self.stats_counter.add_switch_cnt(1);
                self.prover.cancel();
            }
            Ok(saved)
        } else {
            Err(Error::ForkRejected)
        }
    }

    fn revert_current_block(&self) -> Result<Block> {
        let reverted = self.chain.revert_current_block()?;
        self.prover.cancel();
        Ok(reverted)
    }
}

