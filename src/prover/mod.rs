//! Proof-of-work orchestration.
//!
//! The [`Prover`] owns the cancellation state shared between the block
//! admission task and the proving worker: a token preempting the nonce
//! search, and a notification for the generation loop to re-check its
//! preconditions. [`ProverController::start_generation`] runs one
//! generation round; all its preconditions are soft and come back as
//! [`GenerationOutcome`] reasons rather than errors.

mod pow;

use crate::blockcfg::Block;
use crate::blockchain::{Chain, Error};
use crate::generator::Generator;
use crate::intercom::{unary_reply, BlockMsg};
use crate::rules::RulesEngine;
use crate::settings::Settings;
use crate::utils::async_msg::MessageBox;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a generation round ended without a block, or the block it got in.
#[derive(Debug)]
pub enum GenerationOutcome {
    /// The proved block went through the admission lane.
    Submitted(Block),
    NotParticipating,
    NoSelfPubkey,
    WaitingForRoot,
    NotMember,
    DifficultyTooHigh,
    PowCanceled,
    /// The proved block was refused; the next candidate will be empty.
    Rejected { reason: String },
}

/// Shared proof-of-work state, cloneable across tasks.
#[derive(Clone)]
pub struct Prover {
    inner: Arc<ProverInner>,
}

struct ProverInner {
    computing: AtomicBool,
    token: Mutex<CancellationToken>,
    continue_notify: tokio::sync::Notify,
}

impl Default for Prover {
    fn default() -> Self {
        Self::new()
    }
}

impl Prover {
    pub fn new() -> Self {
        Prover {
            inner: Arc::new(ProverInner {
                computing: AtomicBool::new(false),
                token: Mutex::new(CancellationToken::new()),
                continue_notify: tokio::sync::Notify::new(),
            }),
        }
    }

    pub fn is_computing(&self) -> bool {
        self.inner.computing.load(Ordering::Acquire)
    }

    /// Preempts the in-flight proof, if any, and wakes every task
    /// blocked on [`Prover::wait_for_continue`]. A fresh token is armed
    /// for the next proof.
    pub fn cancel(&self) {
        let stale = {
            let mut guard = self
                .inner
                .token
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        stale.cancel();
        self.inner.continue_notify.notify_waiters();
    }

    fn current_token(&self) -> CancellationToken {
        self.inner
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs the nonce search on a blocking worker. Resolves to `None`
    /// when the proof was preempted.
    pub async fn prove(&self, block: Block, trial: usize) -> Option<Block> {
        let token = self.current_token();
        self.inner.computing.store(true, Ordering::Release);
        let result = tokio::task::spawn_blocking(move || pow::prove_block(block, trial, &token))
            .await;
        self.inner.computing.store(false, Ordering::Release);
        match result {
            Ok(proved) => proved,
            Err(err) => {
                tracing::error!("proof-of-work worker failed: {}", err);
                None
            }
        }
    }

    /// Cancellable sleep used to self-throttle after an own block.
    /// Returns `false` when the wait was preempted.
    pub async fn wait_before_pow(&self, delay: Duration) -> bool {
        let token = self.current_token();
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = token.cancelled() => false,
        }
    }

    /// Parks the generation loop until the chain moves.
    pub async fn wait_for_continue(&self) {
        self.inner.continue_notify.notified().await;
    }
}

/// Drives block generation: assembles a candidate, proves it and feeds
/// it back through the admission lane.
pub struct ProverController {
    prover: Prover,
    chain: Chain,
    rules: Arc<dyn RulesEngine>,
    generator: Arc<dyn Generator>,
    settings: Arc<Settings>,
    block_mbox: MessageBox<BlockMsg>,
    last_generation_wrong: AtomicBool,
}

impl ProverController {
    pub fn new(
        prover: Prover,
        chain: Chain,
        rules: Arc<dyn RulesEngine>,
        generator: Arc<dyn Generator>,
        settings: Arc<Settings>,
        block_mbox: MessageBox<BlockMsg>,
    ) -> Self {
        ProverController {
            prover,
            chain,
            rules,
            generator,
            settings,
            block_mbox,
            last_generation_wrong: AtomicBool::new(false),
        }
    }

    pub fn prover(&self) -> &Prover {
        &self.prover
    }

    pub fn cancel(&self) {
        self.prover.cancel();
    }

    /// One generation round.
    pub async fn start_generation(&self) -> Result<GenerationOutcome, Error> {
        if !self.settings.participate {
            return Ok(GenerationOutcome::NotParticipating);
        }
        let self_pubkey = match &self.settings.self_pubkey {
            Some(pubkey) => pubkey.clone(),
            None => return Ok(GenerationOutcome::NoSelfPubkey),
        };
        let current = match self.chain.current()? {
            Some(current) => current,
            None => return Ok(GenerationOutcome::WaitingForRoot),
        };
        if !self.chain.dal().is_member(&self_pubkey)? {
            return Ok(GenerationOutcome::NotMember);
        }

        if current.issuer == self_pubkey && self.settings.pow_delay > 0 {
            tracing::debug!(
                "own block on top, waiting {}s before proving again",
                self.settings.pow_delay
            );
            if !self
                .prover
                .wait_before_pow(Duration::from_secs(self.settings.pow_delay))
                .await
            {
                return Ok(GenerationOutcome::PowCanceled);
            }
        }

        let trial = self
            .rules
            .trial_level(&self_pubkey, &self.settings, &**self.chain.dal())?;
        // the head may have moved while we were throttling
        let current = match self.chain.current()? {
            Some(current) => current,
            None => return Ok(GenerationOutcome::WaitingForRoot),
        };
        if trial > current.pow_min + 2 {
            tracing::debug!(
                "required trial {} is too far above powMin {}",
                trial,
                current.pow_min
            );
            return Ok(GenerationOutcome::DifficultyTooHigh);
        }

        let candidate = if self.last_generation_wrong.load(Ordering::Acquire) {
            self.generator.next_empty_block()?
        } else {
            self.generator.next_block()?
        };
        self.make_next_block(candidate, trial).await
    }

    /// Proves `candidate` at the given trial level and submits the
    /// result through the admission lane.
    pub async fn make_next_block(
        &self,
        candidate: Block,
        trial: usize,
    ) -> Result<GenerationOutcome, Error> {
        tracing::info!(
            "proving block #{} at trial level {}",
            candidate.number,
            trial
        );
        let proved = match self.prover.prove(candidate, trial).await {
            Some(proved) => proved,
            None => {
                tracing::info!("pow canceled");
                return Ok(GenerationOutcome::PowCanceled);
            }
        };

        let (reply, reply_future) = unary_reply();
        let mut mbox = self.block_mbox.clone();
        mbox.send(BlockMsg::Submit {
            block: Box::new(proved.clone()),
            do_check: true,
            fork_allowed: true,
            reply,
        })
        .await
        .map_err(|_| Error::AdmissionUnreachable)?;

        match reply_future.await {
            Ok(Some(block)) => {
                self.last_generation_wrong.store(false, Ordering::Release);
                Ok(GenerationOutcome::Submitted(block))
            }
            Ok(None) => {
                self.last_generation_wrong.store(true, Ordering::Release);
                Ok(GenerationOutcome::Rejected {
                    reason: "generated block landed on a side chain".to_owned(),
                })
            }
            Err(err) => {
                tracing::warn!("generated block was refused: {}", err);
                self.last_generation_wrong.store(true, Ordering::Release);
                Ok(GenerationOutcome::Rejected {
                    reason: err.to_string(),
                })
            }
        }
    }
}

/// Runs generation rounds until the node stops participating. Soft
/// outcomes park the loop until the chain moves.
pub async fn generation_loop(controller: Arc<ProverController>) {
    loop {
        match controller.start_generation().await {
            Ok(GenerationOutcome::Submitted(block)) => {
                tracing::info!("generated block {}", block.description());
            }
            Ok(GenerationOutcome::NotParticipating) | Ok(GenerationOutcome::NoSelfPubkey) => {
                tracing::info!("node is not set up to generate blocks, stopping generation");
                return;
            }
            Ok(GenerationOutcome::PowCanceled) | Ok(GenerationOutcome::Rejected { .. }) => {
                // re-check the preconditions right away
            }
            Ok(GenerationOutcome::WaitingForRoot)
            | Ok(GenerationOutcome::NotMember)
            | Ok(GenerationOutcome::DifficultyTooHigh) => {
                controller.prover().wait_for_continue().await;
            }
            Err(err) => {
                tracing::error!("block generation failed: {}", err);
                controller.prover().wait_for_continue().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{ForkStore, ForkSwitcher, Process};
    use crate::dal::Dal;
    use crate::stats_counter::StatsCounter;
    use crate::testing::fixture::{root_block, settings};
    use crate::testing::{MemoryDal, StubGenerator, StubRules};
    use crate::utils::async_msg;

    fn controller_with(
        conf: crate::settings::Settings,
    ) -> (Arc<ProverController>, Arc<MemoryDal>, Arc<StubRules>) {
        let settings = Arc::new(conf);
        let dal = Arc::new(MemoryDal::default());
        let rules = Arc::new(StubRules::default());
        let generator = Arc::new(StubGenerator::new(Arc::clone(&dal), "issuer0"));

        let chain = Chain::new(
            Arc::clone(&dal) as Arc<dyn Dal>,
            Arc::clone(&rules) as Arc<dyn crate::rules::RulesEngine>,
            Arc::clone(&settings),
        );
        let fork_store = ForkStore::new(Arc::clone(&dal) as Arc<dyn Dal>);
        let switcher = ForkSwitcher::new(chain.clone(), fork_store.clone(), Arc::clone(&settings));
        let prover = Prover::new();
        let (mbox, queue) = async_msg::channel(32);
        let process = Process::new(
            chain.clone(),
            fork_store,
            switcher,
            prover.clone(),
            StatsCounter::default(),
            Arc::clone(&settings),
        );
        tokio::spawn(process.run(queue));

        let controller = Arc::new(ProverController::new(
            prover,
            chain,
            rules.clone() as Arc<dyn crate::rules::RulesEngine>,
            generator as Arc<dyn Generator>,
            settings,
            mbox,
        ));
        (controller, dal, rules)
    }

    fn participating_settings() -> crate::settings::Settings {
        let mut conf = settings();
        conf.participate = true;
        conf.self_pubkey = Some("issuer0".into());
        conf
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_preempts_an_inflight_proof() {
        let prover = Prover::new();
        let proving = tokio::spawn({
            let prover = prover.clone();
            // 65 leading zeroes never happen in a 64-digit fingerprint
            async move { prover.prove(root_block(), 65).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(prover.is_computing());
        prover.cancel();
        let outcome = proving.await.expect("worker joins");
        assert!(outcome.is_none());
        assert!(!prover.is_computing());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn wait_before_pow_is_cancellable() {
        let prover = Prover::new();
        let waiting = tokio::spawn({
            let prover = prover.clone();
            async move { prover.wait_before_pow(Duration::from_secs(60)).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        prover.cancel();
        assert!(!waiting.await.expect("waiter joins"));
    }

    #[tokio::test]
    async fn generation_requires_participation() {
        let (controller, _, _) = controller_with(settings());
        let outcome = controller.start_generation().await.expect("round");
        assert!(matches!(outcome, GenerationOutcome::NotParticipating));
    }

    #[tokio::test]
    async fn generation_requires_a_self_pubkey() {
        let mut conf = settings();
        conf.participate = true;
        let (controller, _, _) = controller_with(conf);
        let outcome = controller.start_generation().await.expect("round");
        assert!(matches!(outcome, GenerationOutcome::NoSelfPubkey));
    }

    #[tokio::test]
    async fn generation_waits_for_the_root_block() {
        let (controller, _, _) = controller_with(participating_settings());
        let outcome = controller.start_generation().await.expect("round");
        assert!(matches!(outcome, GenerationOutcome::WaitingForRoot));
    }

    #[tokio::test]
    async fn generation_requires_membership() {
        let (controller, dal, _) = controller_with(participating_settings());
        dal.save_block(&root_block()).expect("seed root");
        let outcome = controller.start_generation().await.expect("round");
        assert!(matches!(outcome, GenerationOutcome::NotMember));
    }

    #[tokio::test]
    async fn generation_skips_when_the_trial_is_too_high() {
        let (controller, dal, rules) = controller_with(participating_settings());
        dal.save_block(&root_block()).expect("seed root");
        dal.add_member("issuer0", "issuer0");
        rules.set_trial(3); // powMin is 0, so anything above 2 is too much
        let outcome = controller.start_generation().await.expect("round");
        assert!(matches!(outcome, GenerationOutcome::DifficultyTooHigh));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn generation_proves_and_extends_the_chain() {
        let (controller, dal, rules) = controller_with(participating_settings());
        dal.save_block(&root_block()).expect("seed root");
        dal.add_member("issuer0", "issuer0");
        rules.set_trial(1);

        let outcome = controller.start_generation().await.expect("round");
        let block = match outcome {
            GenerationOutcome::Submitted(block) => block,
            other => panic!("expected a submitted block, got {:?}", other),
        };
        assert_eq!(block.number, 1);
        assert!(block.hash.leading_zeros() >= 1);

        let head = dal.current_block().expect("query").expect("head");
        assert_eq!(head.number, 1);
        assert_eq!(head.hash, block.hash);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_generation_switches_to_an_empty_candidate() {
        let (controller, dal, rules) = controller_with(participating_settings());
        dal.save_block(&root_block()).expect("seed root");
        dal.add_member("issuer0", "issuer0");
        rules.set_trial(0);
        rules.reject_everything();

        let outcome = controller.start_generation().await.expect("round");
        assert!(matches!(outcome, GenerationOutcome::Rejected { .. }));
        assert!(controller
            .last_generation_wrong
            .load(Ordering::Acquire));
    }
}
