//! The public face of the blockchain service core.
//!
//! [`BlockchainService::spawn`] wires the chain context, the admission
//! task, the prover and the storage maintainer together. Mutating
//! operations are funneled through the admission lane; queries go
//! straight to the store and may run concurrently with it.

use crate::blockcfg::{Block, CertificationDoc, IdentityDoc, PublicKey};
use crate::blockchain::{
    branch_heads, Chain, Error, ForkStore, ForkSwitcher, IdentityRequirements, Process,
    RequirementsEvaluator, MAX_BLOCKS_SPAN,
};
use crate::dal::Dal;
use crate::generator::Generator;
use crate::intercom::{unary_reply, BlockMsg};
use crate::maintenance::MemoryCleaner;
use crate::prover::{generation_loop, GenerationOutcome, Prover, ProverController};
use crate::rules::{CheckMode, RulesEngine};
use crate::settings::Settings;
use crate::stats_counter::StatsCounter;
use crate::utils::async_msg::{self, MessageBox};
use std::sync::Arc;

// Limit on the length of the admission queue
const MESSAGE_QUEUE_LEN: usize = 32;

/// Reference point below which certifications are excluded, with `-1`
/// standing for "no reference block could be determined".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CertExclusionPoint {
    pub number: i64,
}

pub struct BlockchainService {
    dal: Arc<dyn Dal>,
    generator: Arc<dyn Generator>,
    settings: Arc<Settings>,
    chain: Chain,
    block_mbox: MessageBox<BlockMsg>,
    prover_controller: Arc<ProverController>,
    requirements: RequirementsEvaluator,
    cleaner: MemoryCleaner,
    stats_counter: StatsCounter,
}

impl BlockchainService {
    /// Builds the service and spawns its background tasks on the
    /// current tokio runtime.
    pub fn spawn(
        dal: Arc<dyn Dal>,
        rules: Arc<dyn RulesEngine>,
        generator: Arc<dyn Generator>,
        settings: Settings,
    ) -> Self {
        let settings = Arc::new(settings);
        let stats_counter = StatsCounter::default();
        let chain = Chain::new(Arc::clone(&dal), Arc::clone(&rules), Arc::clone(&settings));
        let fork_store = ForkStore::new(Arc::clone(&dal));
        let switcher = ForkSwitcher::new(chain.clone(), fork_store.clone(), Arc::clone(&settings));
        let prover = Prover::new();

        let (block_mbox, block_queue) = async_msg::channel(MESSAGE_QUEUE_LEN);

        let process = Process::new(
            chain.clone(),
            fork_store,
            switcher,
            prover.clone(),
            stats_counter.clone(),
            Arc::clone(&settings),
        );
        tokio::spawn(process.run(block_queue));

        let prover_controller = Arc::new(ProverController::new(
            prover,
            chain.clone(),
            Arc::clone(&rules),
            Arc::clone(&generator),
            Arc::clone(&settings),
            block_mbox.clone(),
        ));

        let requirements = RequirementsEvaluator::new(
            Arc::clone(&dal),
            rules,
            Arc::clone(&generator),
            Arc::clone(&settings),
        );
        let cleaner = MemoryCleaner::new(Arc::clone(&dal));

        BlockchainService {
            dal,
            generator,
            settings,
            chain,
            block_mbox,
            prover_controller,
            requirements,
            cleaner,
            stats_counter,
        }
    }

    pub fn stats_counter(&self) -> &StatsCounter {
        &self.stats_counter
    }

    // ---- queries ----

    /// The current head, or none before the root block.
    pub fn current(&self) -> Result<Option<Block>, Error> {
        self.chain.current()
    }

    /// The canonical block at `number`.
    pub fn promoted(&self, number: u64) -> Result<Block, Error> {
        self.dal
            .get_promoted(number)?
            .ok_or(Error::BlockNotFound)
    }

    pub fn check_block(&self, block: &Block, mode: CheckMode) -> Result<(), Error> {
        self.chain.check_block(block, mode)
    }

    /// Candidate heads for fork choice: the tips of the longest side
    /// branches, and the current head.
    pub fn branches(&self) -> Result<Vec<Block>, Error> {
        branch_heads(&*self.dal)
    }

    /// Canonical blocks `from .. from + count`. Spans over
    /// [`MAX_BLOCKS_SPAN`] are rejected.
    pub fn blocks_between(&self, from: u64, count: u64) -> Result<Vec<Block>, Error> {
        if count > MAX_BLOCKS_SPAN {
            return Err(Error::RangeTooLarge { count });
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        Ok(self.dal.get_blocks_between(from, from + count - 1)?)
    }

    /// Valid certifications received by `target`.
    pub fn get_valid_certs(&self, target: &PublicKey) -> Result<Vec<CertificationDoc>, Error> {
        Ok(self.dal.get_valid_certs_to(target)?)
    }

    /// The block below which certifications are excluded. Store
    /// failures collapse into the `-1` sentinel.
    pub fn get_certifications_excluding_block(&self) -> CertExclusionPoint {
        let excluding = self
            .dal
            .current_block()
            .ok()
            .flatten()
            .and_then(|current| {
                self.dal
                    .get_certification_excluding_block(&current, self.settings.sig_validity)
                    .ok()
            });
        match excluding {
            Some(block) => CertExclusionPoint {
                number: block.number as i64,
            },
            None => CertExclusionPoint { number: -1 },
        }
    }

    pub fn requirements_of_identity(
        &self,
        identity: &IdentityDoc,
    ) -> Result<IdentityRequirements, Error> {
        let current = self.current()?.ok_or(Error::BlockNotFound)?;
        self.requirements.requirements_of_identity(identity, &current)
    }

    pub fn requirements_of_identities(
        &self,
        identities: &[IdentityDoc],
    ) -> Result<Vec<IdentityRequirements>, Error> {
        let current = self.current()?.ok_or(Error::BlockNotFound)?;
        identities
            .iter()
            .map(|identity| self.requirements.requirements_of_identity(identity, &current))
            .collect()
    }

    // ---- chain mutations, serialized through the admission lane ----

    /// Offers a candidate block. Either it extends the head, or
    /// (`fork_allowed`) it is recorded on a side chain and the switch
    /// policy is evaluated.
    pub async fn submit_block(
        &self,
        block: Block,
        do_check: bool,
        fork_allowed: bool,
    ) -> Result<Option<Block>, Error> {
        let (reply, reply_future) = unary_reply();
        self.block_mbox
            .clone()
            .send(BlockMsg::Submit {
                block: Box::new(block),
                do_check,
                fork_allowed,
                reply,
            })
            .await
            .map_err(|_| Error::AdmissionUnreachable)?;
        reply_future.await
    }

    /// Undoes the current head.
    pub async fn revert_current_block(&self) -> Result<Block, Error> {
        let (reply, reply_future) = unary_reply();
        self.block_mbox
            .clone()
            .send(BlockMsg::Revert { reply })
            .await
            .map_err(|_| Error::AdmissionUnreachable)?;
        reply_future.await
    }

    /// Bulk-applies a contiguous ascending main-chain segment,
    /// typically during initial synchronization.
    pub async fn save_blocks_in_main_branch(
        &self,
        blocks: Vec<Block>,
        target_last_number: u64,
    ) -> Result<(), Error> {
        let (reply, reply_future) = unary_reply();
        self.block_mbox
            .clone()
            .send(BlockMsg::SaveBunch {
                blocks,
                target_last_number,
                reply,
            })
            .await
            .map_err(|_| Error::AdmissionUnreachable)?;
        reply_future.await
    }

    pub fn save_parameters_for_root_block(&self, root: &Block) -> Result<(), Error> {
        self.chain.save_parameters_for_root_block(root)
    }

    /// Expires memberships and certifications that fell out of their
    /// validity window as of `block`.
    pub fn obsolete_in_main_branch(&self, block: &Block) -> Result<(), Error> {
        self.dal
            .expire_memberships_before(block.median_time.saturating_sub(self.settings.ms_validity))?;
        self.dal.expire_certifications_before(
            block.median_time.saturating_sub(self.settings.sig_validity),
        )?;
        Ok(())
    }

    // ---- generation ----

    /// The generator's pooled root candidate, unproved.
    pub fn generate_manual_root(&self) -> Result<Block, Error> {
        Ok(self.generator.manual_root()?)
    }

    /// The generator's pooled next candidate, unproved.
    pub fn generate_next(&self) -> Result<Block, Error> {
        Ok(self.generator.next_block()?)
    }

    /// Searches a valid nonce for `block` at the given trial level.
    /// Resolves to `None` when proving was preempted.
    pub async fn prove(&self, block: Block, trial: usize) -> Option<Block> {
        self.prover_controller.prover().prove(block, trial).await
    }

    /// One generation round; every precondition failure is a soft
    /// outcome.
    pub async fn start_generation(&self) -> Result<GenerationOutcome, Error> {
        self.prover_controller.start_generation().await
    }

    /// Proves `candidate` and submits it through the admission lane.
    pub async fn make_next_block(
        &self,
        candidate: Block,
        trial: usize,
    ) -> Result<GenerationOutcome, Error> {
        self.prover_controller.make_next_block(candidate, trial).await
    }

    /// Runs generation rounds in the background until the node stops
    /// participating.
    pub fn spawn_generation_loop(&self) {
        tokio::spawn(generation_loop(Arc::clone(&self.prover_controller)));
    }

    /// Preempts the in-flight proof so the prover re-reads the chain.
    pub fn stop_pow_then_process_and_restart_pow(&self) {
        self.prover_controller.cancel();
    }

    // ---- maintenance ----

    pub fn regular_clean_memory(&self) {
        self.cleaner.regular_clean_memory();
    }

    pub fn stop_clean_memory(&self) {
        self.cleaner.stop_clean_memory();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockcfg::{BlockHash, MembershipDoc, SourceKind};
    use crate::testing::fixture::{named_block, root_block, settings};
    use crate::testing::{MemoryDal, StubGenerator, StubRules};

    fn spawn_service(
        settings: Settings,
    ) -> (
        BlockchainService,
        Arc<MemoryDal>,
        Arc<StubRules>,
        Arc<StubGenerator>,
    ) {
        let dal = Arc::new(MemoryDal::default());
        let rules = Arc::new(StubRules::default());
        let generator = Arc::new(StubGenerator::new(Arc::clone(&dal), "issuer0"));
        let service = BlockchainService::spawn(
            Arc::clone(&dal) as Arc<dyn Dal>,
            Arc::clone(&rules) as Arc<dyn RulesEngine>,
            Arc::clone(&generator) as Arc<dyn Generator>,
            settings,
        );
        (service, dal, rules, generator)
    }

    fn seed_side_chain(dal: &MemoryDal, anchor_hash: &str, from: u64, to: u64) -> Vec<Block> {
        let mut previous = anchor_hash.to_owned();
        let mut seeded = Vec::new();
        for number in from..=to {
            let mut block = named_block(number, &format!("S{}", number), Some(&previous));
            block.fork = true;
            dal.save_side_block(&block).expect("side seed");
            previous = block.hash.as_str().to_owned();
            seeded.push(block);
        }
        seeded
    }

    #[tokio::test]
    async fn linear_extension_updates_the_head() {
        let (service, dal, rules, _) = spawn_service(settings());
        dal.save_block(&named_block(10, "H10", Some("H9")))
            .expect("seed head");

        let next = named_block(11, "H11", Some("H10"));
        let added = service
            .submit_block(next, true, false)
            .await
            .expect("submission succeeds")
            .expect("block is applied");

        assert_eq!(added.number, 11);
        let current = service.current().expect("query").expect("head exists");
        assert_eq!(current.number, 11);
        assert_eq!(current.hash, BlockHash::from("H11"));
        assert_eq!(
            rules.full_checks.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        assert_eq!(service.stats_counter().block_added_cnt(), 1);
    }

    #[tokio::test]
    async fn resubmitting_a_processed_block_is_rejected() {
        let (service, dal, _, _) = spawn_service(settings());
        dal.save_block(&named_block(10, "H10", Some("H9")))
            .expect("seed head");

        let next = named_block(11, "H11", Some("H10"));
        service
            .submit_block(next.clone(), true, false)
            .await
            .expect("first submission");
        let err = service
            .submit_block(next, true, false)
            .await
            .expect_err("duplicate is refused");
        assert!(matches!(err, Error::AlreadyProcessed));
    }

    #[tokio::test]
    async fn side_block_below_the_fork_window_is_rejected() {
        let (service, dal, _, _) = spawn_service(settings());
        dal.save_block(&named_block(500, "H500", Some("H499")))
            .expect("seed head");

        let stale = named_block(300, "S300", Some("H299"));
        let err = service
            .submit_block(stale, true, true)
            .await
            .expect_err("out of the fork window");
        assert!(matches!(err, Error::OutOfForkWindow));
    }

    #[tokio::test]
    async fn non_extending_block_without_fork_permission_is_rejected() {
        let (service, dal, _, _) = spawn_service(settings());
        dal.save_block(&named_block(10, "H10", Some("H9")))
            .expect("seed head");

        let stranger = named_block(10, "X10", Some("H9"));
        let err = service
            .submit_block(stranger, true, false)
            .await
            .expect_err("forks are not allowed here");
        assert!(matches!(err, Error::ForkRejected));
    }

    #[tokio::test]
    async fn branch_behind_the_switch_guards_is_left_alone() {
        let mut conf = settings();
        conf.avg_gen_time = 300;
        let (service, dal, _, _) = spawn_service(conf);
        dal.save_block(&named_block(100, "Ha", Some("H99")))
            .expect("seed head");
        seed_side_chain(&dal, "Ha", 101, 103);

        let tip = named_block(104, "S104", Some("S103"));
        let saved = service
            .submit_block(tip, true, true)
            .await
            .expect("side submission");
        assert!(saved.is_some());

        // 4 blocks ahead is below the 6-block guard: no switch
        let current = service.current().expect("query").expect("head exists");
        assert_eq!(current.number, 100);
        assert_eq!(current.hash, BlockHash::from("Ha"));
    }

    #[tokio::test]
    async fn branch_far_enough_ahead_triggers_a_switch() {
        let mut conf = settings();
        conf.avg_gen_time = 300;
        let (service, dal, _, _) = spawn_service(conf);
        dal.save_block(&named_block(100, "Ha", Some("H99")))
            .expect("seed head");
        seed_side_chain(&dal, "Ha", 101, 109);

        let tip = named_block(110, "S110", Some("S109"));
        let saved = service
            .submit_block(tip, true, true)
            .await
            .expect("side submission")
            .expect("the side block is recorded");
        assert!(saved.fork);

        let current = service.current().expect("query").expect("head exists");
        assert_eq!(current.number, 110);
        assert_eq!(current.hash, BlockHash::from("S110"));
        assert!(!current.fork);
        assert_eq!(service.stats_counter().switch_cnt(), 1);
    }

    #[tokio::test]
    async fn failed_switch_restores_the_head_and_marks_the_branch_wrong() {
        let mut conf = settings();
        conf.avg_gen_time = 300;
        let (service, dal, rules, _) = spawn_service(conf);
        dal.save_block(&named_block(100, "Ha", Some("H99")))
            .expect("seed head");
        seed_side_chain(&dal, "Ha", 101, 109);
        rules.reject(107, "S107");

        let tip = named_block(110, "S110", Some("S109"));
        let saved = service
            .submit_block(tip, true, true)
            .await
            .expect("no error surfaces to the submitter");
        assert!(saved.is_some());

        let current = service.current().expect("query").expect("head exists");
        assert_eq!(current.number, 100);
        assert_eq!(current.hash, BlockHash::from("Ha"));

        let wrong: Vec<u64> = dal
            .side_blocks()
            .into_iter()
            .filter(|block| block.wrong)
            .map(|block| block.number)
            .collect();
        assert_eq!(wrong, (101..=110).collect::<Vec<u64>>());

        // the branch is no longer a candidate
        let heads = service.branches().expect("branches");
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].hash, BlockHash::from("Ha"));
        assert_eq!(service.stats_counter().switch_cnt(), 0);
    }

    #[tokio::test]
    async fn dividend_blocks_emit_one_source_per_member() {
        let (service, dal, _, _) = spawn_service(settings());
        for member in ["alice", "bob", "carol"] {
            dal.add_member(member, member);
        }

        let root = root_block();
        service
            .submit_block(root.clone(), false, false)
            .await
            .expect("root applies");

        let mut ud_block = named_block(1, "H1", Some("ROOT"));
        ud_block.dividend = Some(5);
        ud_block.unit_base = 2;
        ud_block.members_count = 3;
        service
            .submit_block(ud_block, false, false)
            .await
            .expect("dividend block applies");

        let sources = dal.sources();
        assert_eq!(sources.len(), 3);
        for source in &sources {
            assert_eq!(source.kind, SourceKind::Dividend);
            assert_eq!(source.amount, 5);
            assert_eq!(source.base, 2);
            assert_eq!(source.conditions, format!("SIG({})", source.pubkey));
            assert!(!source.consumed);
        }

        let current = service.current().expect("query").expect("head exists");
        assert_eq!(current.monetary_mass, 15);
        assert_eq!(current.ud_time, Some(root.median_time + 86_400));
    }

    #[tokio::test]
    async fn revert_then_reapply_is_an_involution() {
        let (service, dal, _, _) = spawn_service(settings());
        dal.add_member("alice", "alice");

        service
            .submit_block(root_block(), false, false)
            .await
            .expect("root applies");
        let mut block = named_block(1, "H1", Some("ROOT"));
        block.dividend = Some(3);
        block.members_count = 1;
        block.joiners.push(MembershipDoc {
            issuer: "dave".into(),
            uid: "dave".into(),
            block_number: 0,
            signature: "sig".into(),
        });

        let applied = service
            .submit_block(block.clone(), false, false)
            .await
            .expect("block applies")
            .expect("applied");
        let members_before = dal.members();
        let sources_before = dal.sources();

        let reverted = service.revert_current_block().await.expect("revert");
        assert_eq!(reverted.number, 1);
        assert_eq!(
            service.current().expect("query").expect("head").number,
            0
        );
        assert!(dal.sources().is_empty());
        assert!(!dal.members().iter().any(|m| m.uid == "dave"));

        let reapplied = service
            .submit_block(block, false, false)
            .await
            .expect("reapply")
            .expect("applied again");
        assert_eq!(applied, reapplied);
        assert_eq!(dal.members(), members_before);
        assert_eq!(dal.sources(), sources_before);
    }

    #[tokio::test]
    async fn bulk_ingestion_matches_sequential_submission() {
        let root = root_block();
        let mut b1 = named_block(1, "H1", Some("ROOT"));
        b1.joiners.push(MembershipDoc {
            issuer: "dave".into(),
            uid: "dave".into(),
            block_number: 0,
            signature: "sig".into(),
        });
        let mut b2 = named_block(2, "H2", Some("H1"));
        b2.dividend = Some(7);
        b2.members_count = 1;
        let segment = vec![root, b1, b2];

        let (bulk, bulk_dal, _, _) = spawn_service(settings());
        bulk.save_blocks_in_main_branch(segment.clone(), 2)
            .await
            .expect("bulk ingestion");

        let (one_by_one, seq_dal, _, _) = spawn_service(settings());
        for block in segment {
            one_by_one
                .submit_block(block, true, false)
                .await
                .expect("sequential submission");
        }

        let bulk_head = bulk.current().expect("query").expect("head");
        let seq_head = one_by_one.current().expect("query").expect("head");
        assert_eq!(bulk_head, seq_head);
        assert_eq!(bulk_dal.members(), seq_dal.members());
        assert_eq!(bulk_dal.sources(), seq_dal.sources());
        assert_eq!(bulk_dal.parameters(), seq_dal.parameters());

        // one stats push for the whole segment, one per submitted block
        assert_eq!(bulk_dal.stats_pushed().len(), 1);
        assert_eq!(seq_dal.stats_pushed().len(), 3);
    }

    #[tokio::test]
    async fn blocks_between_is_bounded() {
        let (service, dal, _, _) = spawn_service(settings());
        let mut previous = None::<Block>;
        for number in 0..=10u64 {
            let block = match &previous {
                None => root_block(),
                Some(previous) => crate::testing::fixture::block_after(previous),
            };
            dal.save_block(&block).expect("seed");
            previous = Some(block);
        }

        let err = service
            .blocks_between(0, 5001)
            .expect_err("span above the limit");
        assert!(matches!(err, Error::RangeTooLarge { count: 5001 }));

        let middle = service.blocks_between(2, 3).expect("span");
        assert_eq!(
            middle.iter().map(|b| b.number).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        let tail = service.blocks_between(8, 5000).expect("span");
        assert_eq!(
            tail.iter().map(|b| b.number).collect::<Vec<_>>(),
            vec![8, 9, 10]
        );
        assert!(service.blocks_between(3, 0).expect("empty span").is_empty());
    }

    #[tokio::test]
    async fn promoted_reports_missing_blocks() {
        let (service, dal, _, _) = spawn_service(settings());
        dal.save_block(&root_block()).expect("seed");
        assert_eq!(service.promoted(0).expect("root").number, 0);
        assert!(matches!(
            service.promoted(7).expect_err("unknown block"),
            Error::BlockNotFound
        ));
    }

    #[tokio::test]
    async fn cert_exclusion_point_collapses_failures_into_sentinel() {
        let (service, dal, _, _) = spawn_service(settings());
        // no current block yet
        assert_eq!(service.get_certifications_excluding_block().number, -1);

        dal.save_block(&root_block()).expect("seed");
        assert_eq!(service.get_certifications_excluding_block().number, 0);

        dal.fail_cert_excluding
            .store(true, std::sync::atomic::Ordering::Relaxed);
        assert_eq!(service.get_certifications_excluding_block().number, -1);
    }

    #[tokio::test]
    async fn obsolete_in_main_branch_uses_the_validity_windows() {
        let conf = settings();
        let ms_validity = conf.ms_validity;
        let sig_validity = conf.sig_validity;
        let (service, dal, _, _) = spawn_service(conf);

        let mut head = named_block(4, "H4", Some("H3"));
        head.median_time = 100_000_000;
        service.obsolete_in_main_branch(&head).expect("obsolete");

        let (ms, certs) = dal.expirations();
        assert_eq!(ms, vec![100_000_000 - ms_validity]);
        assert_eq!(certs, vec![100_000_000 - sig_validity]);
    }

    #[tokio::test]
    async fn requirements_combine_persisted_and_provisional_certs() {
        let (service, dal, rules, generator) = spawn_service(settings());
        service
            .submit_block(root_block(), false, false)
            .await
            .expect("root applies");

        let identity = crate::blockcfg::IdentityDoc {
            pubkey: "carol".into(),
            uid: "carol".into(),
            buid: "0-ROOT".into(),
            signature: "sig".into(),
        };
        dal.add_link("alice", "carol", 500);
        dal.set_pending_join(MembershipDoc {
            issuer: "carol".into(),
            uid: "carol".into(),
            block_number: 0,
            signature: "sig".into(),
        });
        generator.script_pre_join(crate::generator::PreJoinData {
            pubkey: "carol".into(),
            uid: "carol".into(),
            buid: "0-ROOT".into(),
            was_member: false,
            current_msn: 0,
        });
        generator.script_new_certs(
            "carol",
            vec![crate::blockcfg::CertificationDoc {
                from: "bob".into(),
                to: "carol".into(),
                block_number: 0,
                signature: "sig".into(),
            }],
        );
        rules.set_over_3_hops(false);

        let requirements = service
            .requirements_of_identity(&identity)
            .expect("requirements");

        assert_eq!(requirements.pubkey, PublicKey::from("carol"));
        assert_eq!(requirements.meta_timestamp, "0-ROOT");
        assert!(!requirements.outdistanced);
        assert_eq!(requirements.certifications.len(), 2);

        let conf = settings();
        let root_time = root_block().median_time;
        let persisted = requirements
            .certifications
            .iter()
            .find(|cert| cert.from == PublicKey::from("alice"))
            .expect("persisted link");
        assert_eq!(persisted.expires_in, 500 + conf.sig_validity - root_time);
        let provisional = requirements
            .certifications
            .iter()
            .find(|cert| cert.from == PublicKey::from("bob"))
            .expect("provisional cert");
        assert_eq!(provisional.expires_in, 900 + conf.sig_validity - root_time);

        // membership anchored on the root block
        assert_eq!(requirements.membership_expires_in, conf.ms_validity);
        assert_eq!(requirements.membership_pending_expires_in, conf.ms_validity);
    }

    #[tokio::test]
    async fn valid_certs_come_from_the_store() {
        let (service, _dal, _, _) = spawn_service(settings());
        service
            .submit_block(root_block(), false, false)
            .await
            .expect("root applies");
        let mut with_cert = named_block(1, "H1", Some("ROOT"));
        with_cert.certifications.push(crate::blockcfg::CertificationDoc {
            from: "alice".into(),
            to: "bob".into(),
            block_number: 0,
            signature: "sig".into(),
        });
        service
            .submit_block(with_cert, false, false)
            .await
            .expect("cert block applies");
        let certs = service
            .get_valid_certs(&PublicKey::from("bob"))
            .expect("certs");
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].from, PublicKey::from("alice"));
    }
}
