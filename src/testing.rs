//! In-memory collaborators for tests: a [`MemoryDal`] store, a
//! scriptable [`StubRules`] engine and a [`StubGenerator`].

use crate::blockcfg::{
    Block, BlockHash, CertificationDoc, IdentityDoc, Link, Member, MembershipDoc, PublicKey,
    Source, SourceKind,
};
use crate::dal::{BlockResolver, Dal, DalError, DalResult, StatsUpdate, UdEntry};
use crate::generator::{Generator, GeneratorError, PreJoinData};
use crate::rules::{CheckMode, RuleViolation, RulesEngine, RulesError};
use crate::settings::Settings;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct StoredCert {
    cert: CertificationDoc,
    written_block: u64,
    timestamp: u64,
    expired: bool,
}

#[derive(Debug, Clone)]
struct StoredLink {
    written_block: u64,
    link: Link,
}

#[derive(Debug, Default)]
struct DalState {
    canonical: BTreeMap<u64, Block>,
    side: BTreeMap<(u64, String), Block>,
    members: BTreeMap<String, Member>,
    pending_joins: BTreeMap<String, MembershipDoc>,
    certifications: Vec<StoredCert>,
    links: Vec<StoredLink>,
    sources: Vec<Source>,
    parameters: Option<String>,
    stats: Vec<StatsUpdate>,
    expired_ms_before: Vec<u64>,
    expired_certs_before: Vec<u64>,
    migrations: usize,
}

/// In-memory store with just enough index semantics for the service
/// core tests.
#[derive(Debug, Default)]
pub struct MemoryDal {
    state: RwLock<DalState>,
    pub fail_cert_excluding: AtomicBool,
    pub fail_migrations: AtomicBool,
}

impl MemoryDal {
    fn read(&self) -> RwLockReadGuard<'_, DalState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DalState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_member(&self, pubkey: &str, uid: &str) {
        self.write().members.insert(
            pubkey.to_owned(),
            Member {
                pubkey: pubkey.into(),
                uid: uid.to_owned(),
            },
        );
    }

    pub fn add_link(&self, source: &str, target: &str, timestamp: u64) {
        self.write().links.push(StoredLink {
            written_block: 0,
            link: Link {
                source: source.into(),
                target: target.into(),
                timestamp,
                obsolete: false,
            },
        });
    }

    pub fn set_pending_join(&self, doc: MembershipDoc) {
        self.write()
            .pending_joins
            .insert(doc.issuer.as_str().to_owned(), doc);
    }

    pub fn sources(&self) -> Vec<Source> {
        self.read().sources.clone()
    }

    pub fn side_blocks(&self) -> Vec<Block> {
        self.read().side.values().cloned().collect()
    }

    pub fn members(&self) -> Vec<Member> {
        self.read().members.values().cloned().collect()
    }

    pub fn parameters(&self) -> Option<String> {
        self.read().parameters.clone()
    }

    pub fn stats_pushed(&self) -> Vec<StatsUpdate> {
        self.read().stats.clone()
    }

    pub fn migrations(&self) -> usize {
        self.read().migrations
    }

    pub fn expirations(&self) -> (Vec<u64>, Vec<u64>) {
        let state = self.read();
        (
            state.expired_ms_before.clone(),
            state.expired_certs_before.clone(),
        )
    }
}

impl Dal for MemoryDal {
    fn current_block(&self) -> DalResult<Option<Block>> {
        Ok(self.read().canonical.values().next_back().cloned())
    }

    fn get_block(&self, number: u64) -> DalResult<Block> {
        self.read()
            .canonical
            .get(&number)
            .cloned()
            .ok_or(DalError::BlockNotFound)
    }

    fn get_block_or_null(&self, number: u64) -> DalResult<Option<Block>> {
        Ok(self.read().canonical.get(&number).cloned())
    }

    fn get_promoted(&self, number: u64) -> DalResult<Option<Block>> {
        self.get_block_or_null(number)
    }

    fn get_block_by_number_and_hash(
        &self,
        number: u64,
        hash: &BlockHash,
    ) -> DalResult<Option<Block>> {
        Ok(self
            .read()
            .canonical
            .get(&number)
            .filter(|block| block.hash == *hash)
            .cloned())
    }

    fn get_absolute_block_by_number_and_hash(
        &self,
        number: u64,
        hash: &BlockHash,
    ) -> DalResult<Option<Block>> {
        if let Some(block) = self.get_block_by_number_and_hash(number, hash)? {
            return Ok(Some(block));
        }
        Ok(self
            .read()
            .side
            .get(&(number, hash.as_str().to_owned()))
            .cloned())
    }

    fn get_blocks_between(&self, from: u64, to: u64) -> DalResult<Vec<Block>> {
        Ok(self
            .read()
            .canonical
            .range(from..=to)
            .map(|(_, block)| block.clone())
            .collect())
    }

    fn get_fork_blocks(&self) -> DalResult<Vec<Block>> {
        Ok(self
            .read()
            .side
            .values()
            .filter(|block| !block.wrong)
            .cloned()
            .collect())
    }

    fn save_side_block(&self, block: &Block) -> DalResult<()> {
        self.write()
            .side
            .insert((block.number, block.hash.as_str().to_owned()), block.clone());
        Ok(())
    }

    fn set_side_block_wrong(&self, number: u64, hash: &BlockHash) -> DalResult<()> {
        if let Some(block) = self
            .write()
            .side
            .get_mut(&(number, hash.as_str().to_owned()))
        {
            block.wrong = true;
        }
        Ok(())
    }

    fn save_block(&self, block: &Block) -> DalResult<()> {
        self.write().canonical.insert(block.number, block.clone());
        Ok(())
    }

    fn remove_current_block(&self) -> DalResult<Block> {
        let mut state = self.write();
        let number = *state
            .canonical
            .keys()
            .next_back()
            .ok_or(DalError::BlockNotFound)?;
        state
            .canonical
            .remove(&number)
            .ok_or(DalError::BlockNotFound)
    }

    fn save_bunch(&self, blocks: &[Block]) -> DalResult<()> {
        let mut state = self.write();
        for block in blocks {
            state.canonical.insert(block.number, block.clone());
        }
        Ok(())
    }

    fn save_parameters(&self, parameters: &str) -> DalResult<()> {
        self.write().parameters = Some(parameters.to_owned());
        Ok(())
    }

    fn update_members_for_blocks(&self, blocks: &[Block]) -> DalResult<()> {
        let mut state = self.write();
        for block in blocks {
            for joiner in &block.joiners {
                state.members.insert(
                    joiner.issuer.as_str().to_owned(),
                    Member {
                        pubkey: joiner.issuer.clone(),
                        uid: joiner.uid.clone(),
                    },
                );
            }
            for excluded in &block.excluded {
                state.members.remove(excluded.as_str());
            }
        }
        Ok(())
    }

    fn update_memberships_for_blocks(&self, blocks: &[Block]) -> DalResult<()> {
        let mut state = self.write();
        for block in blocks {
            for doc in block.joiners.iter().chain(&block.actives) {
                state.pending_joins.remove(doc.issuer.as_str());
            }
        }
        Ok(())
    }

    fn update_certifications_for_blocks(&self, blocks: &[Block]) -> DalResult<()> {
        let mut state = self.write();
        for block in blocks {
            for cert in &block.certifications {
                state.certifications.push(StoredCert {
                    cert: cert.clone(),
                    written_block: block.number,
                    timestamp: block.median_time,
                    expired: false,
                });
            }
        }
        Ok(())
    }

    fn update_links_for_blocks(
        &self,
        blocks: &[Block],
        resolver: &dyn BlockResolver,
    ) -> DalResult<()> {
        // resolve the referenced block outside of the state lock
        let mut new_links = Vec::new();
        for block in blocks {
            for cert in &block.certifications {
                let timestamp = resolver
                    .block(cert.block_number)?
                    .map(|referenced| referenced.median_time)
                    .unwrap_or(block.median_time);
                new_links.push(StoredLink {
                    written_block: block.number,
                    link: Link {
                        source: cert.from.clone(),
                        target: cert.to.clone(),
                        timestamp,
                        obsolete: false,
                    },
                });
            }
        }
        self.write().links.append(&mut new_links);
        Ok(())
    }

    fn update_transactions_for_blocks(&self, blocks: &[Block]) -> DalResult<()> {
        let mut state = self.write();
        for block in blocks {
            for tx in &block.transactions {
                for input in &tx.inputs {
                    for source in state.sources.iter_mut() {
                        if source.identifier == input.identifier
                            && source.kind == input.kind
                            && Some(&source.pubkey) == input.issuer.as_ref()
                        {
                            source.consumed = true;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn update_transaction_sources_for_blocks(
        &self,
        _blocks: &[Block],
        dividends: &[UdEntry],
    ) -> DalResult<()> {
        let mut state = self.write();
        for entry in dividends {
            let members: Vec<Member> = state.members.values().cloned().collect();
            for member in members {
                state.sources.push(Source {
                    kind: SourceKind::Dividend,
                    pubkey: member.pubkey.clone(),
                    identifier: format!("UD:{}:{}", entry.block_number, member.pubkey),
                    block_number: entry.block_number,
                    amount: entry.dividend,
                    base: entry.unit_base,
                    conditions: format!("SIG({})", member.pubkey),
                    consumed: false,
                });
            }
        }
        Ok(())
    }

    fn revert_block(&self, block: &Block) -> DalResult<()> {
        let mut state = self.write();
        let number = block.number;
        state.sources.retain(|source| {
            !(source.block_number == number && source.kind == SourceKind::Dividend)
        });
        for tx in &block.transactions {
            for input in &tx.inputs {
                for source in state.sources.iter_mut() {
                    if source.identifier == input.identifier && source.kind == input.kind {
                        source.consumed = false;
                    }
                }
            }
        }
        state.links.retain(|link| link.written_block != number);
        state.certifications.retain(|cert| cert.written_block != number);
        for joiner in &block.joiners {
            state.members.remove(joiner.issuer.as_str());
        }
        for excluded in &block.excluded {
            state.members.insert(
                excluded.as_str().to_owned(),
                Member {
                    pubkey: excluded.clone(),
                    uid: excluded.as_str().to_owned(),
                },
            );
        }
        Ok(())
    }

    fn expire_memberships_before(&self, median_time: u64) -> DalResult<()> {
        self.write().expired_ms_before.push(median_time);
        Ok(())
    }

    fn expire_certifications_before(&self, median_time: u64) -> DalResult<()> {
        let mut state = self.write();
        state.expired_certs_before.push(median_time);
        for cert in state.certifications.iter_mut() {
            if cert.timestamp < median_time {
                cert.expired = true;
            }
        }
        Ok(())
    }

    fn get_members(&self) -> DalResult<Vec<Member>> {
        Ok(self.read().members.values().cloned().collect())
    }

    fn is_member(&self, pubkey: &PublicKey) -> DalResult<bool> {
        Ok(self.read().members.contains_key(pubkey.as_str()))
    }

    fn get_valid_links_to(&self, target: &PublicKey) -> DalResult<Vec<Link>> {
        Ok(self
            .read()
            .links
            .iter()
            .filter(|stored| !stored.link.obsolete && stored.link.target == *target)
            .map(|stored| stored.link.clone())
            .collect())
    }

    fn last_join_of_identity(&self, pubkey: &PublicKey) -> DalResult<Option<MembershipDoc>> {
        Ok(self.read().pending_joins.get(pubkey.as_str()).cloned())
    }

    fn get_valid_certs_to(&self, target: &PublicKey) -> DalResult<Vec<CertificationDoc>> {
        Ok(self
            .read()
            .certifications
            .iter()
            .filter(|stored| !stored.expired && stored.cert.to == *target)
            .map(|stored| stored.cert.clone())
            .collect())
    }

    fn get_certification_excluding_block(
        &self,
        current: &Block,
        cert_validity: u64,
    ) -> DalResult<Block> {
        if self.fail_cert_excluding.load(Ordering::Relaxed) {
            return Err(DalError::Backend("scripted failure".to_owned()));
        }
        let floor = current.median_time.saturating_sub(cert_validity);
        self.read()
            .canonical
            .values()
            .find(|block| block.median_time >= floor)
            .cloned()
            .ok_or(DalError::BlockNotFound)
    }

    fn push_stats(&self, update: &StatsUpdate) -> DalResult<()> {
        self.write().stats.push(update.clone());
        Ok(())
    }

    fn migrate_old_blocks(&self) -> DalResult<()> {
        self.write().migrations += 1;
        if self.fail_migrations.load(Ordering::Relaxed) {
            return Err(DalError::Backend("scripted migration failure".to_owned()));
        }
        Ok(())
    }
}

/// Rules engine whose verdicts are scripted per block.
#[derive(Debug, Default)]
pub struct StubRules {
    rejected: RwLock<HashSet<(u64, String)>>,
    reject_all: AtomicBool,
    trial: AtomicUsize,
    over_3_hops: AtomicBool,
    pub full_checks: AtomicUsize,
}

impl StubRules {
    pub fn reject(&self, number: u64, hash: &str) {
        self.rejected
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((number, hash.to_owned()));
    }

    pub fn reject_everything(&self) {
        self.reject_all.store(true, Ordering::Relaxed);
    }

    pub fn set_trial(&self, trial: usize) {
        self.trial.store(trial, Ordering::Relaxed);
    }

    pub fn set_over_3_hops(&self, outdistanced: bool) {
        self.over_3_hops.store(outdistanced, Ordering::Relaxed);
    }
}

impl RulesEngine for StubRules {
    fn check_block(
        &self,
        block: &Block,
        mode: CheckMode,
        _settings: &Settings,
        _dal: &dyn Dal,
    ) -> Result<(), RulesError> {
        if mode == CheckMode::WithSignaturesAndPow {
            self.full_checks.fetch_add(1, Ordering::Relaxed);
        }
        let rejected = self.reject_all.load(Ordering::Relaxed)
            || self
                .rejected
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&(block.number, block.hash.as_str().to_owned()));
        if rejected {
            return Err(RuleViolation::new("scripted rejection").into());
        }
        Ok(())
    }

    fn trial_level(
        &self,
        _issuer: &PublicKey,
        _settings: &Settings,
        _dal: &dyn Dal,
    ) -> Result<usize, RulesError> {
        Ok(self.trial.load(Ordering::Relaxed))
    }

    fn is_over_3_hops(
        &self,
        _pubkey: &PublicKey,
        _links: &[Link],
        _newcomers: &[PublicKey],
        _current: &Block,
        _settings: &Settings,
        _dal: &dyn Dal,
    ) -> Result<bool, RulesError> {
        Ok(self.over_3_hops.load(Ordering::Relaxed))
    }
}

/// Generator producing schematic candidates on top of the store's head.
pub struct StubGenerator {
    dal: std::sync::Arc<MemoryDal>,
    issuer: PublicKey,
    pre_join: RwLock<HashMap<String, PreJoinData>>,
    new_certs: RwLock<HashMap<PublicKey, Vec<CertificationDoc>>>,
    pub link_timestamp: std::sync::atomic::AtomicU64,
}

impl StubGenerator {
    pub fn new(dal: std::sync::Arc<MemoryDal>, issuer: &str) -> Self {
        StubGenerator {
            dal,
            issuer: issuer.into(),
            pre_join: RwLock::default(),
            new_certs: RwLock::default(),
            link_timestamp: std::sync::atomic::AtomicU64::new(900),
        }
    }

    pub fn script_pre_join(&self, data: PreJoinData) {
        self.pre_join
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(data.pubkey.as_str().to_owned(), data);
    }

    pub fn script_new_certs(&self, target: &str, certs: Vec<CertificationDoc>) {
        self.new_certs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.into(), certs);
    }

    fn candidate(&self, empty: bool) -> Result<Block, GeneratorError> {
        match self.dal.current_block()? {
            Some(head) => {
                let mut block = fixture::named_block(
                    head.number + 1,
                    &format!("G{}", head.number + 1),
                    Some(head.hash.as_str()),
                );
                block.median_time = head.median_time + 300;
                block.issuer = self.issuer.clone();
                if empty {
                    block.transactions.clear();
                    block.identities.clear();
                }
                Ok(block)
            }
            None => Err(GeneratorError::NothingToGenerate(
                "no current block".to_owned(),
            )),
        }
    }
}

impl Generator for StubGenerator {
    fn manual_root(&self) -> Result<Block, GeneratorError> {
        let mut root = fixture::root_block();
        root.issuer = self.issuer.clone();
        Ok(root)
    }

    fn next_block(&self) -> Result<Block, GeneratorError> {
        self.candidate(false)
    }

    fn next_empty_block(&self) -> Result<Block, GeneratorError> {
        self.candidate(true)
    }

    fn pre_join_data(&self, identity: &IdentityDoc) -> Result<PreJoinData, GeneratorError> {
        Ok(self
            .pre_join
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity.pubkey.as_str())
            .cloned()
            .unwrap_or(PreJoinData {
                pubkey: identity.pubkey.clone(),
                uid: identity.uid.clone(),
                buid: identity.buid.clone(),
                was_member: false,
                current_msn: -1,
            }))
    }

    fn compute_new_certs(
        &self,
        _for_block: u64,
        pubkeys: &[PublicKey],
    ) -> Result<HashMap<PublicKey, Vec<CertificationDoc>>, GeneratorError> {
        let scripted = self
            .new_certs
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(pubkeys
            .iter()
            .filter_map(|pubkey| {
                scripted
                    .get(pubkey)
                    .map(|certs| (pubkey.clone(), certs.clone()))
            })
            .collect())
    }

    fn new_certs_to_links(
        &self,
        new_certs: &HashMap<PublicKey, Vec<CertificationDoc>>,
    ) -> Vec<Link> {
        let timestamp = self.link_timestamp.load(Ordering::Relaxed);
        new_certs
            .iter()
            .flat_map(|(target, certs)| {
                certs.iter().map(move |cert| Link {
                    source: cert.from.clone(),
                    target: target.clone(),
                    timestamp,
                    obsolete: false,
                })
            })
            .collect()
    }
}

pub(crate) mod fixture {
    use super::*;

    pub fn settings() -> Settings {
        Settings::new("testnet")
    }

    pub fn root_block() -> Block {
        let mut block = named_block(0, "ROOT", None);
        block.parameters = Some("c=0.0488 dt=86400 ud0=100".to_owned());
        block
    }

    pub fn named_block(number: u64, hash: &str, previous: Option<&str>) -> Block {
        Block {
            number,
            hash: BlockHash::from(hash),
            previous_hash: previous.map(BlockHash::from),
            issuer: PublicKey::from("issuer0"),
            median_time: 1_000 + number * 300,
            pow_min: 0,
            nonce: 0,
            members_count: 0,
            parameters: None,
            transactions: vec![],
            identities: vec![],
            certifications: vec![],
            joiners: vec![],
            actives: vec![],
            leavers: vec![],
            revoked: vec![],
            excluded: vec![],
            dividend: None,
            unit_base: 0,
            monetary_mass: 0,
            ud_time: None,
            fork: false,
            wrong: false,
        }
    }

    pub fn block_after(previous: &Block) -> Block {
        let number = previous.number + 1;
        let mut block = named_block(
            number,
            &format!("H{}", number),
            Some(previous.hash.as_str()),
        );
        block.median_time = previous.median_time + 300;
        block
    }
}
