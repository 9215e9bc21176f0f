//! Contract of the persistent data access layer.
//!
//! The store itself lives outside this crate; the service core drives it
//! through [`Dal`]. All mutating calls are confined to the block
//! admission lane, queries may run concurrently with it.

use crate::blockcfg::{Block, BlockHash, CertificationDoc, Link, Member, MembershipDoc, PublicKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DalError {
    #[error("block not found")]
    BlockNotFound,
    #[error("database backend error: {0}")]
    Backend(String),
}

pub type DalResult<T> = Result<T, DalError>;

/// Block lookup that serves a not-yet-persisted segment before falling
/// back to the store. Used when materializing links for a bunch of
/// blocks whose certification targets live in the same bunch.
pub trait BlockResolver {
    fn block(&self, number: u64) -> DalResult<Option<Block>>;
}

impl BlockResolver for &dyn Dal {
    fn block(&self, number: u64) -> DalResult<Option<Block>> {
        self.get_block_or_null(number)
    }
}

/// Statistic kinds tracked per block during main-branch extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatKind {
    Newcomers,
    Certs,
    Joiners,
    Actives,
    Leavers,
    Revoked,
    Excluded,
    Ud,
    Tx,
}

impl StatKind {
    pub const ALL: [StatKind; 9] = [
        StatKind::Newcomers,
        StatKind::Certs,
        StatKind::Joiners,
        StatKind::Actives,
        StatKind::Leavers,
        StatKind::Revoked,
        StatKind::Excluded,
        StatKind::Ud,
        StatKind::Tx,
    ];
}

/// Per-kind list of blocks that were active for the statistic, plus the
/// last block the scan went through.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsUpdate {
    pub entries: Vec<StatEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatEntry {
    pub kind: StatKind,
    pub blocks: Vec<u64>,
    pub last_parsed_block: u64,
}

/// A universal dividend emitted by one block, driving source creation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UdEntry {
    pub block_number: u64,
    pub dividend: u64,
    pub unit_base: u64,
}

/// The persistent store, as consumed by the service core.
pub trait Dal: Send + Sync {
    // ---- canonical chain queries ----

    fn current_block(&self) -> DalResult<Option<Block>>;
    /// Canonical block `n`; `BlockNotFound` when the chain is shorter.
    fn get_block(&self, number: u64) -> DalResult<Block>;
    fn get_block_or_null(&self, number: u64) -> DalResult<Option<Block>>;
    /// The block promoted to the canonical chain at `n`, if any.
    fn get_promoted(&self, number: u64) -> DalResult<Option<Block>>;
    /// Canonical-only lookup.
    fn get_block_by_number_and_hash(
        &self,
        number: u64,
        hash: &BlockHash,
    ) -> DalResult<Option<Block>>;
    /// Lookup across the canonical chain and the fork store.
    fn get_absolute_block_by_number_and_hash(
        &self,
        number: u64,
        hash: &BlockHash,
    ) -> DalResult<Option<Block>>;
    /// Canonical blocks with `from <= number <= to`, ascending.
    fn get_blocks_between(&self, from: u64, to: u64) -> DalResult<Vec<Block>>;

    // ---- fork store ----

    /// Every persisted side block still eligible for a switch, i.e. not
    /// flagged `wrong`.
    fn get_fork_blocks(&self) -> DalResult<Vec<Block>>;
    fn save_side_block(&self, block: &Block) -> DalResult<()>;
    fn set_side_block_wrong(&self, number: u64, hash: &BlockHash) -> DalResult<()>;

    // ---- canonical chain mutations ----

    fn save_block(&self, block: &Block) -> DalResult<()>;
    /// Drops the head from the canonical chain and returns it.
    fn remove_current_block(&self) -> DalResult<Block>;
    fn save_bunch(&self, blocks: &[Block]) -> DalResult<()>;
    fn save_parameters(&self, parameters: &str) -> DalResult<()>;

    // ---- materialized indices ----

    fn update_members_for_blocks(&self, blocks: &[Block]) -> DalResult<()>;
    fn update_memberships_for_blocks(&self, blocks: &[Block]) -> DalResult<()>;
    fn update_certifications_for_blocks(&self, blocks: &[Block]) -> DalResult<()>;
    fn update_links_for_blocks(
        &self,
        blocks: &[Block],
        resolver: &dyn BlockResolver,
    ) -> DalResult<()>;
    fn update_transactions_for_blocks(&self, blocks: &[Block]) -> DalResult<()>;
    /// Consumes transaction inputs and, for every entry of `dividends`,
    /// creates one `D` source per current member.
    fn update_transaction_sources_for_blocks(
        &self,
        blocks: &[Block],
        dividends: &[UdEntry],
    ) -> DalResult<()>;
    /// Single-block inverse of the index updates above.
    fn revert_block(&self, block: &Block) -> DalResult<()>;

    fn expire_memberships_before(&self, median_time: u64) -> DalResult<()>;
    fn expire_certifications_before(&self, median_time: u64) -> DalResult<()>;

    // ---- web of trust ----

    fn get_members(&self) -> DalResult<Vec<Member>>;
    fn is_member(&self, pubkey: &PublicKey) -> DalResult<bool>;
    fn get_valid_links_to(&self, target: &PublicKey) -> DalResult<Vec<Link>>;
    /// Latest pending (not yet absorbed) join of the identity.
    fn last_join_of_identity(&self, pubkey: &PublicKey) -> DalResult<Option<MembershipDoc>>;
    /// Valid (non-expired) certifications received by `target`.
    fn get_valid_certs_to(&self, target: &PublicKey) -> DalResult<Vec<CertificationDoc>>;
    /// The oldest block whose certifications are still within the
    /// signature validity window ending at `current`.
    fn get_certification_excluding_block(
        &self,
        current: &Block,
        cert_validity: u64,
    ) -> DalResult<Block>;

    // ---- bookkeeping ----

    fn push_stats(&self, update: &StatsUpdate) -> DalResult<()>;
    fn migrate_old_blocks(&self) -> DalResult<()>;
}
