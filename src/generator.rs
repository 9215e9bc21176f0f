//! Contract of the block generator.
//!
//! The generator pools pending identities, certifications and
//! transactions and assembles candidate blocks; the service core decides
//! when to generate and proves the result.

use crate::blockcfg::{Block, CertificationDoc, IdentityDoc, Link, PublicKey};
use crate::dal::DalError;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("no pooled material to generate from: {0}")]
    NothingToGenerate(String),
    #[error(transparent)]
    Dal(#[from] DalError),
}

/// Snapshot of an identity before it joins, used by the requirements
/// computation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreJoinData {
    pub pubkey: PublicKey,
    pub uid: String,
    /// Block identifier the identity was signed against.
    pub buid: String,
    pub was_member: bool,
    /// Block number of the identity's last membership action, `-1` when
    /// none exists.
    pub current_msn: i64,
}

pub trait Generator: Send + Sync {
    /// Candidate root block assembled from the pooled documents.
    fn manual_root(&self) -> Result<Block, GeneratorError>;

    /// Candidate next block on top of the current head.
    fn next_block(&self) -> Result<Block, GeneratorError>;

    /// Candidate next block carrying no documents.
    fn next_empty_block(&self) -> Result<Block, GeneratorError>;

    /// Pre-join snapshot of one pooled identity.
    fn pre_join_data(&self, identity: &IdentityDoc) -> Result<PreJoinData, GeneratorError>;

    /// Provisional certifications the listed pubkeys would receive if
    /// membership happened at block `for_block`.
    fn compute_new_certs(
        &self,
        for_block: u64,
        pubkeys: &[PublicKey],
    ) -> Result<HashMap<PublicKey, Vec<CertificationDoc>>, GeneratorError>;

    /// Converts provisional certifications into provisional links.
    fn new_certs_to_links(
        &self,
        new_certs: &HashMap<PublicKey, Vec<CertificationDoc>>,
    ) -> Vec<Link>;
}
