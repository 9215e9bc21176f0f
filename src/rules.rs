//! Contract of the consensus rules engine.
//!
//! The rule set itself is out of scope; the core only selects the check
//! mode and maps rejections into admission errors.

use crate::blockcfg::{Block, Link, PublicKey};
use crate::dal::{Dal, DalError};
use crate::settings::Settings;
use thiserror::Error;

/// How much of a block to validate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckMode {
    /// Structural validation only.
    Structure,
    /// Full validation, including signatures and the proof of work.
    WithSignaturesAndPow,
}

/// A rule the block failed, with the reason reported by the engine.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct RuleViolation {
    pub reason: String,
}

impl RuleViolation {
    pub fn new(reason: impl Into<String>) -> Self {
        RuleViolation {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RulesError {
    #[error(transparent)]
    Violation(#[from] RuleViolation),
    #[error(transparent)]
    Dal(#[from] DalError),
}

pub trait RulesEngine: Send + Sync {
    /// Validates `block` against the consensus rule set.
    fn check_block(
        &self,
        block: &Block,
        mode: CheckMode,
        settings: &Settings,
        dal: &dyn Dal,
    ) -> Result<(), RulesError>;

    /// Proof-of-work difficulty required for the next block issued by
    /// `issuer`.
    fn trial_level(&self, issuer: &PublicKey, settings: &Settings, dal: &dyn Dal)
        -> Result<usize, RulesError>;

    /// Web-of-trust stability predicate: whether `pubkey` would exceed
    /// the maximum distance to the referential set, given the provisional
    /// `links` and `newcomers`.
    fn is_over_3_hops(
        &self,
        pubkey: &PublicKey,
        links: &[Link],
        newcomers: &[PublicKey],
        current: &Block,
        settings: &Settings,
        dal: &dyn Dal,
    ) -> Result<bool, RulesError>;
}
