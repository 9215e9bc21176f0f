mod bookkeeper;
mod branches;
mod chain;
mod fork_store;
mod process;
mod requirements;
mod switch;

pub use self::{
    branches::{branch_heads, side_branches},
    chain::{Chain, Error},
    fork_store::ForkStore,
    process::Process,
    requirements::{CertificationExpiry, IdentityRequirements, RequirementsEvaluator},
    switch::{ForkSwitcher, SWITCH_ON_BRANCH_AHEAD_BY_X_MINUTES},
};

/// Upper bound on the span of a `blocks_between` query.
pub const MAX_BLOCKS_SPAN: u64 = 5000;
