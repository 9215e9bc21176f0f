//! Per-identity membership and certification status against the current
//! head.

use crate::blockcfg::{Block, IdentityDoc, PublicKey};
use crate::blockchain::chain::Result;
use crate::dal::Dal;
use crate::generator::Generator;
use crate::rules::RulesEngine;
use crate::settings::Settings;
use std::sync::Arc;

/// One incoming certification and the time left before it expires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificationExpiry {
    pub from: PublicKey,
    pub timestamp: u64,
    pub expires_in: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRequirements {
    pub pubkey: PublicKey,
    pub uid: String,
    /// The block identifier the identity was signed against.
    pub meta_timestamp: String,
    /// Whether the identity would exceed the maximum web-of-trust
    /// distance if membership happened on the next block.
    pub outdistanced: bool,
    pub certifications: Vec<CertificationExpiry>,
    pub membership_pending_expires_in: u64,
    pub membership_expires_in: u64,
}

#[derive(Clone)]
pub struct RequirementsEvaluator {
    dal: Arc<dyn Dal>,
    rules: Arc<dyn RulesEngine>,
    generator: Arc<dyn Generator>,
    settings: Arc<Settings>,
}

impl RequirementsEvaluator {
    pub fn new(
        dal: Arc<dyn Dal>,
        rules: Arc<dyn RulesEngine>,
        generator: Arc<dyn Generator>,
        settings: Arc<Settings>,
    ) -> Self {
        RequirementsEvaluator {
            dal,
            rules,
            generator,
            settings,
        }
    }

    /// Evaluates `identity` as if membership happened at block
    /// `current.number + 1`.
    pub fn requirements_of_identity(
        &self,
        identity: &IdentityDoc,
        current: &Block,
    ) -> Result<IdentityRequirements> {
        let pre_join = self.generator.pre_join_data(identity)?;
        let pubkey = pre_join.pubkey.clone();

        let new_certs = self
            .generator
            .compute_new_certs(current.number + 1, std::slice::from_ref(&pubkey))?;
        let provisional_links = self.generator.new_certs_to_links(&new_certs);
        let persisted_links = self.dal.get_valid_links_to(&pubkey)?;

        let current_time = current.median_time;
        let sig_validity = self.settings.sig_validity;
        let certifications: Vec<CertificationExpiry> = persisted_links
            .iter()
            .chain(provisional_links.iter())
            .map(|link| CertificationExpiry {
                from: link.source.clone(),
                timestamp: link.timestamp,
                expires_in: (link.timestamp + sig_validity).saturating_sub(current_time),
            })
            .collect();

        let newcomers = [pubkey.clone()];
        let outdistanced = self.rules.is_over_3_hops(
            &pubkey,
            &provisional_links,
            &newcomers,
            current,
            &self.settings,
            &*self.dal,
        )?;

        let ms_validity = self.settings.ms_validity;
        let membership_expires_in = if pre_join.current_msn >= 0 {
            match self.dal.get_block_or_null(pre_join.current_msn as u64)? {
                Some(ms_block) => {
                    (ms_block.median_time + ms_validity).saturating_sub(current_time)
                }
                None => 0,
            }
        } else {
            0
        };

        let membership_pending_expires_in = match self.dal.last_join_of_identity(&pubkey)? {
            Some(join) => match self.dal.get_block_or_null(join.block_number)? {
                Some(join_block) => {
                    (join_block.median_time + ms_validity).saturating_sub(current_time)
                }
                None => 0,
            },
            None => 0,
        };

        Ok(IdentityRequirements {
            pubkey,
            uid: pre_join.uid,
            meta_timestamp: pre_join.buid,
            outdistanced,
            certifications,
            membership_pending_expires_in,
            membership_expires_in,
        })
    }
}
