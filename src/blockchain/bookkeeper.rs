//! Main-branch bookkeeping: positioning of freshly admitted blocks,
//! materialized-index maintenance and bulk segment ingestion.

use crate::blockcfg::Block;
use crate::blockchain::chain::{Error, Result};
use crate::dal::{BlockResolver, Dal, DalResult, StatEntry, StatKind, StatsUpdate, UdEntry};
use crate::settings::Settings;

/// How often to report progress while ingesting a long segment.
const PROGRESS_LOGGING_DISTANCE: usize = 2500;

/// Denormalizes the signing issuer of each transaction onto its inputs,
/// so that downstream rules and source updates see the signer without
/// joining back to the transaction.
pub(crate) fn fingerprint_tx_issuers(block: &mut Block) {
    for tx in &mut block.transactions {
        let signer = match tx.issuers.first() {
            Some(signer) => signer.clone(),
            None => continue,
        };
        for input in &mut tx.inputs {
            if input.issuer.is_none() {
                input.issuer = Some(signer.clone());
            }
        }
    }
}

/// Assigns the derived fields of a block entering the canonical chain:
/// `fork`, `monetary_mass` and `ud_time`, following the emission
/// recurrences.
pub(crate) fn position_block(
    mut block: Block,
    previous: Option<&Block>,
    settings: &Settings,
) -> Block {
    block.fork = false;
    block.wrong = false;
    let emitted = block
        .dividend
        .map(|dividend| dividend * block.members_count)
        .unwrap_or(0);
    match previous {
        None => {
            block.monetary_mass = emitted;
            block.ud_time = Some(block.median_time);
        }
        Some(previous) => {
            block.monetary_mass = previous.monetary_mass + emitted;
            let previous_ud_time = previous.ud_time.unwrap_or(previous.median_time);
            block.ud_time = if block.dividend.is_some() {
                Some(previous_ud_time + settings.dt)
            } else {
                Some(previous_ud_time)
            };
        }
    }
    block
}

/// Universal dividends emitted by the given blocks, in block order.
pub(crate) fn ud_entries(blocks: &[Block]) -> Vec<UdEntry> {
    blocks
        .iter()
        .filter_map(|block| {
            block.dividend.map(|dividend| UdEntry {
                block_number: block.number,
                dividend,
                unit_base: block.unit_base,
            })
        })
        .collect()
}

/// Applies the materialized-index updates for a single freshly inserted
/// canonical block.
pub(crate) fn index_block(dal: &dyn Dal, block: &Block) -> DalResult<()> {
    let blocks = std::slice::from_ref(block);
    dal.update_members_for_blocks(blocks)?;
    dal.update_transactions_for_blocks(blocks)?;
    dal.update_memberships_for_blocks(blocks)?;
    dal.update_links_for_blocks(blocks, &dal)?;
    dal.update_certifications_for_blocks(blocks)?;
    dal.update_transaction_sources_for_blocks(blocks, &ud_entries(blocks))?;
    Ok(())
}

/// Serves blocks out of a not-yet-persisted segment before falling back
/// to the store.
struct SegmentResolver<'a> {
    segment: &'a [Block],
    dal: &'a dyn Dal,
}

impl BlockResolver for SegmentResolver<'_> {
    fn block(&self, number: u64) -> DalResult<Option<Block>> {
        if let Some(first) = self.segment.first() {
            if number >= first.number {
                if let Some(block) = self.segment.get((number - first.number) as usize) {
                    return Ok(Some(block.clone()));
                }
            }
        }
        self.dal.get_block_or_null(number)
    }
}

/// Applies a contiguous ascending main-chain segment in one pass,
/// typically during initial synchronization.
pub(crate) fn save_blocks_in_main_branch(
    dal: &dyn Dal,
    blocks: Vec<Block>,
    target_last_number: u64,
    settings: &Settings,
) -> Result<()> {
    let first = match blocks.first() {
        Some(first) => first,
        None => return Ok(()),
    };

    if first.number == 0 {
        let parameters = first.parameters.as_deref().ok_or_else(|| Error::InvalidBlock {
            reason: "root block carries no currency parameters".to_owned(),
        })?;
        dal.save_parameters(parameters)?;
    }

    let mut previous = if first.number > 0 {
        Some(dal.get_block(first.number - 1)?)
    } else {
        None
    };

    let mut positioned = Vec::with_capacity(blocks.len());
    for (parsed, mut block) in blocks.into_iter().enumerate() {
        fingerprint_tx_issuers(&mut block);
        let block = position_block(block, previous.as_ref(), settings);
        if (parsed + 1) % PROGRESS_LOGGING_DISTANCE == 0 {
            tracing::info!(
                "still processing the main branch, currently at {} ...",
                block.description()
            );
        }
        previous = Some(block.clone());
        positioned.push(block);
    }

    dal.update_members_for_blocks(&positioned)?;
    dal.update_transactions_for_blocks(&positioned)?;
    dal.update_memberships_for_blocks(&positioned)?;
    let resolver = SegmentResolver {
        segment: &positioned,
        dal,
    };
    dal.update_links_for_blocks(&positioned, &resolver)?;
    dal.update_certifications_for_blocks(&positioned)?;
    dal.update_transaction_sources_for_blocks(&positioned, &ud_entries(&positioned))?;

    dal.save_bunch(&positioned)?;
    dal.push_stats(&compute_stats(&positioned, target_last_number))?;

    tracing::info!(
        "main branch extended up to block #{} ({} block(s))",
        target_last_number,
        positioned.len()
    );
    Ok(())
}

fn stat_triggered(kind: StatKind, block: &Block) -> bool {
    match kind {
        StatKind::Newcomers => !block.identities.is_empty(),
        StatKind::Certs => !block.certifications.is_empty(),
        StatKind::Joiners => !block.joiners.is_empty(),
        StatKind::Actives => !block.actives.is_empty(),
        StatKind::Leavers => !block.leavers.is_empty(),
        StatKind::Revoked => !block.revoked.is_empty(),
        StatKind::Excluded => !block.excluded.is_empty(),
        StatKind::Ud => block.dividend.is_some(),
        StatKind::Tx => !block.transactions.is_empty(),
    }
}

/// Records, per statistic kind, the blocks of the segment that were
/// active for it, and the last block the scan went through.
pub(crate) fn compute_stats(blocks: &[Block], last_parsed_block: u64) -> StatsUpdate {
    StatsUpdate {
        entries: StatKind::ALL
            .iter()
            .map(|kind| StatEntry {
                kind: *kind,
                blocks: blocks
                    .iter()
                    .filter(|block| stat_triggered(*kind, block))
                    .map(|block| block.number)
                    .collect(),
                last_parsed_block,
            })
            .collect(),
    }
}
