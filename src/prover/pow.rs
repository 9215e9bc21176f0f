//! The proof-of-work engine.
//!
//! Proving walks the nonce space in batches; the cancellation token is
//! observed at every batch boundary so a chain mutation can preempt an
//! in-flight proof without waiting for it.

use crate::blockcfg::Block;
use tokio_util::sync::CancellationToken;

/// Nonces tried between two cancellation checks.
const NONCE_BATCH: u64 = 2048;

/// Searches a nonce giving the block a fingerprint with at least
/// `trial` leading zeroes. Returns `None` when the token fires first.
pub fn prove_block(mut block: Block, trial: usize, token: &CancellationToken) -> Option<Block> {
    loop {
        for _ in 0..NONCE_BATCH {
            let hash = block.computed_hash();
            if hash.leading_zeros() >= trial {
                block.hash = hash;
                return Some(block);
            }
            block.nonce = block.nonce.wrapping_add(1);
        }
        if token.is_cancelled() {
            return None;
        }
    }
}
