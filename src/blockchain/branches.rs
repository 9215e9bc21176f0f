//! Enumeration of the side branches anchored on the canonical chain.
//!
//! Side blocks are kept as a flat set; branches are rebuilt on demand.
//! A block whose predecessor is canonical ("forkable") seeds a branch;
//! the remaining blocks are attached in ascending number order, either
//! extending a branch tip in place or splitting a branch at an interior
//! position. Splitting duplicates the branch prefix so that the original
//! tip keeps participating.

use crate::blockcfg::Block;
use crate::blockchain::chain::Result;
use crate::dal::Dal;

/// The set of longest side branches, each as an ascending block
/// sequence whose first block anchors on the canonical chain.
pub fn side_branches(dal: &dyn Dal) -> Result<Vec<Vec<Block>>> {
    let mut side_blocks = dal.get_fork_blocks()?;
    side_blocks.sort_by(|a, b| a.number.cmp(&b.number));

    let mut branches: Vec<Vec<Block>> = Vec::new();
    let mut others: Vec<Block> = Vec::new();
    for block in side_blocks {
        if is_forkable(dal, &block)? {
            branches.push(vec![block]);
        } else {
            others.push(block);
        }
    }

    for other in others {
        // splits found for this block are attached before looking at the
        // next one, so they can be extended further
        let mut pending: Vec<Vec<Block>> = Vec::new();
        for branch in branches.iter_mut() {
            let tip = match branch.last() {
                Some(tip) => tip,
                None => continue,
            };
            if other.follows(tip) {
                branch.push(other.clone());
                continue;
            }
            if branch.len() < 2 {
                continue;
            }
            let base_number = branch[0].number;
            if other.number <= base_number {
                continue;
            }
            let diff = (other.number - base_number) as usize;
            if let Some(fork_point) = branch.get(diff - 1) {
                if Some(&fork_point.hash) == other.previous_hash.as_ref() {
                    let mut split = branch[..diff].to_vec();
                    split.push(other.clone());
                    pending.push(split);
                }
            }
        }
        branches.append(&mut pending);
    }

    let longest = branches.iter().map(Vec::len).max().unwrap_or(0);
    branches.retain(|branch| branch.len() == longest);
    Ok(branches)
}

/// Candidate heads for fork choice: the tip of every longest side
/// branch, and the current head last.
pub fn branch_heads(dal: &dyn Dal) -> Result<Vec<Block>> {
    let mut heads: Vec<Block> = side_branches(dal)?
        .into_iter()
        .filter_map(|branch| branch.into_iter().last())
        .collect();
    if let Some(current) = dal.current_block()? {
        heads.push(current);
    }
    Ok(heads)
}

fn is_forkable(dal: &dyn Dal, block: &Block) -> Result<bool> {
    if block.number == 0 {
        return Ok(false);
    }
    let previous_hash = match &block.previous_hash {
        Some(hash) => hash,
        None => return Ok(false),
    };
    Ok(dal
        .get_block_by_number_and_hash(block.number - 1, previous_hash)?
        .is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockcfg::BlockHash;
    use crate::dal::Dal;
    use crate::testing::fixture::named_block;
    use crate::testing::MemoryDal;

    fn dal_with_canonical(blocks: &[Block]) -> MemoryDal {
        let dal = MemoryDal::default();
        for block in blocks {
            dal.save_block(block).expect("canonical save");
        }
        dal
    }

    fn side(dal: &MemoryDal, block: &Block) {
        let mut side = block.clone();
        side.fork = true;
        dal.save_side_block(&side).expect("side save");
    }

    #[test]
    fn forkable_blocks_seed_branches() {
        let b9 = named_block(9, "H9", None);
        let b10 = named_block(10, "H10", Some("H9"));
        let dal = dal_with_canonical(&[b9, b10.clone()]);

        let s10 = named_block(10, "S10", Some("H9"));
        side(&dal, &s10);

        let branches = side_branches(&dal).expect("enumeration");
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].len(), 1);
        assert_eq!(branches[0][0].hash, BlockHash::from("S10"));
        assert!(branches[0][0].fork);
    }

    #[test]
    fn others_extend_their_branch_in_order() {
        let b9 = named_block(9, "H9", None);
        let dal = dal_with_canonical(&[b9]);

        let s10 = named_block(10, "S10", Some("H9"));
        let s11 = named_block(11, "S11", Some("S10"));
        let s12 = named_block(12, "S12", Some("S11"));
        for block in [&s12, &s10, &s11] {
            side(&dal, block);
        }

        let branches = side_branches(&dal).expect("enumeration");
        assert_eq!(branches.len(), 1);
        let numbers: Vec<u64> = branches[0].iter().map(|b| b.number).collect();
        assert_eq!(numbers, vec![10, 11, 12]);
    }

    #[test]
    fn interior_attachment_splits_and_keeps_original() {
        let b9 = named_block(9, "H9", None);
        let dal = dal_with_canonical(&[b9]);

        let s10 = named_block(10, "S10", Some("H9"));
        let s11 = named_block(11, "S11", Some("S10"));
        let s12 = named_block(12, "S12", Some("S11"));
        // competitor of S11 on top of S10
        let x11 = named_block(11, "X11", Some("S10"));
        let x12 = named_block(12, "X12", Some("X11"));
        for block in [&s10, &s11, &s12, &x11, &x12] {
            side(&dal, block);
        }

        let branches = side_branches(&dal).expect("enumeration");
        assert_eq!(branches.len(), 2);
        let tips: Vec<&str> = branches
            .iter()
            .filter_map(|b| b.last())
            .map(|b| b.hash.as_str())
            .collect();
        assert!(tips.contains(&"S12"));
        assert!(tips.contains(&"X12"));
        for branch in &branches {
            assert_eq!(branch[0].hash, BlockHash::from("S10"));
            assert!(branch.iter().all(|b| b.fork));
        }
    }

    #[test]
    fn only_longest_branches_are_returned() {
        let b9 = named_block(9, "H9", None);
        let dal = dal_with_canonical(&[b9]);

        // short branch directly on the canonical chain
        let short = named_block(10, "SHORT", Some("H9"));
        // long branch next to it
        let s10 = named_block(10, "S10", Some("H9"));
        let s11 = named_block(11, "S11", Some("S10"));
        for block in [&short, &s10, &s11] {
            side(&dal, block);
        }

        let branches = side_branches(&dal).expect("enumeration");
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].last().map(|b| b.hash.as_str()), Some("S11"));
    }

    #[test]
    fn unanchored_blocks_are_dropped() {
        let b9 = named_block(9, "H9", None);
        let dal = dal_with_canonical(&[b9]);

        let stray = named_block(30, "STRAY", Some("NOWHERE"));
        side(&dal, &stray);

        let branches = side_branches(&dal).expect("enumeration");
        assert!(branches.is_empty());
    }

    #[test]
    fn branch_heads_append_the_current_head() {
        let b9 = named_block(9, "H9", None);
        let dal = dal_with_canonical(&[b9.clone()]);
        let s10 = named_block(10, "S10", Some("H9"));
        side(&dal, &s10);

        let heads = branch_heads(&dal).expect("heads");
        assert_eq!(heads.len(), 2);
        assert_eq!(heads[0].hash, BlockHash::from("S10"));
        assert_eq!(heads[1].hash, b9.hash);
    }
}
