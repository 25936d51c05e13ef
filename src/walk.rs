use std::collections::HashSet;
use std::io::{Read, Seek};

use log::{debug, trace};

use crate::ag::AgReader;
use crate::btree::{decode_block, BtreeKind, BtreeNode};
use crate::constants::{MAX_BTREE_LEVELS, NULLAGBLOCK};
use crate::error::{Location, Result, XfsError};

/// Collect every leaf record of one short-form B+tree, in key order.
///
/// `levels` is the tree height recorded in the AGF/AGI, so the root block
/// sits at level `levels - 1`. Blocks are visited depth-first from an
/// explicit work list; each address must lie inside the AG and be visited
/// at most once, which bounds the walk to `ag_length` reads.
pub fn walk_btree<K: BtreeKind, T: Read + Seek>(
    reader: &mut AgReader<'_, T>,
    root: u32,
    levels: u32,
    ag_length: u32,
) -> Result<Vec<K::Record>> {
    let agno = reader.agno();
    let geometry = *reader.geometry();
    let root_at = Location::block(agno, K::STRUCTURE, root);

    if levels == 0 || levels > MAX_BTREE_LEVELS {
        return Err(XfsError::corrupt(
            root_at,
            format!("tree height {} out of range", levels),
        ));
    }

    let first_block = geometry.first_tree_block();
    let mut visited: HashSet<u32> = HashSet::new();
    // Last block seen on each level, with its right sibling.
    let mut level_tail: Vec<Option<(u32, u32)>> = vec![None; levels as usize];
    let mut records: Vec<K::Record> = Vec::new();
    let mut work: Vec<(u32, u16)> = vec![(root, (levels - 1) as u16)];

    while let Some((agbno, expected_level)) = work.pop() {
        let at = Location::block(agno, K::STRUCTURE, agbno);
        if agbno < first_block || agbno >= ag_length {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "pointer outside the AG (valid blocks {}..{})",
                    first_block, ag_length
                ),
            ));
        }
        if !visited.insert(agbno) {
            return Err(XfsError::corrupt(at, "block already visited in this walk"));
        }

        let data = reader.read_block(agbno, K::STRUCTURE)?;
        let block = decode_block::<K>(&data, agno, agbno, &geometry)?;
        trace!(
            "{}: level {} with {} records",
            at,
            block.header.bb_level,
            block.header.bb_numrecs
        );

        if block.header.bb_level != expected_level {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "block is at level {}, expected {}",
                    block.header.bb_level, expected_level
                ),
            ));
        }

        let tail = &mut level_tail[expected_level as usize];
        let linked = match *tail {
            None => block.header.bb_leftsib == NULLAGBLOCK,
            Some((previous, previous_right)) => {
                previous_right == agbno && block.header.bb_leftsib == previous
            }
        };
        if !linked {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "sibling chain broken (left sibling {:#x})",
                    block.header.bb_leftsib
                ),
            ));
        }
        *tail = Some((agbno, block.header.bb_rightsib));

        match block.node {
            BtreeNode::Leaf(leaf_records) => {
                for record in leaf_records {
                    if let Some(last) = records.last() {
                        if K::record_key(last) >= K::record_key(&record) {
                            return Err(XfsError::corrupt(
                                at,
                                format!("record {:?} out of key order", record),
                            ));
                        }
                    }
                    records.push(record);
                }
            }
            BtreeNode::Interior(entries) => {
                // Reversed so the smallest key is popped first.
                for (_, child) in entries.iter().rev() {
                    work.push((*child, expected_level - 1));
                }
            }
        }
    }

    for (level, tail) in level_tail.iter().enumerate() {
        if let Some((agbno, right)) = tail {
            if *right != NULLAGBLOCK {
                return Err(XfsError::corrupt(
                    Location::block(agno, K::STRUCTURE, *agbno),
                    format!(
                        "last block on level {} points right to {:#x}",
                        level, right
                    ),
                ));
            }
        }
    }

    debug!(
        "AG {} {}: {} blocks, {} records",
        agno,
        K::STRUCTURE,
        visited.len(),
        records.len()
    );
    Ok(records)
}
