//! Inode and free-inode B+trees: one record per 64-inode chunk.
use std::io::{Read, Seek};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};
use serde::Serialize;

use crate::ag::AgReader;
use crate::agi::Agi;
use crate::btree::BtreeKind;
use crate::constants::{Structure, XFS_INODES_PER_CHUNK};
use crate::error::{Location, Result, XfsError};
use crate::superblock::Geometry;
use crate::walk::walk_btree;

pub const INOBT_REC_SIZE: usize = 16;
pub const INOBT_KEY_SIZE: usize = 4;
/// Each holemask bit covers this many inodes.
pub const XFS_INODES_PER_HOLEMASK_BIT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InobtRec {
    /// First AG inode number of the chunk.
    pub ir_startino: u32,
    /// Sparse chunks only: set bits mark 4-inode runs that were never allocated.
    pub ir_holemask: u16,
    /// Inodes physically present in the chunk.
    pub ir_count: u32,
    pub ir_freecount: u32,
    /// Set bits mark free inodes.
    pub ir_free: u64,
}

impl InobtRec {
    /// Sparse-inode filesystems split the 32-bit free count into holemask, count and freecount.
    pub fn from_bytes(data: &[u8], sparse: bool) -> Self {
        let ir_startino = BigEndian::read_u32(&data[0..4]);
        let ir_free = BigEndian::read_u64(&data[8..16]);
        if sparse {
            InobtRec {
                ir_startino,
                ir_holemask: BigEndian::read_u16(&data[4..6]),
                ir_count: data[6] as u32,
                ir_freecount: data[7] as u32,
                ir_free,
            }
        } else {
            InobtRec {
                ir_startino,
                ir_holemask: 0,
                ir_count: XFS_INODES_PER_CHUNK,
                ir_freecount: BigEndian::read_u32(&data[4..8]),
                ir_free,
            }
        }
    }

    pub fn inode_count(&self) -> u32 {
        self.ir_count
    }

    pub fn is_hole(&self, index: u32) -> bool {
        index < XFS_INODES_PER_CHUNK
            && self.ir_holemask & (1 << (index / XFS_INODES_PER_HOLEMASK_BIT)) != 0
    }

    pub fn is_free(&self, index: u32) -> bool {
        index < XFS_INODES_PER_CHUNK && self.ir_free & (1u64 << index) != 0
    }

    /// AG inode numbers of the chunk that are allocated and in use. Numbers
    /// past the 32-bit AG inode space are dropped.
    pub fn in_use_inodes(&self) -> Vec<u32> {
        (0..XFS_INODES_PER_CHUNK)
            .filter(|&i| !self.is_hole(i) && !self.is_free(i))
            .filter_map(|i| self.ir_startino.checked_add(i))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InodeBtree;

#[derive(Debug, Clone, Copy)]
pub struct FreeInodeBtree;

fn decode_inobt_key(data: &[u8]) -> u32 {
    BigEndian::read_u32(&data[0..INOBT_KEY_SIZE])
}

impl BtreeKind for InodeBtree {
    type Record = InobtRec;
    type Key = u32;

    const STRUCTURE: Structure = Structure::Inode;
    const RECORD_SIZE: usize = INOBT_REC_SIZE;
    const KEY_SIZE: usize = INOBT_KEY_SIZE;

    fn decode_record(data: &[u8], geometry: &Geometry) -> InobtRec {
        InobtRec::from_bytes(data, geometry.has_sparse_inodes)
    }

    fn decode_key(data: &[u8]) -> u32 {
        decode_inobt_key(data)
    }

    fn record_key(record: &InobtRec) -> u32 {
        record.ir_startino
    }
}

impl BtreeKind for FreeInodeBtree {
    type Record = InobtRec;
    type Key = u32;

    const STRUCTURE: Structure = Structure::FreeInode;
    const RECORD_SIZE: usize = INOBT_REC_SIZE;
    const KEY_SIZE: usize = INOBT_KEY_SIZE;

    fn decode_record(data: &[u8], geometry: &Geometry) -> InobtRec {
        InobtRec::from_bytes(data, geometry.has_sparse_inodes)
    }

    fn decode_key(data: &[u8]) -> u32 {
        decode_inobt_key(data)
    }

    fn record_key(record: &InobtRec) -> u32 {
        record.ir_startino
    }
}

/// All chunk records of the inode B+tree, ascending by start inode.
///
/// The inodes they describe must add up to the AGI's allocated count.
pub fn walk_inode_btree<T: Read + Seek>(
    reader: &mut AgReader<'_, T>,
    agi: &Agi,
) -> Result<Vec<InobtRec>> {
    let records =
        walk_btree::<InodeBtree, T>(reader, agi.agi_root, agi.agi_level, agi.agi_length)?;

    let total: u64 = records.iter().map(|r| r.inode_count() as u64).sum();
    if total != agi.agi_count as u64 {
        return Err(XfsError::corrupt(
            Location::block(reader.agno(), Structure::Inode, agi.agi_root),
            format!(
                "{} chunk records describe {} inodes but the AGI counts {}",
                records.len(),
                total,
                agi.agi_count
            ),
        ));
    }
    debug!(
        "AG {}: {} inode chunks, {} inodes",
        reader.agno(),
        records.len(),
        total
    );
    Ok(records)
}

/// Chunk records of the free-inode B+tree, or nothing when the filesystem has none.
pub fn walk_free_inode_btree<T: Read + Seek>(
    reader: &mut AgReader<'_, T>,
    agi: &Agi,
) -> Result<Vec<InobtRec>> {
    if !reader.geometry().has_finobt {
        info!("AG {}: no free-inode btree on this filesystem", reader.agno());
        return Ok(Vec::new());
    }
    let records = walk_btree::<FreeInodeBtree, T>(
        reader,
        agi.agi_free_root,
        agi.agi_free_level,
        agi.agi_length,
    )?;
    if let Some(full) = records.iter().find(|r| r.ir_freecount == 0) {
        return Err(XfsError::corrupt(
            Location::block(reader.agno(), Structure::FreeInode, agi.agi_free_root),
            format!("chunk at inode {} has no free inodes", full.ir_startino),
        ));
    }
    Ok(records)
}

#[cfg(test)]
impl InobtRec {
    /// A fully allocated chunk with the given free bitmap.
    pub fn full(startino: u32, free: u64) -> Self {
        InobtRec {
            ir_startino: startino,
            ir_holemask: 0,
            ir_count: XFS_INODES_PER_CHUNK,
            ir_freecount: free.count_ones(),
            ir_free: free,
        }
    }

    pub fn to_bytes(&self, sparse: bool) -> [u8; INOBT_REC_SIZE] {
        let mut buf = [0u8; INOBT_REC_SIZE];
        BigEndian::write_u32(&mut buf[0..4], self.ir_startino);
        if sparse {
            BigEndian::write_u16(&mut buf[4..6], self.ir_holemask);
            buf[6] = self.ir_count as u8;
            buf[7] = self.ir_freecount as u8;
        } else {
            BigEndian::write_u32(&mut buf[4..8], self.ir_freecount);
        }
        BigEndian::write_u64(&mut buf[8..16], self.ir_free);
        buf
    }
}
