//! Free-space B+trees: the same free extents indexed by start block and by length.
use std::io::{Read, Seek};

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use serde::Serialize;

use crate::ag::AgReader;
use crate::agf::Agf;
use crate::btree::BtreeKind;
use crate::constants::Structure;
use crate::error::Result;
use crate::superblock::Geometry;
use crate::walk::walk_btree;

/// `xfs_alloc_rec`: two 32-bit fields; keys share the layout.
pub const ALLOC_REC_SIZE: usize = 8;
pub const ALLOC_KEY_SIZE: usize = 8;

/// One free extent inside the AG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AllocRec {
    pub ar_startblock: u32,
    pub ar_blockcount: u32,
}

impl AllocRec {
    pub fn from_bytes(data: &[u8]) -> Self {
        AllocRec {
            ar_startblock: BigEndian::read_u32(&data[0..4]),
            ar_blockcount: BigEndian::read_u32(&data[4..8]),
        }
    }

    /// Last block of the extent, inclusive.
    pub fn end(&self) -> u64 {
        (self.ar_startblock as u64 + self.ar_blockcount as u64).saturating_sub(1)
    }
}

/// Free extents keyed by start block.
#[derive(Debug, Clone, Copy)]
pub struct FreeSpaceByBlock;

/// Free extents keyed by length, then start block.
#[derive(Debug, Clone, Copy)]
pub struct FreeSpaceBySize;

impl BtreeKind for FreeSpaceByBlock {
    type Record = AllocRec;
    type Key = (u32, u32);

    const STRUCTURE: Structure = Structure::FreeByBlock;
    const RECORD_SIZE: usize = ALLOC_REC_SIZE;
    const KEY_SIZE: usize = ALLOC_KEY_SIZE;

    fn decode_record(data: &[u8], _geometry: &Geometry) -> AllocRec {
        AllocRec::from_bytes(data)
    }

    fn decode_key(data: &[u8]) -> (u32, u32) {
        let key = AllocRec::from_bytes(data);
        (key.ar_startblock, key.ar_blockcount)
    }

    fn record_key(record: &AllocRec) -> (u32, u32) {
        (record.ar_startblock, record.ar_blockcount)
    }
}

impl BtreeKind for FreeSpaceBySize {
    type Record = AllocRec;
    type Key = (u32, u32);

    const STRUCTURE: Structure = Structure::FreeBySize;
    const RECORD_SIZE: usize = ALLOC_REC_SIZE;
    const KEY_SIZE: usize = ALLOC_KEY_SIZE;

    fn decode_record(data: &[u8], _geometry: &Geometry) -> AllocRec {
        AllocRec::from_bytes(data)
    }

    fn decode_key(data: &[u8]) -> (u32, u32) {
        let key = AllocRec::from_bytes(data);
        (key.ar_blockcount, key.ar_startblock)
    }

    fn record_key(record: &AllocRec) -> (u32, u32) {
        (record.ar_blockcount, record.ar_startblock)
    }
}

pub fn walk_free_space_by_block<T: Read + Seek>(
    reader: &mut AgReader<'_, T>,
    agf: &Agf,
) -> Result<Vec<AllocRec>> {
    let extents =
        walk_btree::<FreeSpaceByBlock, T>(reader, agf.bno_root(), agf.bno_level(), agf.agf_length)?;
    debug!(
        "AG {}: {} free extents, {} free blocks",
        reader.agno(),
        extents.len(),
        extents.iter().map(|e| e.ar_blockcount as u64).sum::<u64>()
    );
    Ok(extents)
}

pub fn walk_free_space_by_size<T: Read + Seek>(
    reader: &mut AgReader<'_, T>,
    agf: &Agf,
) -> Result<Vec<AllocRec>> {
    walk_btree::<FreeSpaceBySize, T>(reader, agf.cnt_root(), agf.cnt_level(), agf.agf_length)
}

#[cfg(test)]
impl AllocRec {
    pub fn new(startblock: u32, blockcount: u32) -> Self {
        AllocRec {
            ar_startblock: startblock,
            ar_blockcount: blockcount,
        }
    }

    pub fn to_bytes(&self) -> [u8; ALLOC_REC_SIZE] {
        let mut buf = [0u8; ALLOC_REC_SIZE];
        BigEndian::write_u32(&mut buf[0..4], self.ar_startblock);
        BigEndian::write_u32(&mut buf[4..8], self.ar_blockcount);
        buf
    }
}
