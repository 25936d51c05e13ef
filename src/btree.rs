//! Short-form B+tree blocks shared by the free-space, inode and free-inode trees.
//!
//! All four tree kinds use the same block header; they differ only in magic
//! number, record layout and key layout. Each kind is a zero-sized type
//! implementing [`BtreeKind`].
use std::fmt::Debug;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

use crate::checksum::verify_cksum;
use crate::constants::*;
use crate::error::{Location, Result, XfsError};
use crate::superblock::Geometry;

/// Legacy header: magic, level, numrecs, leftsib, rightsib.
pub const SBLOCK_LEN: usize = 16;
/// Checksummed header adds blkno, lsn, uuid, owner and crc.
pub const SBLOCK_CRC_LEN: usize = 56;
pub const SBLOCK_CRC_OFFSET: usize = 0x34;
/// Child pointers are AG block numbers.
pub const PTR_SIZE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BtreeShortBlock {
    pub bb_magic: u32,
    /// 0 for leaves.
    pub bb_level: u16,
    pub bb_numrecs: u16,
    pub bb_leftsib: u32,
    pub bb_rightsib: u32,
    /// Disk address of this block in 512-byte units.
    pub bb_blkno: u64,
    pub bb_lsn: u64,
    pub bb_uuid: [u8; 16],
    /// Owning AG.
    pub bb_owner: u32,
    pub bb_crc: u32,
}

impl BtreeShortBlock {
    pub fn header_len(has_crc: bool) -> usize {
        if has_crc {
            SBLOCK_CRC_LEN
        } else {
            SBLOCK_LEN
        }
    }

    fn from_bytes(data: &[u8], has_crc: bool) -> Self {
        let be_u32 = |offset: usize| -> u32 { BigEndian::read_u32(&data[offset..offset + 4]) };
        let be_u16 = |offset: usize| -> u16 { BigEndian::read_u16(&data[offset..offset + 2]) };
        let mut header = BtreeShortBlock {
            bb_magic: be_u32(0x00),
            bb_level: be_u16(0x04),
            bb_numrecs: be_u16(0x06),
            bb_leftsib: be_u32(0x08),
            bb_rightsib: be_u32(0x0C),
            bb_blkno: 0,
            bb_lsn: 0,
            bb_uuid: [0u8; 16],
            bb_owner: 0,
            bb_crc: 0,
        };
        if has_crc {
            header.bb_blkno = BigEndian::read_u64(&data[0x10..0x18]);
            header.bb_lsn = BigEndian::read_u64(&data[0x18..0x20]);
            header.bb_uuid.copy_from_slice(&data[0x20..0x30]);
            header.bb_owner = be_u32(0x30);
            header.bb_crc = LittleEndian::read_u32(&data[0x34..0x38]);
        }
        header
    }

    pub fn is_leaf(&self) -> bool {
        self.bb_level == 0
    }
}

/// What distinguishes one short-form tree from another.
pub trait BtreeKind: Debug {
    type Record: Clone + Debug + Serialize;
    /// Keys order both interior entries and leaf records.
    type Key: Ord + Copy + Debug;

    const STRUCTURE: Structure;
    const RECORD_SIZE: usize;
    const KEY_SIZE: usize;

    fn validate_magic(magic: u32, has_crc: bool) -> bool {
        magic == expected_magic(Self::STRUCTURE, has_crc)
    }

    fn record_width() -> usize {
        Self::RECORD_SIZE
    }

    fn decode_record(data: &[u8], geometry: &Geometry) -> Self::Record;

    fn decode_key(data: &[u8]) -> Self::Key;

    fn record_key(record: &Self::Record) -> Self::Key;
}

#[derive(Debug, Clone)]
pub enum BtreeNode<K: BtreeKind> {
    Leaf(Vec<K::Record>),
    /// `(key, child AG block)` pairs in on-disk order.
    Interior(Vec<(K::Key, u32)>),
}

#[derive(Debug, Clone)]
pub struct BtreeBlock<K: BtreeKind> {
    pub agbno: u32,
    pub header: BtreeShortBlock,
    pub node: BtreeNode<K>,
}

pub fn leaf_maxrecs<K: BtreeKind>(geometry: &Geometry) -> usize {
    (geometry.block_size as usize - BtreeShortBlock::header_len(geometry.has_crc)) / K::record_width()
}

pub fn node_maxrecs<K: BtreeKind>(geometry: &Geometry) -> usize {
    (geometry.block_size as usize - BtreeShortBlock::header_len(geometry.has_crc))
        / (K::KEY_SIZE + PTR_SIZE)
}

/// Decode and validate one tree block read from AG block `agbno`.
///
/// Magic first, then the checksum, then everything else. A block returned
/// from here has passed every check.
pub fn decode_block<K: BtreeKind>(
    data: &[u8],
    agno: u32,
    agbno: u32,
    geometry: &Geometry,
) -> Result<BtreeBlock<K>> {
    let at = Location::block(agno, K::STRUCTURE, agbno);
    if data.len() != geometry.block_size as usize {
        return Err(XfsError::corrupt(
            at,
            format!(
                "expected a {} byte block, got {} bytes",
                geometry.block_size,
                data.len()
            ),
        ));
    }

    let magic = BigEndian::read_u32(&data[0..4]);
    if !K::validate_magic(magic, geometry.has_crc) {
        return Err(XfsError::InvalidMagic {
            at,
            found: magic,
            expected: expected_magic(K::STRUCTURE, geometry.has_crc),
        });
    }
    if geometry.has_crc {
        verify_cksum(data, SBLOCK_CRC_OFFSET, at)?;
    }

    let header = BtreeShortBlock::from_bytes(data, geometry.has_crc);
    if geometry.has_crc {
        let daddr = geometry
            .agbno_to_daddr(agno, agbno)
            .ok_or_else(|| XfsError::corrupt(at, "block address overflows"))?;
        if header.bb_blkno != daddr {
            return Err(XfsError::corrupt(
                at,
                format!("block claims address {} instead of {}", header.bb_blkno, daddr),
            ));
        }
        if header.bb_owner != agno {
            return Err(XfsError::corrupt(
                at,
                format!("block owned by AG {}", header.bb_owner),
            ));
        }
        if header.bb_uuid != geometry.meta_uuid {
            return Err(XfsError::corrupt(at, "UUID does not match the filesystem"));
        }
    }

    let numrecs = header.bb_numrecs as usize;
    let start = BtreeShortBlock::header_len(geometry.has_crc);

    let node = if header.is_leaf() {
        let maxrecs = leaf_maxrecs::<K>(geometry);
        if numrecs > maxrecs {
            return Err(XfsError::corrupt(
                at,
                format!("{} records in a leaf holding at most {}", numrecs, maxrecs),
            ));
        }
        let width = K::record_width();
        let records = (0..numrecs)
            .map(|i| {
                let offset = start + i * width;
                K::decode_record(&data[offset..offset + width], geometry)
            })
            .collect();
        BtreeNode::Leaf(records)
    } else {
        let maxrecs = node_maxrecs::<K>(geometry);
        if numrecs == 0 || numrecs > maxrecs {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "{} entries in an interior block holding 1..={}",
                    numrecs, maxrecs
                ),
            ));
        }
        // Keys and pointers are two separate arrays; pointers start after
        // room for `maxrecs` keys.
        let ptr_start = start + maxrecs * K::KEY_SIZE;
        let mut entries: Vec<(K::Key, u32)> = Vec::with_capacity(numrecs);
        for i in 0..numrecs {
            let key_offset = start + i * K::KEY_SIZE;
            let ptr_offset = ptr_start + i * PTR_SIZE;
            let key = K::decode_key(&data[key_offset..key_offset + K::KEY_SIZE]);
            let ptr = BigEndian::read_u32(&data[ptr_offset..ptr_offset + PTR_SIZE]);
            if let Some((previous, _)) = entries.last() {
                if *previous >= key {
                    return Err(XfsError::corrupt(
                        at,
                        format!("keys out of order at entry {}", i),
                    ));
                }
            }
            entries.push((key, ptr));
        }
        BtreeNode::Interior(entries)
    };

    Ok(BtreeBlock {
        agbno,
        header,
        node,
    })
}
