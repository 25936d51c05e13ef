use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;
use serde_json::{json, Value};

use crate::checksum::verify_cksum;
use crate::constants::*;
use crate::error::{Location, Result, XfsError};
use crate::superblock::Geometry;

pub const AGI_SIZE: usize = 0x158;
pub const AGI_CRC_OFFSET: usize = 0x138;

/// AG inode header, sector 2 of every AG.
#[derive(Debug, Clone, Serialize)]
pub struct Agi {
    pub agi_magicnum: u32,
    pub agi_versionnum: u32,
    pub agi_seqno: u32,
    pub agi_length: u32,
    /// Allocated inodes in this AG.
    pub agi_count: u32,
    pub agi_root: u32,
    pub agi_level: u32,
    pub agi_freecount: u32,
    pub agi_newino: u32,
    pub agi_dirino: u32,
    /// Heads of the unlinked-but-still-referenced inode lists.
    pub agi_unlinked: Vec<u32>,
    pub agi_uuid: [u8; 16],
    pub agi_crc: u32,
    pub agi_pad32: u32,
    pub agi_lsn: u64,
    pub agi_free_root: u32,
    pub agi_free_level: u32,
    pub agi_iblocks: u32,
    pub agi_fblocks: u32,
}

impl Agi {
    pub fn from_bytes(data: &[u8], agno: u32, geometry: &Geometry) -> Result<Self> {
        let at = Location::header(agno, Structure::Agi);
        if data.len() < AGI_SIZE {
            return Err(XfsError::corrupt(
                at,
                format!("{} bytes is too short for an AGI", data.len()),
            ));
        }
        let be_u32 = |offset: usize| -> u32 { BigEndian::read_u32(&data[offset..offset + 4]) };

        check_magic(at, be_u32(0x00), geometry.has_crc)?;
        if geometry.has_crc {
            verify_cksum(data, AGI_CRC_OFFSET, at)?;
        }

        let agi_unlinked = (0..XFS_AGI_UNLINKED_BUCKETS)
            .map(|i| be_u32(0x28 + i * 4))
            .collect();
        let mut agi_uuid = [0u8; 16];
        agi_uuid.copy_from_slice(&data[0x128..0x138]);

        let agi = Agi {
            agi_magicnum: be_u32(0x00),
            agi_versionnum: be_u32(0x04),
            agi_seqno: be_u32(0x08),
            agi_length: be_u32(0x0C),
            agi_count: be_u32(0x10),
            agi_root: be_u32(0x14),
            agi_level: be_u32(0x18),
            agi_freecount: be_u32(0x1C),
            agi_newino: be_u32(0x20),
            agi_dirino: be_u32(0x24),
            agi_unlinked,
            agi_uuid,
            agi_crc: LittleEndian::read_u32(&data[0x138..0x13C]),
            agi_pad32: be_u32(0x13C),
            agi_lsn: BigEndian::read_u64(&data[0x140..0x148]),
            agi_free_root: be_u32(0x148),
            agi_free_level: be_u32(0x14C),
            agi_iblocks: be_u32(0x150),
            agi_fblocks: be_u32(0x154),
        };
        agi.validate(agno, geometry)?;
        Ok(agi)
    }

    fn validate(&self, agno: u32, geometry: &Geometry) -> Result<()> {
        let at = Location::header(agno, Structure::Agi);
        if self.agi_versionnum != XFS_AGI_VERSION {
            return Err(XfsError::unsupported(
                at,
                format!("AGI version {}", self.agi_versionnum),
            ));
        }
        if self.agi_seqno != agno {
            return Err(XfsError::corrupt(
                at,
                format!("sequence number {} does not match", self.agi_seqno),
            ));
        }
        if geometry.has_crc && self.agi_uuid != geometry.meta_uuid {
            return Err(XfsError::corrupt(at, "UUID does not match the filesystem"));
        }
        if self.agi_freecount > self.agi_count {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "{} free inodes out of {} allocated",
                    self.agi_freecount, self.agi_count
                ),
            ));
        }
        Ok(())
    }

    /// Non-empty unlinked buckets as `(bucket, AG inode number)`.
    pub fn unlinked_heads(&self) -> Vec<(usize, u32)> {
        self.agi_unlinked
            .iter()
            .enumerate()
            .filter(|(_, &agino)| agino != NULLAGINO)
            .map(|(bucket, &agino)| (bucket, agino))
            .collect()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "seqno": self.agi_seqno,
            "length": self.agi_length,
            "count": self.agi_count,
            "root": self.agi_root,
            "level": self.agi_level,
            "freecount": self.agi_freecount,
            "newino": self.agi_newino,
            "free_root": self.agi_free_root,
            "free_level": self.agi_free_level,
            "unlinked": self.unlinked_heads(),
            "lsn": self.agi_lsn,
        })
    }
}
