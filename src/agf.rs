use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;
use serde_json::{json, Value};

use crate::agfl::agfl_size;
use crate::checksum::verify_cksum;
use crate::constants::*;
use crate::error::{Location, Result, XfsError};
use crate::superblock::Geometry;

pub const AGF_SIZE: usize = 0xE0;
pub const AGF_CRC_OFFSET: usize = 0xD8;

/// Index of each free-space tree in `agf_roots` / `agf_levels`.
pub const XFS_BTNUM_BNO: usize = 0;
pub const XFS_BTNUM_CNT: usize = 1;

/// AG free-space header, sector 1 of every AG.
#[derive(Debug, Clone, Serialize)]
pub struct Agf {
    pub agf_magicnum: u32,
    pub agf_versionnum: u32,
    pub agf_seqno: u32,
    /// AG size in blocks.
    pub agf_length: u32,
    pub agf_roots: [u32; 3],
    pub agf_levels: [u32; 3],
    pub agf_flfirst: u32,
    pub agf_fllast: u32,
    pub agf_flcount: u32,
    pub agf_freeblks: u32,
    pub agf_longest: u32,
    pub agf_btreeblks: u32,
    pub agf_uuid: [u8; 16],
    pub agf_rmap_blocks: u32,
    pub agf_refcount_blocks: u32,
    pub agf_refcount_root: u32,
    pub agf_refcount_level: u32,
    /// Reserved space, kept verbatim.
    pub agf_spare64: Vec<u8>,
    pub agf_lsn: u64,
    pub agf_crc: u32,
    pub agf_spare2: u32,
}

impl Agf {
    /// Parses the AGF of AG `agno` from one sector.
    pub fn from_bytes(data: &[u8], agno: u32, geometry: &Geometry) -> Result<Self> {
        let at = Location::header(agno, Structure::Agf);
        if data.len() < AGF_SIZE {
            return Err(XfsError::corrupt(
                at,
                format!("{} bytes is too short for an AGF", data.len()),
            ));
        }
        let be_u32 = |offset: usize| -> u32 { BigEndian::read_u32(&data[offset..offset + 4]) };

        check_magic(at, be_u32(0x00), geometry.has_crc)?;
        if geometry.has_crc {
            verify_cksum(data, AGF_CRC_OFFSET, at)?;
        }

        let mut agf_uuid = [0u8; 16];
        agf_uuid.copy_from_slice(&data[0x40..0x50]);

        let agf = Agf {
            agf_magicnum: be_u32(0x00),
            agf_versionnum: be_u32(0x04),
            agf_seqno: be_u32(0x08),
            agf_length: be_u32(0x0C),
            agf_roots: [be_u32(0x10), be_u32(0x14), be_u32(0x18)],
            agf_levels: [be_u32(0x1C), be_u32(0x20), be_u32(0x24)],
            agf_flfirst: be_u32(0x28),
            agf_fllast: be_u32(0x2C),
            agf_flcount: be_u32(0x30),
            agf_freeblks: be_u32(0x34),
            agf_longest: be_u32(0x38),
            agf_btreeblks: be_u32(0x3C),
            agf_uuid,
            agf_rmap_blocks: be_u32(0x50),
            agf_refcount_blocks: be_u32(0x54),
            agf_refcount_root: be_u32(0x58),
            agf_refcount_level: be_u32(0x5C),
            agf_spare64: data[0x60..0xD0].to_vec(),
            agf_lsn: BigEndian::read_u64(&data[0xD0..0xD8]),
            agf_crc: LittleEndian::read_u32(&data[0xD8..0xDC]),
            agf_spare2: be_u32(0xDC),
        };
        agf.validate(agno, geometry)?;
        Ok(agf)
    }

    fn validate(&self, agno: u32, geometry: &Geometry) -> Result<()> {
        let at = Location::header(agno, Structure::Agf);
        if self.agf_versionnum != XFS_AGF_VERSION {
            return Err(XfsError::unsupported(
                at,
                format!("AGF version {}", self.agf_versionnum),
            ));
        }
        if self.agf_seqno != agno {
            return Err(XfsError::corrupt(
                at,
                format!("sequence number {} does not match", self.agf_seqno),
            ));
        }
        if self.agf_length == 0 || self.agf_length > geometry.ag_blocks {
            return Err(XfsError::corrupt(
                at,
                format!("AG length {} out of range", self.agf_length),
            ));
        }
        if geometry.has_crc && self.agf_uuid != geometry.meta_uuid {
            return Err(XfsError::corrupt(at, "UUID does not match the filesystem"));
        }
        let size = agfl_size(geometry);
        if self.agf_flfirst >= size || self.agf_fllast >= size || self.agf_flcount > size {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "free list window first={} last={} count={} exceeds {} slots",
                    self.agf_flfirst, self.agf_fllast, self.agf_flcount, size
                ),
            ));
        }
        Ok(())
    }

    pub fn bno_root(&self) -> u32 {
        self.agf_roots[XFS_BTNUM_BNO]
    }

    pub fn bno_level(&self) -> u32 {
        self.agf_levels[XFS_BTNUM_BNO]
    }

    pub fn cnt_root(&self) -> u32 {
        self.agf_roots[XFS_BTNUM_CNT]
    }

    pub fn cnt_level(&self) -> u32 {
        self.agf_levels[XFS_BTNUM_CNT]
    }

    pub fn to_json(&self) -> Value {
        json!({
            "seqno": self.agf_seqno,
            "length": self.agf_length,
            "bno_root": self.bno_root(),
            "bno_level": self.bno_level(),
            "cnt_root": self.cnt_root(),
            "cnt_level": self.cnt_level(),
            "flfirst": self.agf_flfirst,
            "fllast": self.agf_fllast,
            "flcount": self.agf_flcount,
            "freeblks": self.agf_freeblks,
            "longest": self.agf_longest,
            "btreeblks": self.agf_btreeblks,
            "lsn": self.agf_lsn,
        })
    }
}
