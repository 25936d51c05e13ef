use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;
use serde_json::{json, Value};

use crate::agf::Agf;
use crate::checksum::verify_cksum;
use crate::constants::*;
use crate::error::{Location, Result, XfsError};
use crate::superblock::Geometry;

pub const AGFL_HEADER_SIZE: usize = 0x24;
pub const AGFL_CRC_OFFSET: usize = 0x20;

/// Number of block slots in the AGFL ring.
pub fn agfl_size(geometry: &Geometry) -> u32 {
    if geometry.has_crc {
        (geometry.sector_size - AGFL_HEADER_SIZE as u32) / 4
    } else {
        geometry.sector_size / 4
    }
}

/// AG free list, sector 3 of every AG. Blocks reserved for refilling the
/// free-space trees; kept as decoded, never interpreted here.
///
/// Legacy (version 4) filesystems store a bare pointer array with no header,
/// so the header fields stay zero there.
#[derive(Debug, Clone, Serialize)]
pub struct Agfl {
    pub agfl_magicnum: u32,
    pub agfl_seqno: u32,
    pub agfl_uuid: [u8; 16],
    pub agfl_lsn: u64,
    pub agfl_crc: u32,
    pub agfl_bno: Vec<u32>,
}

impl Agfl {
    /// Decode the AGFL sector of AG `agno`.
    ///
    /// Only the checksummed format carries a header, so the magic, CRC,
    /// sequence number and UUID are checked there alone. A legacy AGFL is a
    /// bare pointer array and a damaged first word cannot be told apart from
    /// a block number.
    pub fn from_bytes(data: &[u8], agno: u32, geometry: &Geometry) -> Result<Self> {
        let at = Location::header(agno, Structure::Agfl);
        let slots = agfl_size(geometry) as usize;
        let start = if geometry.has_crc { AGFL_HEADER_SIZE } else { 0 };
        if data.len() < start + slots * 4 {
            return Err(XfsError::corrupt(
                at,
                format!("{} bytes is too short for an AGFL", data.len()),
            ));
        }
        let be_u32 = |offset: usize| -> u32 { BigEndian::read_u32(&data[offset..offset + 4]) };
        let agfl_bno = (0..slots).map(|i| be_u32(start + i * 4)).collect();

        if !geometry.has_crc {
            return Ok(Agfl {
                agfl_magicnum: 0,
                agfl_seqno: 0,
                agfl_uuid: [0u8; 16],
                agfl_lsn: 0,
                agfl_crc: 0,
                agfl_bno,
            });
        }

        check_magic(at, be_u32(0x00), true)?;
        verify_cksum(data, AGFL_CRC_OFFSET, at)?;

        let mut agfl_uuid = [0u8; 16];
        agfl_uuid.copy_from_slice(&data[0x08..0x18]);
        let agfl = Agfl {
            agfl_magicnum: be_u32(0x00),
            agfl_seqno: be_u32(0x04),
            agfl_uuid,
            agfl_lsn: BigEndian::read_u64(&data[0x18..0x20]),
            agfl_crc: LittleEndian::read_u32(&data[0x20..0x24]),
            agfl_bno,
        };
        if agfl.agfl_seqno != agno {
            return Err(XfsError::corrupt(
                at,
                format!("sequence number {} does not match", agfl.agfl_seqno),
            ));
        }
        if agfl.agfl_uuid != geometry.meta_uuid {
            return Err(XfsError::corrupt(at, "UUID does not match the filesystem"));
        }
        Ok(agfl)
    }

    /// The `flcount` live entries of the ring, starting at `flfirst` and wrapping.
    pub fn active_blocks(&self, agf: &Agf) -> Vec<u32> {
        if self.agfl_bno.is_empty() {
            return Vec::new();
        }
        let size = self.agfl_bno.len();
        (0..agf.agf_flcount as usize)
            .map(|i| self.agfl_bno[(agf.agf_flfirst as usize + i) % size])
            .collect()
    }

    pub fn to_json(&self, agf: &Agf) -> Value {
        json!({
            "seqno": self.agfl_seqno,
            "slots": self.agfl_bno.len(),
            "active": self.active_blocks(agf),
            "lsn": self.agfl_lsn,
        })
    }
}
