use std::io::{Read, Seek, SeekFrom};

use log::{debug, info};
use serde::Serialize;
use serde_json::{json, Value};

use crate::agf::Agf;
use crate::agfl::Agfl;
use crate::agi::Agi;
use crate::allocbt::{walk_free_space_by_block, walk_free_space_by_size, AllocRec};
use crate::constants::*;
use crate::error::{Location, Result, XfsError};
use crate::inobt::{walk_free_inode_btree, walk_inode_btree, InobtRec};
use crate::superblock::{Geometry, Superblock};

/// A view of the body scoped to one allocation group.
///
/// Reads are positioned explicitly, so several readers may take turns on
/// the same body; concurrent use needs independent bodies.
pub struct AgReader<'a, T: Read + Seek> {
    body: &'a mut T,
    base: u64,
    agno: u32,
    geometry: Geometry,
}

impl<'a, T: Read + Seek> AgReader<'a, T> {
    pub fn new(body: &'a mut T, agno: u32, geometry: Geometry) -> Result<Self> {
        let base = geometry.ag_byte_offset(agno).ok_or_else(|| {
            XfsError::corrupt(
                Location::header(agno, Structure::Superblock),
                "AG offset overflows",
            )
        })?;
        Ok(Self::with_base(body, base, agno, geometry))
    }

    /// Reader for an AG whose first sector sits at byte `base` of `body`.
    pub fn with_base(body: &'a mut T, base: u64, agno: u32, geometry: Geometry) -> Self {
        AgReader {
            body,
            base,
            agno,
            geometry,
        }
    }

    pub fn agno(&self) -> u32 {
        self.agno
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn read_at(&mut self, offset: u64, len: usize, at: Location) -> Result<Vec<u8>> {
        let position = self
            .base
            .checked_add(offset)
            .ok_or_else(|| XfsError::corrupt(at, "read position overflows"))?;
        let mut buf = vec![0u8; len];
        self.body
            .seek(SeekFrom::Start(position))
            .map_err(|source| XfsError::Io { at, source })?;
        self.body
            .read_exact(&mut buf)
            .map_err(|source| XfsError::Io { at, source })?;
        Ok(buf)
    }

    /// One header sector of this AG.
    pub fn read_sector(&mut self, sector: u64, structure: Structure) -> Result<Vec<u8>> {
        let size = self.geometry.sector_size;
        let at = Location::header(self.agno, structure);
        self.read_at(sector * size as u64, size as usize, at)
    }

    /// One filesystem block, addressed relative to the start of this AG.
    pub fn read_block(&mut self, agbno: u32, structure: Structure) -> Result<Vec<u8>> {
        let size = self.geometry.block_size;
        let at = Location::block(self.agno, structure, agbno);
        self.read_at(agbno as u64 * size as u64, size as usize, at)
    }
}

/// The four header structures of one AG, validated.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationGroup {
    pub agno: u32,
    pub superblock: Superblock,
    pub agf: Agf,
    pub agi: Agi,
    pub agfl: Agfl,
}

/// Leaf records of the four per-AG trees, each in key order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgTrees {
    pub free_by_block: Vec<AllocRec>,
    pub free_by_size: Vec<AllocRec>,
    pub inodes: Vec<InobtRec>,
    pub free_inodes: Vec<InobtRec>,
}

impl AllocationGroup {
    /// Decode sectors 0 to 3 in order. The first failure ends the decode;
    /// nothing after it is read.
    pub fn decode<T: Read + Seek>(reader: &mut AgReader<'_, T>) -> Result<Self> {
        let agno = reader.agno();
        let geometry = *reader.geometry();
        debug!("AG {}: decoding headers", agno);

        let buf = reader.read_sector(SB_SECTOR, Structure::Superblock)?;
        let superblock = Superblock::from_bytes(&buf, agno)?;
        let at = Location::header(agno, Structure::Superblock);
        if superblock.has_crc() != geometry.has_crc {
            return Err(XfsError::corrupt(
                at,
                "format revision differs from the primary superblock",
            ));
        }
        if superblock.sb_blocksize != geometry.block_size
            || superblock.sb_agblocks != geometry.ag_blocks
        {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "geometry {}x{} differs from the primary superblock",
                    superblock.sb_agblocks, superblock.sb_blocksize
                ),
            ));
        }

        let buf = reader.read_sector(AGF_SECTOR, Structure::Agf)?;
        let agf = Agf::from_bytes(&buf, agno, &geometry)?;

        let buf = reader.read_sector(AGI_SECTOR, Structure::Agi)?;
        let agi = Agi::from_bytes(&buf, agno, &geometry)?;
        if agi.agi_length != agf.agf_length {
            return Err(XfsError::corrupt(
                Location::header(agno, Structure::Agi),
                format!(
                    "AG length {} disagrees with AGF length {}",
                    agi.agi_length, agf.agf_length
                ),
            ));
        }

        let buf = reader.read_sector(AGFL_SECTOR, Structure::Agfl)?;
        let agfl = Agfl::from_bytes(&buf, agno, &geometry)?;

        info!(
            "AG {}: {} blocks, {} free, {} inodes ({} free)",
            agno, agf.agf_length, agf.agf_freeblks, agi.agi_count, agi.agi_freecount
        );
        Ok(AllocationGroup {
            agno,
            superblock,
            agf,
            agi,
            agfl,
        })
    }

    /// Blocks currently held on the free list.
    pub fn free_list(&self) -> Vec<u32> {
        self.agfl.active_blocks(&self.agf)
    }

    /// Walk all four trees. Any failure abandons the whole AG.
    pub fn walk_trees<T: Read + Seek>(&self, reader: &mut AgReader<'_, T>) -> Result<AgTrees> {
        Ok(AgTrees {
            free_by_block: walk_free_space_by_block(reader, &self.agf)?,
            free_by_size: walk_free_space_by_size(reader, &self.agf)?,
            inodes: walk_inode_btree(reader, &self.agi)?,
            free_inodes: walk_free_inode_btree(reader, &self.agi)?,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "agno": self.agno,
            "agf": self.agf.to_json(),
            "agi": self.agi.to_json(),
            "agfl": self.agfl.to_json(&self.agf),
        })
    }
}
