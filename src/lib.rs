use std::io::{Read, Seek, SeekFrom};

pub mod ag;
pub mod agf;
pub mod agfl;
pub mod agi;
pub mod allocbt;
pub mod btree;
pub mod checksum;
pub mod constants;
pub mod error;
pub mod inobt;
pub mod superblock;
pub mod walk;

#[cfg(test)]
mod testutil;

pub use ag::{AgReader, AgTrees, AllocationGroup};
pub use allocbt::AllocRec;
pub use constants::Structure;
pub use error::{Location, Result, XfsError};
pub use inobt::InobtRec;
pub use superblock::{Geometry, Superblock};

use allocbt::{walk_free_space_by_block, walk_free_space_by_size};
use constants::SECTOR_SIZE;
use inobt::{walk_free_inode_btree, walk_inode_btree};
use log::{debug, info};

/// Struct representing an XFS filesystem image.
pub struct XfsFS<T: Read + Seek> {
    pub superblock: Superblock,
    geometry: Geometry,
    body: T,
}

impl<T: Read + Seek> XfsFS<T> {
    /// Create a new XfsFS instance given any type that implements `Read` and `Seek`.
    /// The primary superblock at byte 0 supplies the geometry for every AG.
    pub fn new(mut body: T) -> Result<Self> {
        let at = Location::header(0, Structure::Superblock);
        let mut buf = vec![0u8; SECTOR_SIZE as usize];
        body.seek(SeekFrom::Start(0))
            .map_err(|source| XfsError::Io { at, source })?;
        body.read_exact(&mut buf)
            .map_err(|source| XfsError::Io { at, source })?;

        let sector_size = Superblock::sector_size_hint(&buf);
        if sector_size != SECTOR_SIZE {
            debug!("Primary superblock sits in a {} byte sector", sector_size);
            buf.resize(sector_size as usize, 0);
            body.seek(SeekFrom::Start(0))
                .map_err(|source| XfsError::Io { at, source })?;
            body.read_exact(&mut buf)
                .map_err(|source| XfsError::Io { at, source })?;
        }

        let superblock = Superblock::from_bytes(&buf, 0)?;
        let geometry = superblock.geometry();
        info!(
            "XFS v{} '{}': {} AGs of {} blocks ({} bytes each)",
            superblock.version(),
            superblock.volume_name(),
            geometry.ag_count,
            geometry.ag_blocks,
            geometry.block_size
        );
        Ok(XfsFS {
            superblock,
            geometry,
            body,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn ag_count(&self) -> u32 {
        self.geometry.ag_count
    }

    /// Absolute inode number of inode `agino` of AG `agno`.
    pub fn inode_number(&self, agno: u32, agino: u32) -> Option<u64> {
        self.geometry.agino_to_ino(agno, agino)
    }

    pub fn ag_reader(&mut self, agno: u32) -> Result<AgReader<'_, T>> {
        AgReader::new(&mut self.body, agno, self.geometry)
    }

    /// Decode and validate the headers of AG `agno`.
    pub fn load_ag(&mut self, agno: u32) -> Result<AllocationGroup> {
        if agno >= self.geometry.ag_count {
            return Err(XfsError::unsupported(
                Location::header(agno, Structure::Superblock),
                format!("filesystem has only {} AGs", self.geometry.ag_count),
            ));
        }
        let mut reader = self.ag_reader(agno)?;
        AllocationGroup::decode(&mut reader)
    }

    pub fn inode_records(&mut self, ag: &AllocationGroup) -> Result<Vec<InobtRec>> {
        let mut reader = self.ag_reader(ag.agno)?;
        walk_inode_btree(&mut reader, &ag.agi)
    }

    pub fn free_inode_records(&mut self, ag: &AllocationGroup) -> Result<Vec<InobtRec>> {
        let mut reader = self.ag_reader(ag.agno)?;
        walk_free_inode_btree(&mut reader, &ag.agi)
    }

    pub fn free_extents_by_block(&mut self, ag: &AllocationGroup) -> Result<Vec<AllocRec>> {
        let mut reader = self.ag_reader(ag.agno)?;
        walk_free_space_by_block(&mut reader, &ag.agf)
    }

    pub fn free_extents_by_size(&mut self, ag: &AllocationGroup) -> Result<Vec<AllocRec>> {
        let mut reader = self.ag_reader(ag.agno)?;
        walk_free_space_by_size(&mut reader, &ag.agf)
    }

    /// Walk the four trees of an already decoded AG.
    pub fn load_ag_trees(&mut self, ag: &AllocationGroup) -> Result<AgTrees> {
        let mut reader = self.ag_reader(ag.agno)?;
        ag.walk_trees(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ImageBuilder, TreeBlock};

    #[test]
    fn opens_and_loads_every_ag() {
        let builder = ImageBuilder::v5();
        let mut fs = XfsFS::new(builder.body()).unwrap();
        assert_eq!(fs.ag_count(), 2);
        assert_eq!(fs.superblock.volume_name(), "evidence");
        for agno in 0..fs.ag_count() {
            let ag = fs.load_ag(agno).unwrap();
            assert_eq!(ag.agf.agf_seqno, agno);
            let trees = fs.load_ag_trees(&ag).unwrap();
            assert!(trees.inodes.is_empty());
            assert!(trees.free_by_size.is_empty());
        }
    }

    #[test]
    fn ag_past_the_end_is_rejected() {
        let mut fs = XfsFS::new(ImageBuilder::v4().body()).unwrap();
        assert!(matches!(fs.load_ag(2), Err(XfsError::Unsupported { .. })));
    }

    #[test]
    fn not_xfs_is_rejected() {
        let body = std::io::Cursor::new(vec![0u8; 4096]);
        assert!(matches!(
            XfsFS::new(body),
            Err(XfsError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn inode_numbers_include_the_ag() {
        let mut builder = ImageBuilder::v5();
        builder.agi.count = 64;
        builder.set_inode_root(1, TreeBlock::inode_leaf(vec![InobtRec::full(64, 0)]));
        let mut fs = XfsFS::new(builder.body()).unwrap();
        let ag = fs.load_ag(1).unwrap();
        let records = fs.inode_records(&ag).unwrap();
        // 64 blocks per AG and two inodes per block.
        assert_eq!(fs.inode_number(1, records[0].ir_startino), Some((1 << 7) | 64));
    }
}
