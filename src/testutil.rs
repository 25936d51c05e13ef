//! Synthetic XFS images for tests: headers for every AG plus hand-placed tree blocks.
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Result as IoResult, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder};

use crate::allocbt::AllocRec;
use crate::btree::{BtreeShortBlock, PTR_SIZE, SBLOCK_CRC_OFFSET};
use crate::checksum::update_cksum;
use crate::constants::*;
use crate::inobt::InobtRec;
use crate::superblock::{Geometry, Superblock};

pub const TEST_UUID: [u8; 16] = [
    0x6b, 0x1e, 0x2a, 0x90, 0x33, 0x4c, 0x4f, 0x0d, 0x9a, 0x51, 0x07, 0xe2, 0xc4, 0x18, 0x7d, 0x25,
];

pub struct AgfFields {
    pub version: u32,
    pub length: u32,
    pub bno_root: u32,
    pub bno_level: u32,
    pub cnt_root: u32,
    pub cnt_level: u32,
    pub flfirst: u32,
    pub fllast: u32,
    pub flcount: u32,
    pub freeblks: u32,
    pub longest: u32,
    pub btreeblks: u32,
}

pub struct AgiFields {
    pub version: u32,
    pub length: u32,
    pub count: u32,
    pub root: u32,
    pub level: u32,
    pub freecount: u32,
    pub newino: u32,
    pub dirino: u32,
    pub unlinked: [u32; XFS_AGI_UNLINKED_BUCKETS],
    pub free_root: u32,
    pub free_level: u32,
}

pub enum Payload {
    Inodes(Vec<InobtRec>),
    Extents(Vec<AllocRec>),
    InodeKeys(Vec<(u32, u32)>),
    ExtentKeys(Vec<((u32, u32), u32)>),
}

pub struct TreeBlock {
    pub level: u16,
    pub leftsib: u32,
    pub rightsib: u32,
    pub payload: Payload,
}

impl TreeBlock {
    fn new(level: u16, payload: Payload) -> Self {
        TreeBlock {
            level,
            leftsib: NULLAGBLOCK,
            rightsib: NULLAGBLOCK,
            payload,
        }
    }

    pub fn inode_leaf(records: Vec<InobtRec>) -> Self {
        Self::new(0, Payload::Inodes(records))
    }

    pub fn extent_leaf(records: Vec<AllocRec>) -> Self {
        Self::new(0, Payload::Extents(records))
    }

    /// Interior block of an inode tree: `(start inode key, child block)`.
    pub fn interior(level: u16, entries: Vec<(u32, u32)>) -> Self {
        Self::new(level, Payload::InodeKeys(entries))
    }

    /// Interior block of a free-space tree: `((startblock, blockcount), child block)`.
    pub fn extent_interior(level: u16, entries: Vec<((u32, u32), u32)>) -> Self {
        Self::new(level, Payload::ExtentKeys(entries))
    }

    pub fn siblings(mut self, left: Option<u32>, right: Option<u32>) -> Self {
        self.leftsib = left.unwrap_or(NULLAGBLOCK);
        self.rightsib = right.unwrap_or(NULLAGBLOCK);
        self
    }
}

pub struct ImageBuilder {
    pub crc: bool,
    pub sb_version: u16,
    pub sparse_inodes: bool,
    pub finobt: bool,
    pub block_size: u32,
    pub ag_blocks: u32,
    pub ag_count: u32,
    pub lsn: u64,
    pub agf: AgfFields,
    pub agi: AgiFields,
    /// `(slot, block)` entries written into every AGFL.
    pub agfl_blocks: Vec<(u32, u32)>,
    blocks: BTreeMap<(u32, u32), (Structure, TreeBlock)>,
    corruptions: Vec<(u32, u32, usize)>,
}

impl ImageBuilder {
    /// Checksummed revision with a free-inode tree, 1 KiB blocks, two 64-block AGs.
    pub fn v5() -> Self {
        let ag_blocks = 64;
        ImageBuilder {
            crc: true,
            sb_version: XFS_SB_VERSION_5,
            sparse_inodes: false,
            finobt: true,
            block_size: 1024,
            ag_blocks,
            ag_count: 2,
            lsn: 0x0000_0001_0000_0200,
            agf: AgfFields {
                version: XFS_AGF_VERSION,
                length: ag_blocks,
                bno_root: 2,
                bno_level: 1,
                cnt_root: 3,
                cnt_level: 1,
                flfirst: 0,
                fllast: 0,
                flcount: 0,
                freeblks: 0,
                longest: 0,
                btreeblks: 0,
            },
            agi: AgiFields {
                version: XFS_AGI_VERSION,
                length: ag_blocks,
                count: 0,
                root: 7,
                level: 1,
                freecount: 0,
                newino: NULLAGINO,
                dirino: NULLAGINO,
                unlinked: [NULLAGINO; XFS_AGI_UNLINKED_BUCKETS],
                free_root: 8,
                free_level: 1,
            },
            agfl_blocks: Vec::new(),
            blocks: BTreeMap::new(),
            corruptions: Vec::new(),
        }
    }

    /// Legacy revision: no checksums, no free-inode tree, headerless AGFL.
    pub fn v4() -> Self {
        let mut builder = Self::v5();
        builder.crc = false;
        builder.sb_version = XFS_SB_VERSION_4;
        builder.finobt = false;
        builder
    }

    pub fn geometry(&self) -> Geometry {
        Superblock::from_bytes(&self.superblock_sector(0), 0)
            .unwrap()
            .geometry()
    }

    pub fn place(&mut self, agno: u32, agbno: u32, structure: Structure, block: TreeBlock) {
        self.blocks.insert((agno, agbno), (structure, block));
    }

    pub fn set_inode_root(&mut self, agno: u32, block: TreeBlock) {
        let root = self.agi.root;
        self.place(agno, root, Structure::Inode, block);
    }

    pub fn set_free_inode_root(&mut self, agno: u32, block: TreeBlock) {
        let root = self.agi.free_root;
        self.place(agno, root, Structure::FreeInode, block);
    }

    pub fn set_by_size_root(&mut self, agno: u32, block: TreeBlock) {
        let root = self.agf.cnt_root;
        self.place(agno, root, Structure::FreeBySize, block);
    }

    /// Flip one byte of a block after its checksum has been computed.
    pub fn corrupt_byte(&mut self, agno: u32, agbno: u32, offset: usize) {
        self.corruptions.push((agno, agbno, offset));
    }

    fn sector(&self) -> Vec<u8> {
        vec![0u8; SECTOR_SIZE as usize]
    }

    pub fn superblock_sector(&self, _agno: u32) -> Vec<u8> {
        let mut buf = self.sector();
        BigEndian::write_u32(&mut buf[0x00..0x04], XFS_SB_MAGIC);
        BigEndian::write_u32(&mut buf[0x04..0x08], self.block_size);
        BigEndian::write_u64(
            &mut buf[0x08..0x10],
            self.ag_blocks as u64 * self.ag_count as u64,
        );
        buf[0x20..0x30].copy_from_slice(&TEST_UUID);
        BigEndian::write_u64(&mut buf[0x38..0x40], 128);
        BigEndian::write_u32(&mut buf[0x54..0x58], self.ag_blocks);
        BigEndian::write_u32(&mut buf[0x58..0x5C], self.ag_count);
        BigEndian::write_u16(&mut buf[0x64..0x66], self.sb_version);
        BigEndian::write_u16(&mut buf[0x66..0x68], SECTOR_SIZE as u16);
        BigEndian::write_u16(&mut buf[0x68..0x6A], 512);
        BigEndian::write_u16(&mut buf[0x6A..0x6C], (self.block_size / 512) as u16);
        buf[0x6C..0x74].copy_from_slice(b"evidence");
        buf[0x78] = self.block_size.trailing_zeros() as u8;
        buf[0x79] = 9;
        buf[0x7A] = 9;
        buf[0x7B] = (self.block_size / 512).trailing_zeros() as u8;
        buf[0x7C] = self.ag_blocks.next_power_of_two().trailing_zeros() as u8;
        if self.finobt {
            BigEndian::write_u32(&mut buf[0xD4..0xD8], XFS_SB_FEAT_RO_COMPAT_FINOBT);
        }
        if self.sparse_inodes {
            BigEndian::write_u32(&mut buf[0xD8..0xDC], XFS_SB_FEAT_INCOMPAT_SPINODES);
        }
        if self.crc {
            BigEndian::write_u64(&mut buf[0xF0..0xF8], self.lsn);
            update_cksum(&mut buf, 0xE0);
        }
        buf
    }

    pub fn agf_sector(&self, agno: u32) -> Vec<u8> {
        let mut buf = self.sector();
        let f = &self.agf;
        let words = [
            XFS_AGF_MAGIC,
            f.version,
            agno,
            f.length,
            f.bno_root,
            f.cnt_root,
            0,
            f.bno_level,
            f.cnt_level,
            0,
            f.flfirst,
            f.fllast,
            f.flcount,
            f.freeblks,
            f.longest,
            f.btreeblks,
        ];
        for (i, word) in words.iter().enumerate() {
            BigEndian::write_u32(&mut buf[i * 4..i * 4 + 4], *word);
        }
        if self.crc {
            buf[0x40..0x50].copy_from_slice(&TEST_UUID);
            BigEndian::write_u64(&mut buf[0xD0..0xD8], self.lsn);
            update_cksum(&mut buf, 0xD8);
        }
        buf
    }

    pub fn agi_sector(&self, agno: u32) -> Vec<u8> {
        let mut buf = self.sector();
        let f = &self.agi;
        let words = [
            XFS_AGI_MAGIC,
            f.version,
            agno,
            f.length,
            f.count,
            f.root,
            f.level,
            f.freecount,
            f.newino,
            f.dirino,
        ];
        for (i, word) in words.iter().enumerate() {
            BigEndian::write_u32(&mut buf[i * 4..i * 4 + 4], *word);
        }
        for (i, head) in f.unlinked.iter().enumerate() {
            BigEndian::write_u32(&mut buf[0x28 + i * 4..0x2C + i * 4], *head);
        }
        if self.crc {
            buf[0x128..0x138].copy_from_slice(&TEST_UUID);
            BigEndian::write_u64(&mut buf[0x140..0x148], self.lsn);
            BigEndian::write_u32(&mut buf[0x148..0x14C], f.free_root);
            BigEndian::write_u32(&mut buf[0x14C..0x150], f.free_level);
            update_cksum(&mut buf, 0x138);
        }
        buf
    }

    pub fn agfl_sector(&self, agno: u32) -> Vec<u8> {
        let mut buf = self.sector();
        let start = if self.crc { 0x24 } else { 0 };
        let slots = (buf.len() - start) / 4;
        for slot in 0..slots {
            BigEndian::write_u32(&mut buf[start + slot * 4..start + slot * 4 + 4], NULLAGBLOCK);
        }
        for (slot, block) in &self.agfl_blocks {
            let offset = start + *slot as usize * 4;
            BigEndian::write_u32(&mut buf[offset..offset + 4], *block);
        }
        if self.crc {
            BigEndian::write_u32(&mut buf[0x00..0x04], XFS_AGFL_MAGIC);
            BigEndian::write_u32(&mut buf[0x04..0x08], agno);
            buf[0x08..0x18].copy_from_slice(&TEST_UUID);
            BigEndian::write_u64(&mut buf[0x18..0x20], self.lsn);
            update_cksum(&mut buf, 0x20);
        }
        buf
    }

    /// Encode one tree block exactly as it would sit at `agbno` of AG `agno`.
    pub fn tree_block(
        &self,
        structure: Structure,
        agno: u32,
        agbno: u32,
        block: &TreeBlock,
    ) -> Vec<u8> {
        let block_size = self.block_size as usize;
        let mut buf = vec![0u8; block_size];
        let header_len = BtreeShortBlock::header_len(self.crc);

        let numrecs = match &block.payload {
            Payload::Inodes(records) => records.len(),
            Payload::Extents(records) => records.len(),
            Payload::InodeKeys(entries) => entries.len(),
            Payload::ExtentKeys(entries) => entries.len(),
        };
        BigEndian::write_u32(&mut buf[0x00..0x04], expected_magic(structure, self.crc));
        BigEndian::write_u16(&mut buf[0x04..0x06], block.level);
        BigEndian::write_u16(&mut buf[0x06..0x08], numrecs as u16);
        BigEndian::write_u32(&mut buf[0x08..0x0C], block.leftsib);
        BigEndian::write_u32(&mut buf[0x0C..0x10], block.rightsib);
        if self.crc {
            let daddr =
                (agno as u64 * self.ag_blocks as u64 + agbno as u64) * (block_size as u64 / 512);
            BigEndian::write_u64(&mut buf[0x10..0x18], daddr);
            BigEndian::write_u64(&mut buf[0x18..0x20], self.lsn);
            buf[0x20..0x30].copy_from_slice(&TEST_UUID);
            BigEndian::write_u32(&mut buf[0x30..0x34], agno);
        }

        match &block.payload {
            Payload::Inodes(records) => {
                for (i, record) in records.iter().enumerate() {
                    let offset = header_len + i * 16;
                    buf[offset..offset + 16].copy_from_slice(&record.to_bytes(self.sparse_inodes));
                }
            }
            Payload::Extents(records) => {
                for (i, record) in records.iter().enumerate() {
                    let offset = header_len + i * 8;
                    buf[offset..offset + 8].copy_from_slice(&record.to_bytes());
                }
            }
            Payload::InodeKeys(entries) => {
                let maxrecs = (block_size - header_len) / (4 + PTR_SIZE);
                let ptr_start = header_len + maxrecs * 4;
                for (i, (key, ptr)) in entries.iter().enumerate() {
                    let offset = header_len + i * 4;
                    BigEndian::write_u32(&mut buf[offset..offset + 4], *key);
                    let offset = ptr_start + i * PTR_SIZE;
                    BigEndian::write_u32(&mut buf[offset..offset + 4], *ptr);
                }
            }
            Payload::ExtentKeys(entries) => {
                let maxrecs = (block_size - header_len) / (8 + PTR_SIZE);
                let ptr_start = header_len + maxrecs * 8;
                for (i, ((start, count), ptr)) in entries.iter().enumerate() {
                    let offset = header_len + i * 8;
                    BigEndian::write_u32(&mut buf[offset..offset + 4], *start);
                    BigEndian::write_u32(&mut buf[offset + 4..offset + 8], *count);
                    let offset = ptr_start + i * PTR_SIZE;
                    BigEndian::write_u32(&mut buf[offset..offset + 4], *ptr);
                }
            }
        }

        if self.crc {
            update_cksum(&mut buf, SBLOCK_CRC_OFFSET);
        }
        buf
    }

    /// The full image: every AG's headers, an empty root leaf for every
    /// tree that was not placed by hand, then the placed blocks.
    pub fn build(&self) -> Vec<u8> {
        let block_size = self.block_size as usize;
        let ag_bytes = self.ag_blocks as usize * block_size;
        let mut image = vec![0u8; ag_bytes * self.ag_count as usize];

        for agno in 0..self.ag_count {
            let base = agno as usize * ag_bytes;
            let sectors = [
                self.superblock_sector(agno),
                self.agf_sector(agno),
                self.agi_sector(agno),
                self.agfl_sector(agno),
            ];
            for (i, sector) in sectors.iter().enumerate() {
                let offset = base + i * SECTOR_SIZE as usize;
                image[offset..offset + sector.len()].copy_from_slice(sector);
            }

            let mut roots = vec![
                (self.agf.bno_root, Structure::FreeByBlock),
                (self.agf.cnt_root, Structure::FreeBySize),
                (self.agi.root, Structure::Inode),
            ];
            if self.finobt {
                roots.push((self.agi.free_root, Structure::FreeInode));
            }
            for (root, structure) in roots {
                if self.blocks.contains_key(&(agno, root)) || root >= self.ag_blocks {
                    continue;
                }
                let payload = match structure {
                    Structure::FreeByBlock | Structure::FreeBySize => Payload::Extents(Vec::new()),
                    _ => Payload::Inodes(Vec::new()),
                };
                let data = self.tree_block(structure, agno, root, &TreeBlock::new(0, payload));
                let offset = base + root as usize * block_size;
                image[offset..offset + block_size].copy_from_slice(&data);
            }
        }

        for ((agno, agbno), (structure, block)) in &self.blocks {
            let data = self.tree_block(*structure, *agno, *agbno, block);
            let offset = *agno as usize * ag_bytes + *agbno as usize * block_size;
            image[offset..offset + block_size].copy_from_slice(&data);
        }

        for (agno, agbno, byte) in &self.corruptions {
            let offset = *agno as usize * ag_bytes + *agbno as usize * block_size + byte;
            image[offset] ^= 0xff;
        }
        image
    }

    pub fn body(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.build())
    }
}

/// Cursor that remembers the furthest byte any read reached.
pub struct TracingCursor {
    inner: Cursor<Vec<u8>>,
    highest: u64,
}

impl TracingCursor {
    pub fn new(image: Vec<u8>) -> Self {
        TracingCursor {
            inner: Cursor::new(image),
            highest: 0,
        }
    }

    pub fn highest_offset(&self) -> u64 {
        self.highest
    }
}

impl Read for TracingCursor {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let n = self.inner.read(buf)?;
        self.highest = self.highest.max(self.inner.position());
        Ok(n)
    }
}

impl Seek for TracingCursor {
    fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        self.inner.seek(pos)
    }
}
