/// Reference: https://mirrors.edge.kernel.org/pub/linux/utils/fs/xfs/docs/xfs_filesystem_structure.pdf (Superblocks)
use byteorder::{BigEndian, ByteOrder};
use log::debug;
use serde::Serialize;
use serde_json::{json, Value};

use crate::checksum::verify_cksum;
use crate::constants::*;
use crate::error::{Location, Result, XfsError};

/// Bytes covered by the on-disk superblock structure.
pub const SB_SIZE: usize = 0x108;
pub const SB_CRC_OFFSET: usize = 0xE0;

#[derive(Debug, Clone, Serialize)]
pub struct Superblock {
    pub sb_magicnum: u32,
    pub sb_blocksize: u32,
    pub sb_dblocks: u64,
    pub sb_rblocks: u64,
    pub sb_rextents: u64,
    pub sb_uuid: [u8; 16],
    pub sb_logstart: u64,
    pub sb_rootino: u64,
    pub sb_rbmino: u64,
    pub sb_rsumino: u64,
    pub sb_rextsize: u32,
    pub sb_agblocks: u32,
    pub sb_agcount: u32,
    pub sb_rbmblocks: u32,
    pub sb_logblocks: u32,
    pub sb_versionnum: u16,
    pub sb_sectsize: u16,
    pub sb_inodesize: u16,
    pub sb_inopblock: u16,
    pub sb_fname: [u8; 12],
    pub sb_blocklog: u8,
    pub sb_sectlog: u8,
    pub sb_inodelog: u8,
    pub sb_inopblog: u8,
    pub sb_agblklog: u8,
    pub sb_rextslog: u8,
    pub sb_inprogress: u8,
    pub sb_imax_pct: u8,
    pub sb_icount: u64,
    pub sb_ifree: u64,
    pub sb_fdblocks: u64,
    pub sb_frextents: u64,
    pub sb_uquotino: u64,
    pub sb_gquotino: u64,
    pub sb_qflags: u16,
    pub sb_flags: u8,
    pub sb_shared_vn: u8,
    pub sb_inoalignmt: u32,
    pub sb_unit: u32,
    pub sb_width: u32,
    pub sb_dirblklog: u8,
    pub sb_logsectlog: u8,
    pub sb_logsectsize: u16,
    pub sb_logsunit: u32,
    pub sb_features2: u32,
    pub sb_bad_features2: u32,
    pub sb_features_compat: u32,
    pub sb_features_ro_compat: u32,
    pub sb_features_incompat: u32,
    pub sb_features_log_incompat: u32,
    pub sb_crc: u32,
    pub sb_spino_align: u32,
    pub sb_pquotino: u64,
    pub sb_lsn: u64,
    pub sb_meta_uuid: [u8; 16],
}

/// AG geometry and format revision, taken from the primary superblock and
/// handed to every per-AG decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub block_size: u32,
    pub sector_size: u32,
    pub ag_blocks: u32,
    pub ag_count: u32,
    pub ag_block_log: u8,
    pub inodes_per_block_log: u8,
    pub has_crc: bool,
    pub has_sparse_inodes: bool,
    pub has_finobt: bool,
    /// UUID stamped into checksummed metadata blocks.
    pub meta_uuid: [u8; 16],
}

impl Geometry {
    /// Byte offset of the first sector of AG `agno`, relative to the start of
    /// the filesystem. `None` if it does not fit in 64 bits.
    pub fn ag_byte_offset(&self, agno: u32) -> Option<u64> {
        (agno as u64)
            .checked_mul(self.ag_blocks as u64)?
            .checked_mul(self.block_size as u64)
    }

    /// Disk address (in 512-byte units) of an AG block, as recorded in `bb_blkno`.
    pub fn agbno_to_daddr(&self, agno: u32, agbno: u32) -> Option<u64> {
        let fsb = (agno as u64)
            .checked_mul(self.ag_blocks as u64)?
            .checked_add(agbno as u64)?;
        fsb.checked_mul(self.block_size as u64 >> BBSHIFT)
    }

    /// Absolute inode number of an AG-relative inode number.
    pub fn agino_to_ino(&self, agno: u32, agino: u32) -> Option<u64> {
        let shift = self.ag_block_log as u32 + self.inodes_per_block_log as u32;
        if shift >= u64::BITS || (agno as u64).leading_zeros() < shift {
            return None;
        }
        Some(((agno as u64) << shift) | agino as u64)
    }

    /// First AG block past the four header sectors.
    pub fn first_tree_block(&self) -> u32 {
        (4 * self.sector_size).div_ceil(self.block_size)
    }
}

impl Superblock {
    /// Peek at the sector size recorded in a raw superblock, falling back to 512.
    pub fn sector_size_hint(data: &[u8]) -> u32 {
        if data.len() < SB_SIZE || BigEndian::read_u32(&data[0..4]) != XFS_SB_MAGIC {
            return SECTOR_SIZE;
        }
        let sectsize = BigEndian::read_u16(&data[0x66..0x68]) as u32;
        if sectsize.is_power_of_two() && (SECTOR_SIZE..=32768).contains(&sectsize) {
            sectsize
        } else {
            SECTOR_SIZE
        }
    }

    /// Decode one sector holding the primary superblock or an AG's copy of it.
    ///
    /// The magic is checked first; in the checksummed revision the CRC over the
    /// whole of `data` is verified before any other field is used.
    pub fn from_bytes(data: &[u8], agno: u32) -> Result<Self> {
        let at = Location::header(agno, Structure::Superblock);
        if data.len() < SB_SIZE {
            return Err(XfsError::corrupt(
                at,
                format!("{} bytes is too short for a superblock", data.len()),
            ));
        }
        let be_u16 = |offset: usize| -> u16 { BigEndian::read_u16(&data[offset..offset + 2]) };
        let be_u32 = |offset: usize| -> u32 { BigEndian::read_u32(&data[offset..offset + 4]) };
        let be_u64 = |offset: usize| -> u64 { BigEndian::read_u64(&data[offset..offset + 8]) };
        let uuid_at = |offset: usize| -> [u8; 16] {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&data[offset..offset + 16]);
            uuid
        };

        let sb_magicnum = be_u32(0x00);
        if sb_magicnum != XFS_SB_MAGIC {
            return Err(XfsError::InvalidMagic {
                at,
                found: sb_magicnum,
                expected: XFS_SB_MAGIC,
            });
        }

        let sb_versionnum = be_u16(0x64);
        let version = sb_versionnum & XFS_SB_VERSION_NUMBITS;
        if version != XFS_SB_VERSION_4 && version != XFS_SB_VERSION_5 {
            return Err(XfsError::unsupported(
                at,
                format!("superblock version {}", version),
            ));
        }
        if version == XFS_SB_VERSION_5 {
            verify_cksum(data, SB_CRC_OFFSET, at)?;
        }

        let mut sb_fname = [0u8; 12];
        sb_fname.copy_from_slice(&data[0x6C..0x78]);

        let sb = Self {
            sb_magicnum,
            sb_blocksize: be_u32(0x04),
            sb_dblocks: be_u64(0x08),
            sb_rblocks: be_u64(0x10),
            sb_rextents: be_u64(0x18),
            sb_uuid: uuid_at(0x20),
            sb_logstart: be_u64(0x30),
            sb_rootino: be_u64(0x38),
            sb_rbmino: be_u64(0x40),
            sb_rsumino: be_u64(0x48),
            sb_rextsize: be_u32(0x50),
            sb_agblocks: be_u32(0x54),
            sb_agcount: be_u32(0x58),
            sb_rbmblocks: be_u32(0x5C),
            sb_logblocks: be_u32(0x60),
            sb_versionnum,
            sb_sectsize: be_u16(0x66),
            sb_inodesize: be_u16(0x68),
            sb_inopblock: be_u16(0x6A),
            sb_fname,
            sb_blocklog: data[0x78],
            sb_sectlog: data[0x79],
            sb_inodelog: data[0x7A],
            sb_inopblog: data[0x7B],
            sb_agblklog: data[0x7C],
            sb_rextslog: data[0x7D],
            sb_inprogress: data[0x7E],
            sb_imax_pct: data[0x7F],
            sb_icount: be_u64(0x80),
            sb_ifree: be_u64(0x88),
            sb_fdblocks: be_u64(0x90),
            sb_frextents: be_u64(0x98),
            sb_uquotino: be_u64(0xA0),
            sb_gquotino: be_u64(0xA8),
            sb_qflags: be_u16(0xB0),
            sb_flags: data[0xB2],
            sb_shared_vn: data[0xB3],
            sb_inoalignmt: be_u32(0xB4),
            sb_unit: be_u32(0xB8),
            sb_width: be_u32(0xBC),
            sb_dirblklog: data[0xC0],
            sb_logsectlog: data[0xC1],
            sb_logsectsize: be_u16(0xC2),
            sb_logsunit: be_u32(0xC4),
            sb_features2: be_u32(0xC8),
            sb_bad_features2: be_u32(0xCC),
            sb_features_compat: be_u32(0xD0),
            sb_features_ro_compat: be_u32(0xD4),
            sb_features_incompat: be_u32(0xD8),
            sb_features_log_incompat: be_u32(0xDC),
            sb_crc: byteorder::LittleEndian::read_u32(&data[0xE0..0xE4]),
            sb_spino_align: be_u32(0xE4),
            sb_pquotino: be_u64(0xE8),
            sb_lsn: be_u64(0xF0),
            sb_meta_uuid: uuid_at(0xF8),
        };

        if !sb.sb_blocksize.is_power_of_two() || !(512..=65536).contains(&sb.sb_blocksize) {
            return Err(XfsError::corrupt(
                at,
                format!("block size {} out of range", sb.sb_blocksize),
            ));
        }
        if !(sb.sb_sectsize as u32).is_power_of_two() || (sb.sb_sectsize as u32) < SECTOR_SIZE {
            return Err(XfsError::corrupt(
                at,
                format!("sector size {} out of range", sb.sb_sectsize),
            ));
        }
        if sb.sb_agblocks < XFS_MIN_AG_BLOCKS
            || sb.sb_agblocks as u64 * sb.sb_blocksize as u64 > XFS_MAX_AG_BYTES
        {
            return Err(XfsError::corrupt(
                at,
                format!("AG size of {} blocks out of range", sb.sb_agblocks),
            ));
        }
        if sb.sb_agcount == 0 || sb.sb_dblocks.checked_mul(sb.sb_blocksize as u64).is_none() {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "{} AGs over {} blocks does not describe a filesystem",
                    sb.sb_agcount, sb.sb_dblocks
                ),
            ));
        }
        // Only the last AG may be short.
        let agblocks = sb.sb_agblocks as u64;
        let full = (sb.sb_agcount as u64 - 1) * agblocks;
        if sb.sb_dblocks <= full || sb.sb_dblocks > full + agblocks {
            return Err(XfsError::corrupt(
                at,
                format!(
                    "{} AGs of {} blocks disagree with {} data blocks",
                    sb.sb_agcount, sb.sb_agblocks, sb.sb_dblocks
                ),
            ));
        }
        if sb.sb_agblklog as u32 >= u32::BITS || (1u64 << sb.sb_agblklog) < agblocks {
            return Err(XfsError::corrupt(
                at,
                format!("AG block log {} too small", sb.sb_agblklog),
            ));
        }
        if sb.sb_inopblog > sb.sb_blocklog {
            return Err(XfsError::corrupt(
                at,
                format!("inodes-per-block log {} out of range", sb.sb_inopblog),
            ));
        }

        debug!(
            "AG {}: superblock v{} blocksize {} agblocks {} agcount {}",
            agno,
            sb.version(),
            sb.sb_blocksize,
            sb.sb_agblocks,
            sb.sb_agcount
        );
        Ok(sb)
    }

    pub fn version(&self) -> u16 {
        self.sb_versionnum & XFS_SB_VERSION_NUMBITS
    }

    /// Version 5 superblocks carry CRCs on every metadata block.
    pub fn has_crc(&self) -> bool {
        self.version() == XFS_SB_VERSION_5
    }

    pub fn has_sparse_inodes(&self) -> bool {
        self.has_crc() && self.sb_features_incompat & XFS_SB_FEAT_INCOMPAT_SPINODES != 0
    }

    pub fn has_finobt(&self) -> bool {
        self.has_crc() && self.sb_features_ro_compat & XFS_SB_FEAT_RO_COMPAT_FINOBT != 0
    }

    pub fn meta_uuid(&self) -> [u8; 16] {
        if self.has_crc() && self.sb_features_incompat & XFS_SB_FEAT_INCOMPAT_META_UUID != 0 {
            self.sb_meta_uuid
        } else {
            self.sb_uuid
        }
    }

    pub fn volume_name(&self) -> String {
        let end = self
            .sb_fname
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.sb_fname.len());
        String::from_utf8_lossy(&self.sb_fname[..end]).to_string()
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            block_size: self.sb_blocksize,
            sector_size: self.sb_sectsize as u32,
            ag_blocks: self.sb_agblocks,
            ag_count: self.sb_agcount,
            ag_block_log: self.sb_agblklog,
            inodes_per_block_log: self.sb_inopblog,
            has_crc: self.has_crc(),
            has_sparse_inodes: self.has_sparse_inodes(),
            has_finobt: self.has_finobt(),
            meta_uuid: self.meta_uuid(),
        }
    }

    pub fn print_sp_info(&self) {
        println!("{:#?}", self);
    }

    pub fn to_json(&self) -> Value {
        json!({
            "magic": format!("0x{:08x}", self.sb_magicnum),
            "version": self.version(),
            "block_size": self.sb_blocksize,
            "sector_size": self.sb_sectsize,
            "inode_size": self.sb_inodesize,
            "data_blocks": self.sb_dblocks,
            "ag_blocks": self.sb_agblocks,
            "ag_count": self.sb_agcount,
            "root_inode": self.sb_rootino,
            "inode_count": self.sb_icount,
            "free_inodes": self.sb_ifree,
            "free_data_blocks": self.sb_fdblocks,
            "volume_name": self.volume_name(),
            "features_compat": format!("0x{:08x}", self.sb_features_compat),
            "features_ro_compat": format!("0x{:08x}", self.sb_features_ro_compat),
            "features_incompat": format!("0x{:08x}", self.sb_features_incompat),
            "has_crc": self.has_crc(),
            "sparse_inodes": self.has_sparse_inodes(),
            "finobt": self.has_finobt(),
        })
    }
}
