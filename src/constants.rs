/// Reference: https://mirrors.edge.kernel.org/pub/linux/utils/fs/xfs/docs/xfs_filesystem_structure.pdf
use std::fmt;

use crate::error::{Location, Result, XfsError};

pub const XFS_SB_MAGIC: u32 = 0x58465342; // XFSB
pub const XFS_AGF_MAGIC: u32 = 0x58414746; // XAGF
pub const XFS_AGI_MAGIC: u32 = 0x58414749; // XAGI
pub const XFS_AGFL_MAGIC: u32 = 0x5841464c; // XAFL
pub const XFS_ABTB_MAGIC: u32 = 0x41425442; // ABTB
pub const XFS_ABTB_CRC_MAGIC: u32 = 0x41423342; // AB3B
pub const XFS_ABTC_MAGIC: u32 = 0x41425443; // ABTC
pub const XFS_ABTC_CRC_MAGIC: u32 = 0x41423343; // AB3C
pub const XFS_IBT_MAGIC: u32 = 0x49414254; // IABT
pub const XFS_IBT_CRC_MAGIC: u32 = 0x49414233; // IAB3
pub const XFS_FIBT_MAGIC: u32 = 0x46494254; // FIBT
pub const XFS_FIBT_CRC_MAGIC: u32 = 0x46494233; // FIB3

/// Header sectors live at fixed sector offsets from the start of the AG.
pub const SECTOR_SIZE: u32 = 512;
pub const SB_SECTOR: u64 = 0;
pub const AGF_SECTOR: u64 = 1;
pub const AGI_SECTOR: u64 = 2;
pub const AGFL_SECTOR: u64 = 3;

/// Disk addresses (`blkno`) are counted in 512-byte basic blocks.
pub const BBSHIFT: u32 = 9;

pub const XFS_SB_VERSION_NUMBITS: u16 = 0x000f;
pub const XFS_SB_VERSION_4: u16 = 4;
pub const XFS_SB_VERSION_5: u16 = 5;
pub const XFS_AGF_VERSION: u32 = 1;
pub const XFS_AGI_VERSION: u32 = 1;

pub const XFS_SB_FEAT_RO_COMPAT_FINOBT: u32 = 1 << 0;
pub const XFS_SB_FEAT_INCOMPAT_SPINODES: u32 = 1 << 1;
pub const XFS_SB_FEAT_INCOMPAT_META_UUID: u32 = 1 << 2;

pub const XFS_INODES_PER_CHUNK: u32 = 64;
pub const XFS_AGI_UNLINKED_BUCKETS: usize = 64;
pub const NULLAGBLOCK: u32 = 0xffff_ffff;
pub const NULLAGINO: u32 = 0xffff_ffff;
pub const MAX_BTREE_LEVELS: u32 = 9;

/// An AG spans at least 64 blocks and at most 1 TiB.
pub const XFS_MIN_AG_BLOCKS: u32 = 64;
pub const XFS_MAX_AG_BYTES: u64 = 1 << 40;

/// Every structure this crate validates a magic number for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Structure {
    Superblock,
    Agf,
    Agi,
    Agfl,
    FreeByBlock,
    FreeBySize,
    Inode,
    FreeInode,
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Structure::Superblock => "superblock",
            Structure::Agf => "AGF",
            Structure::Agi => "AGI",
            Structure::Agfl => "AGFL",
            Structure::FreeByBlock => "free-space by-block btree",
            Structure::FreeBySize => "free-space by-size btree",
            Structure::Inode => "inode btree",
            Structure::FreeInode => "free-inode btree",
        };
        f.write_str(name)
    }
}

pub struct MagicEntry {
    pub structure: Structure,
    pub legacy: u32,
    pub crc: u32,
}

/// Header structures carry the same magic in both format revisions.
pub static MAGIC_TABLE: [MagicEntry; 8] = [
    MagicEntry {
        structure: Structure::Superblock,
        legacy: XFS_SB_MAGIC,
        crc: XFS_SB_MAGIC,
    },
    MagicEntry {
        structure: Structure::Agf,
        legacy: XFS_AGF_MAGIC,
        crc: XFS_AGF_MAGIC,
    },
    MagicEntry {
        structure: Structure::Agi,
        legacy: XFS_AGI_MAGIC,
        crc: XFS_AGI_MAGIC,
    },
    MagicEntry {
        structure: Structure::Agfl,
        legacy: XFS_AGFL_MAGIC,
        crc: XFS_AGFL_MAGIC,
    },
    MagicEntry {
        structure: Structure::FreeByBlock,
        legacy: XFS_ABTB_MAGIC,
        crc: XFS_ABTB_CRC_MAGIC,
    },
    MagicEntry {
        structure: Structure::FreeBySize,
        legacy: XFS_ABTC_MAGIC,
        crc: XFS_ABTC_CRC_MAGIC,
    },
    MagicEntry {
        structure: Structure::Inode,
        legacy: XFS_IBT_MAGIC,
        crc: XFS_IBT_CRC_MAGIC,
    },
    MagicEntry {
        structure: Structure::FreeInode,
        legacy: XFS_FIBT_MAGIC,
        crc: XFS_FIBT_CRC_MAGIC,
    },
];

/// The magic `structure` must carry in the given format revision.
pub fn expected_magic(structure: Structure, has_crc: bool) -> u32 {
    MAGIC_TABLE
        .iter()
        .find(|entry| entry.structure == structure)
        .map(|entry| if has_crc { entry.crc } else { entry.legacy })
        .unwrap_or(0)
}

/// Compare an observed magic against the table entry for `at.structure`.
pub fn check_magic(at: Location, found: u32, has_crc: bool) -> Result<()> {
    let expected = expected_magic(at.structure, has_crc);
    if found != expected {
        return Err(XfsError::InvalidMagic {
            at,
            found,
            expected,
        });
    }
    Ok(())
}
