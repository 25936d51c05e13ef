use std::fmt;

use thiserror::Error;

use crate::constants::Structure;

/// Where in the image a failure was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// AG sequence number.
    pub agno: u32,
    pub structure: Structure,
    /// AG-relative block number, for tree blocks.
    pub block: Option<u32>,
}

impl Location {
    pub fn header(agno: u32, structure: Structure) -> Self {
        Self {
            agno,
            structure,
            block: None,
        }
    }

    pub fn block(agno: u32, structure: Structure, agbno: u32) -> Self {
        Self {
            agno,
            structure,
            block: Some(agbno),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AG {} {}", self.agno, self.structure)?;
        if let Some(agbno) = self.block {
            write!(f, " block {}", agbno)?;
        }
        Ok(())
    }
}

/// Every failure aborts the decode of the whole AG.
#[derive(Debug, Error)]
pub enum XfsError {
    /// Short, truncated or failed read from the body.
    #[error("{at}: read failed: {source}")]
    Io {
        at: Location,
        #[source]
        source: std::io::Error,
    },

    #[error("{at}: invalid magic 0x{found:08x} (expected 0x{expected:08x})")]
    InvalidMagic {
        at: Location,
        found: u32,
        expected: u32,
    },

    /// Checksum mismatch, count reconciliation failure, bad pointer.
    #[error("{at}: corrupt metadata: {detail}")]
    Corrupt { at: Location, detail: String },

    #[error("{at}: unsupported: {detail}")]
    Unsupported { at: Location, detail: String },
}

impl XfsError {
    pub fn corrupt(at: Location, detail: impl Into<String>) -> Self {
        XfsError::Corrupt {
            at,
            detail: detail.into(),
        }
    }

    pub fn unsupported(at: Location, detail: impl Into<String>) -> Self {
        XfsError::Unsupported {
            at,
            detail: detail.into(),
        }
    }

    pub fn location(&self) -> Location {
        match self {
            XfsError::Io { at, .. }
            | XfsError::InvalidMagic { at, .. }
            | XfsError::Corrupt { at, .. }
            | XfsError::Unsupported { at, .. } => *at,
        }
    }
}

pub type Result<T> = std::result::Result<T, XfsError>;
