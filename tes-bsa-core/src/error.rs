use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, BsaError>;

/// Coarse failure class, used by callers that decide between aborting the
/// whole archive and skipping a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad magic/version/truncated record. The archive is unusable.
    Format,
    /// Corrupt payload framing or size mismatch. Fatal for one entry,
    /// the rest of the archive may still be read.
    Integrity,
    /// Bad caller input or upstream I/O.
    Input,
    /// Broken internal invariant. Programming error, never retried.
    Invariant,
}

#[derive(Debug, thiserror::Error)]
pub enum BsaError {
    #[error("Upstream IO Error: {0}")]
    IO(#[from] std::io::Error),

    #[error("Invalid archive magic: expected {expected:X?}, found {found:X?}")]
    InvalidMagic { expected: [u8; 4], found: [u8; 4] },
    #[error("Unsupported archive version: 0x{found:X} (supported: 0x{supported:X})")]
    UnsupportedVersion { found: u32, supported: u32 },
    #[error("Truncated {section}: needed {needed} bytes at offset {offset}, {available} available")]
    TruncatedRecord {
        section: &'static str,
        offset: u64,
        needed: u64,
        available: u64,
    },
    #[error("File name table holds {found} names, header declares {expected} files")]
    InvalidNameTable { expected: u64, found: u64 },
    #[error("Invalid entry range: offset={offset}, size={size}, source_size={source_size}")]
    OffsetOutOfRange { offset: u64, size: u64, source_size: u64 },
    #[error("Archive exceeds the 2 GiB format limit ({size} bytes)")]
    ArchiveTooLarge { size: u64 },

    #[error("Corrupt compression header: 0x{value:04X} is not a multiple of 31")]
    CorruptHeader { value: u16 },
    #[error("Inflated size mismatch for `{name}`: expected {expected}, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
    #[error("Truncated entry `{name}`: needed {needed} bytes, {available} available")]
    TruncatedEntry {
        name: String,
        needed: u64,
        available: u64,
    },

    #[error("Invalid name: {reason}")]
    InvalidName { reason: String },
    #[error("Loose file at pack root (files must live in a subdirectory): {path}")]
    NoTopLevelFiles { path: PathBuf },
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Stale hash for `{name}`: cached {cached:016X}, identity hashes to {computed:016X}")]
    StaleHash {
        name: String,
        cached: u64,
        computed: u64,
    },
    #[error("Internal invariant violated: {what}")]
    InvariantViolation { what: String },

    #[error("Failed to build rayon thread pool: {0}")]
    ThreadPoolBuild(String),
}

impl BsaError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidMagic { .. }
            | Self::UnsupportedVersion { .. }
            | Self::TruncatedRecord { .. }
            | Self::InvalidNameTable { .. }
            | Self::OffsetOutOfRange { .. }
            | Self::ArchiveTooLarge { .. } => ErrorClass::Format,
            Self::CorruptHeader { .. } | Self::SizeMismatch { .. } | Self::TruncatedEntry { .. } => {
                ErrorClass::Integrity
            }
            Self::IO(_)
            | Self::InvalidName { .. }
            | Self::NoTopLevelFiles { .. }
            | Self::NotADirectory { .. }
            | Self::ThreadPoolBuild(_) => ErrorClass::Input,
            Self::StaleHash { .. } | Self::InvariantViolation { .. } => ErrorClass::Invariant,
        }
    }
}
