use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::MmapOptions;

use crate::error::{BsaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBackend {
    /// Use `memmap2` memory mapping.
    Mmap,
    /// Read the whole file into an owned buffer.
    Owned,
}

impl Default for SourceBackend {
    fn default() -> Self {
        Self::Mmap
    }
}

/// Immutable, cheaply clonable byte source shared by every deferred-read
/// descriptor of an archive. Range reads are position-independent, so any
/// number of entries can materialize concurrently.
#[derive(Clone)]
pub struct SourceBytes {
    inner: SourceInner,
}

#[derive(Clone)]
enum SourceInner {
    Mmap(Arc<memmap2::Mmap>),
    Owned(Arc<[u8]>),
}

impl SourceBytes {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_backend(path, SourceBackend::default())
    }

    pub fn open_with_backend(path: impl AsRef<Path>, backend: SourceBackend) -> Result<Self> {
        let path = path.as_ref();
        match backend {
            SourceBackend::Mmap => {
                let file = File::open(path).map_err(|e| {
                    BsaError::IO(std::io::Error::new(
                        e.kind(),
                        format!("{}: {}", path.display(), e),
                    ))
                })?;
                // SAFETY: read-only mapping; the file is held for the lifetime of the mmap.
                let mmap = unsafe { MmapOptions::new().map(&file)? };
                Ok(Self {
                    inner: SourceInner::Mmap(Arc::new(mmap)),
                })
            }
            SourceBackend::Owned => {
                let bytes = std::fs::read(path).map_err(|e| {
                    BsaError::IO(std::io::Error::new(
                        e.kind(),
                        format!("{}: {}", path.display(), e),
                    ))
                })?;
                Ok(Self::from_vec(bytes))
            }
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            inner: SourceInner::Owned(bytes.into()),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match &self.inner {
            SourceInner::Mmap(mmap) => mmap,
            SourceInner::Owned(bytes) => bytes,
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Bounds-checked range read.
    pub fn slice(&self, offset: u64, size: u64) -> Result<&[u8]> {
        let end = offset.checked_add(size).filter(|&end| end <= self.len());
        match end {
            Some(end) => Ok(&self.as_slice()[offset as usize..end as usize]),
            None => Err(BsaError::OffsetOutOfRange {
                offset,
                size,
                source_size: self.len(),
            }),
        }
    }
}

impl fmt::Debug for SourceBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match &self.inner {
            SourceInner::Mmap(_) => "Mmap",
            SourceInner::Owned(_) => "Owned",
        };
        f.debug_struct("SourceBytes")
            .field("backend", &backend)
            .field("len", &self.len())
            .finish()
    }
}
