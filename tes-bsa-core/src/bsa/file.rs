use std::fmt;

use bstr::{BStr, BString, ByteSlice};
use once_cell::sync::OnceCell;

use crate::compression::{self, CompressionSettings};
use crate::error::{BsaError, Result};
use crate::hash::{self, NameHash};
use crate::source::SourceBytes;

/// One archived file. Identity (name and hash) is fixed at construction;
/// the surrounding containers order by hash, so nothing here may change it.
///
/// The payload is kept in its effective on-disk state and materialized
/// lazily. Each transformation result lands in its own single-init cell, so
/// concurrent first access from parallel workers fills it exactly once.
pub struct BsaFile {
    name: BString,
    hash: NameHash,
    named: bool,
    compressed: bool,
    original_size: Option<u32>,
    payload: Payload,
    extracted: OnceCell<Vec<u8>>,
    deflated: OnceCell<Vec<u8>>,
}

enum Payload {
    /// Range of the opened archive, already in effective state.
    Source {
        source: SourceBytes,
        offset: u64,
        len: u64,
    },
    /// Owned bytes, already in effective state.
    Stored(Vec<u8>),
    /// Owned raw bytes whose effective state is compressed; the deflate
    /// pass is deferred until the block is first needed.
    Raw(Vec<u8>),
}

impl BsaFile {
    /// New file from raw content. The effective compression state follows
    /// the settings; actual compression is deferred so that adding files
    /// stays cheap and a later save can run it in parallel.
    pub fn from_raw(name: &BStr, data: Vec<u8>, settings: &CompressionSettings) -> Result<Self> {
        let name = hash::normalize(name);
        let hash = hash::hash_file_normalized(name.as_bstr())?;
        let (_, extension) = hash::split_extension(name.as_bstr());
        if settings.compress_new_files(extension) {
            let original_size = block_size(data.len())?;
            Ok(Self {
                name,
                hash,
                named: true,
                compressed: true,
                original_size: Some(original_size),
                payload: Payload::Raw(data),
                extracted: OnceCell::new(),
                deflated: OnceCell::new(),
            })
        } else {
            block_size(data.len())?;
            Ok(Self {
                name,
                hash,
                named: true,
                compressed: false,
                original_size: None,
                payload: Payload::Stored(data),
                extracted: OnceCell::new(),
                deflated: OnceCell::new(),
            })
        }
    }

    /// File backed by a range of the opened archive. `name` is `None` when
    /// the archive carries no file-name table; a hex rendering of the hash
    /// stands in so unpack still produces distinct paths.
    pub(crate) fn from_descriptor(
        name: Option<BString>,
        hash: NameHash,
        compressed: bool,
        original_size: Option<u32>,
        source: SourceBytes,
        offset: u64,
        len: u64,
    ) -> Self {
        let named = name.is_some();
        Self {
            name: name.unwrap_or_else(|| synthetic_name(hash)),
            hash,
            named,
            compressed,
            original_size,
            payload: Payload::Source {
                source,
                offset,
                len,
            },
            extracted: OnceCell::new(),
            deflated: OnceCell::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &BStr {
        self.name.as_bstr()
    }

    #[inline]
    pub fn hash(&self) -> NameHash {
        self.hash
    }

    /// False when the name is a synthetic hash rendering rather than one
    /// read from a name table or given by a caller.
    #[inline]
    pub fn named(&self) -> bool {
        self.named
    }

    /// Effective compression state of the payload.
    #[inline]
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Pre-compression byte length. `None` for uncompressed payloads.
    #[inline]
    pub fn original_size(&self) -> Option<u32> {
        self.original_size
    }

    /// Logical (extracted) byte length, without materializing anything
    /// beyond what is already known.
    pub fn extracted_size(&self) -> Option<u64> {
        if self.compressed {
            self.original_size.map(u64::from)
        } else {
            match &self.payload {
                Payload::Source { len, .. } => Some(*len),
                Payload::Stored(bytes) => Some(bytes.len() as u64),
                Payload::Raw(bytes) => Some(bytes.len() as u64),
            }
        }
    }

    /// Stored byte length, if known without running compression.
    pub fn stored_size_hint(&self) -> Option<u64> {
        match &self.payload {
            Payload::Source { len, .. } => Some(*len),
            Payload::Stored(bytes) => Some(bytes.len() as u64),
            Payload::Raw(_) => self.deflated.get().map(|b| b.len() as u64),
        }
    }

    /// Returns the payload.
    ///
    /// With `extract` set, the bytes come back inflated, validated against
    /// the stored original size. Otherwise the bytes come back in the file's
    /// effective compressed/uncompressed state; `force` additionally runs
    /// the opposite transformation as a validation pass. Repeated calls with
    /// the same arguments return identical bytes and never redo cached work.
    pub fn content(&self, extract: bool, force: bool, settings: &CompressionSettings) -> Result<&[u8]> {
        if extract {
            if !self.compressed {
                return self.effective_bytes(settings);
            }
            if let Payload::Raw(bytes) = &self.payload {
                // Still raw, nothing to inflate.
                return Ok(bytes);
            }
            return self.inflated();
        }

        let bytes = self.effective_bytes(settings)?;
        if force && self.compressed && !matches!(self.payload, Payload::Raw(_)) {
            self.inflated()?;
        }
        Ok(bytes)
    }

    /// Writes the extracted payload into `writer` without retaining it.
    /// Bulk extraction goes through here so a full-archive unpack never
    /// accumulates every file in memory; already-cached bytes are reused.
    pub fn extract_into<W: std::io::Write>(
        &self,
        writer: &mut W,
        settings: &CompressionSettings,
    ) -> Result<u64> {
        if let Some(bytes) = self.extracted.get() {
            writer.write_all(bytes)?;
            return Ok(bytes.len() as u64);
        }
        if !self.compressed {
            let bytes = self.effective_bytes(settings)?;
            writer.write_all(bytes)?;
            return Ok(bytes.len() as u64);
        }
        if let Payload::Raw(bytes) = &self.payload {
            writer.write_all(bytes)?;
            return Ok(bytes.len() as u64);
        }

        let original_size = self.original_size.ok_or_else(|| BsaError::InvariantViolation {
            what: format!("compressed entry `{}` has no original size", self.name),
        })?;
        let stored = match &self.payload {
            Payload::Source {
                source,
                offset,
                len,
            } => source.slice(*offset, *len)?,
            Payload::Stored(bytes) => bytes,
            Payload::Raw(_) => unreachable!("raw payloads are written out directly"),
        };
        let bytes = compression::inflate_block(stored, original_size, self.name.as_bstr())?;
        writer.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Replaces the payload. The single mutation path: effective state,
    /// original size and caches are all recomputed here so they can never
    /// drift apart.
    ///
    /// The new effective state is `archive_default XOR flip_compression`.
    /// Compressed input headed for an uncompressed state is inflated to
    /// normalize; raw input headed for a compressed state is compressed at
    /// the settings level; compressed input staying compressed is inflated
    /// once anyway, to validate it and learn the original size.
    pub fn update(
        &mut self,
        buffer: Vec<u8>,
        input_is_compressed: bool,
        flip_compression: bool,
        archive_default: bool,
        settings: &CompressionSettings,
    ) -> Result<()> {
        let effective = archive_default ^ flip_compression;
        let (payload, original_size) = if effective {
            if input_is_compressed {
                let inflated = compression::inflate_for_size(&buffer, self.name.as_bstr())?;
                (Payload::Stored(buffer), Some(block_size(inflated.len())?))
            } else {
                let (_, extension) = hash::split_extension(self.name.as_bstr());
                let level = settings.level_for(extension).unwrap_or_default();
                let original_size = block_size(buffer.len())?;
                let block = compression::deflate_block(&buffer, level)?;
                (Payload::Stored(block), Some(original_size))
            }
        } else {
            let bytes = if input_is_compressed {
                compression::inflate_for_size(&buffer, self.name.as_bstr())?
            } else {
                buffer
            };
            block_size(bytes.len())?;
            (Payload::Stored(bytes), None)
        };

        self.payload = payload;
        self.compressed = effective;
        self.original_size = original_size;
        self.extracted = OnceCell::new();
        self.deflated = OnceCell::new();
        Ok(())
    }

    /// Recomputes the hash from the name and compares it with the cached
    /// identity hash. Synthetic names carry no derivable hash and pass.
    pub(crate) fn verify_hash(&self) -> Result<()> {
        if !self.named {
            return Ok(());
        }
        let computed = hash::hash_file_normalized(hash::normalize(self.name.as_bstr()).as_bstr())?;
        if computed != self.hash {
            return Err(BsaError::StaleHash {
                name: self.name.to_string(),
                cached: self.hash.value(),
                computed: computed.value(),
            });
        }
        Ok(())
    }

    // Bytes in effective state: the source range, the owned block, or the
    // deferred deflate result.
    fn effective_bytes(&self, settings: &CompressionSettings) -> Result<&[u8]> {
        match &self.payload {
            Payload::Source {
                source,
                offset,
                len,
            } => source.slice(*offset, *len),
            Payload::Stored(bytes) => Ok(bytes),
            Payload::Raw(bytes) => {
                let block = self.deflated.get_or_try_init(|| {
                    let (_, extension) = hash::split_extension(self.name.as_bstr());
                    let level = settings.level_for(extension).unwrap_or_default();
                    compression::deflate_block(bytes, level)
                })?;
                Ok(block)
            }
        }
    }

    fn inflated(&self) -> Result<&[u8]> {
        let original_size = self.original_size.ok_or_else(|| BsaError::InvariantViolation {
            what: format!("compressed entry `{}` has no original size", self.name),
        })?;
        let bytes = self.extracted.get_or_try_init(|| {
            let stored = match &self.payload {
                Payload::Source {
                    source,
                    offset,
                    len,
                } => source.slice(*offset, *len)?,
                Payload::Stored(bytes) => bytes,
                Payload::Raw(_) => unreachable!("raw payloads never reach the inflate path"),
            };
            compression::inflate_block(stored, original_size, self.name.as_bstr())
        })?;
        Ok(bytes)
    }
}

fn block_size(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| BsaError::ArchiveTooLarge { size: len as u64 })
}

fn synthetic_name(hash: NameHash) -> BString {
    BString::from(format!("{:016x}", hash.value()))
}

impl fmt::Debug for BsaFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = match &self.payload {
            Payload::Source { offset, len, .. } => format!("Source {{ offset: {offset}, len: {len} }}"),
            Payload::Stored(bytes) => format!("Stored({} bytes)", bytes.len()),
            Payload::Raw(bytes) => format!("Raw({} bytes)", bytes.len()),
        };
        f.debug_struct("BsaFile")
            .field("name", &self.name)
            .field("hash", &self.hash)
            .field("compressed", &self.compressed)
            .field("original_size", &self.original_size)
            .field("payload", &payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compressing() -> CompressionSettings {
        CompressionSettings::new().with_default_compressed(true)
    }

    #[test]
    fn raw_files_defer_compression_until_needed() {
        let data = b"a block of sound data, repeated: a block of sound data".to_vec();
        let file = BsaFile::from_raw(b"click.txt".as_bstr(), data.clone(), &compressing()).unwrap();
        assert!(file.compressed());
        assert_eq!(file.original_size(), Some(data.len() as u32));
        assert_eq!(file.stored_size_hint(), None);

        // Extracted form is available without any compression work.
        assert_eq!(file.content(true, false, &compressing()).unwrap(), data);
        assert_eq!(file.stored_size_hint(), None);

        // Asking for the effective state runs the deflate pass exactly once.
        let block = file.content(false, false, &compressing()).unwrap();
        assert_eq!(&block[..2], &[0x78, 0x9C]);
        let again = file.content(false, false, &compressing()).unwrap();
        assert_eq!(block.as_ptr(), again.as_ptr());
        assert!(file.stored_size_hint().is_some());
    }

    #[test]
    fn uncompressed_files_pass_through() {
        let settings = CompressionSettings::new();
        let data = b"plain bytes".to_vec();
        let file = BsaFile::from_raw(b"readme.txt".as_bstr(), data.clone(), &settings).unwrap();
        assert!(!file.compressed());
        assert_eq!(file.original_size(), None);
        assert_eq!(file.content(true, false, &settings).unwrap(), data);
        assert_eq!(file.content(false, true, &settings).unwrap(), data);
    }

    #[test]
    fn update_recompresses_raw_input() {
        let settings = compressing();
        let mut file =
            BsaFile::from_raw(b"voice.mp3".as_bstr(), vec![1, 2, 3], &CompressionSettings::new()).unwrap();
        let data = b"fresh payload bytes, fresh payload bytes".to_vec();
        file.update(data.clone(), false, false, true, &settings).unwrap();

        assert!(file.compressed());
        assert_eq!(file.original_size(), Some(data.len() as u32));
        let stored = file.content(false, false, &settings).unwrap();
        assert_eq!(&stored[..2], &[0x78, 0x9C]);
        assert_eq!(file.content(true, false, &settings).unwrap(), data);
    }

    #[test]
    fn update_normalizes_compressed_input_for_uncompressed_state() {
        let settings = CompressionSettings::new();
        let data = b"will be stored flat".to_vec();
        let block = compression::deflate_block(&data, flate2::Compression::new(6)).unwrap();

        let mut file = BsaFile::from_raw(b"a.txt".as_bstr(), Vec::new(), &settings).unwrap();
        file.update(block, true, false, false, &settings).unwrap();
        assert!(!file.compressed());
        assert_eq!(file.original_size(), None);
        assert_eq!(file.content(false, false, &settings).unwrap(), data);
    }

    #[test]
    fn update_validates_compressed_input() {
        let settings = compressing();
        let mut file = BsaFile::from_raw(b"a.txt".as_bstr(), Vec::new(), &settings).unwrap();
        let err = file
            .update(vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00], true, false, true, &settings)
            .unwrap_err();
        assert!(matches!(
            err,
            BsaError::CorruptHeader { .. } | BsaError::IO(_)
        ));
    }

    #[test]
    fn update_flip_inverts_the_default() {
        let settings = compressing();
        let mut file = BsaFile::from_raw(b"a.txt".as_bstr(), Vec::new(), &settings).unwrap();
        file.update(b"tiny".to_vec(), false, true, true, &settings).unwrap();
        assert!(!file.compressed());

        file.update(b"tiny".to_vec(), false, true, false, &settings).unwrap();
        assert!(file.compressed());
        assert_eq!(file.original_size(), Some(4));
    }

    #[test]
    fn descriptor_files_inflate_and_validate() {
        let data = b"descriptor backed payload, long enough to shrink a little".to_vec();
        let block = compression::deflate_block(&data, flate2::Compression::new(9)).unwrap();
        let len = block.len() as u64;
        let source = SourceBytes::from_vec(block);

        let file = BsaFile::from_descriptor(
            Some(BString::from("d.bin")),
            hash::hash_file(b"d.bin".as_bstr()).unwrap(),
            true,
            Some(data.len() as u32),
            source.clone(),
            0,
            len,
        );
        assert_eq!(file.content(true, false, &CompressionSettings::new()).unwrap(), data);

        // A wrong original size is a per-entry integrity failure.
        let bad = BsaFile::from_descriptor(
            Some(BString::from("d.bin")),
            hash::hash_file(b"d.bin".as_bstr()).unwrap(),
            true,
            Some(data.len() as u32 + 1),
            source,
            0,
            len,
        );
        assert!(matches!(
            bad.content(true, false, &CompressionSettings::new()),
            Err(BsaError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn extract_into_streams_without_caching() {
        let data = b"descriptor backed payload, long enough to shrink a little".to_vec();
        let block = compression::deflate_block(&data, flate2::Compression::new(6)).unwrap();
        let len = block.len() as u64;
        let file = BsaFile::from_descriptor(
            Some(BString::from("d.bin")),
            hash::hash_file(b"d.bin".as_bstr()).unwrap(),
            true,
            Some(data.len() as u32),
            SourceBytes::from_vec(block),
            0,
            len,
        );

        let mut out = Vec::new();
        let written = file.extract_into(&mut out, &CompressionSettings::new()).unwrap();
        assert_eq!(written, data.len() as u64);
        assert_eq!(out, data);
        assert!(file.extracted.get().is_none());

        // Once content() has cached the bytes, the stream path reuses them.
        file.content(true, false, &CompressionSettings::new()).unwrap();
        let mut again = Vec::new();
        file.extract_into(&mut again, &CompressionSettings::new()).unwrap();
        assert_eq!(again, data);
    }

    #[test]
    fn stale_hash_detection() {
        let file = BsaFile::from_descriptor(
            Some(BString::from("click.wav")),
            NameHash::from_raw(0xDEAD),
            false,
            None,
            SourceBytes::from_vec(vec![0; 4]),
            0,
            4,
        );
        assert!(matches!(
            file.verify_hash(),
            Err(BsaError::StaleHash { cached: 0xDEAD, .. })
        ));

        let good = BsaFile::from_raw(b"click.wav".as_bstr(), vec![], &CompressionSettings::new()).unwrap();
        good.verify_hash().unwrap();

        let nameless = BsaFile::from_descriptor(
            None,
            NameHash::from_raw(0xBEEF),
            false,
            None,
            SourceBytes::from_vec(vec![0; 4]),
            0,
            4,
        );
        nameless.verify_hash().unwrap();
        assert!(!nameless.named());
    }
}
