//! Zlib-style framing around raw deflate streams, plus the settings value
//! threaded through pack/update/save.
//!
//! A stored compressed block is a 2-byte CMF/FLG pair followed by a raw
//! deflate stream (no adler trailer). The 16-bit pair read big-endian must be
//! divisible by 31. One legacy quirk: blocks whose original size is exactly 4
//! bytes were produced without a valid pair, so reading skips the first two
//! bytes unvalidated in that case.

use std::io::{Read, Write};

use bstr::{BStr, BString, ByteSlice};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use indexmap::IndexMap;
use tracing::trace;

use crate::error::{BsaError, Result};

const CMF: u8 = 0x78;

/// Original size below which the stored frame is never validated.
const DEGENERATE_SIZE: u32 = 4;

fn frame_pair(level: Compression) -> [u8; 2] {
    let flevel: u16 = match level.level() {
        0..=1 => 0,
        2..=5 => 1,
        6 => 2,
        _ => 3,
    };
    let base = u16::from(CMF) << 8 | flevel << 6;
    let fcheck = (31 - base % 31) % 31;
    [CMF, (flevel << 6 | fcheck) as u8]
}

/// Compresses `data` into a framed block: CMF/FLG pair + raw deflate.
pub fn deflate_block(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2 + 16);
    out.extend_from_slice(&frame_pair(level));
    let mut encoder = DeflateEncoder::new(out, level);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Inflates a framed block, validating the frame and the resulting length
/// against `original_size`. `name` is carried for error context only.
pub fn inflate_block(stored: &[u8], original_size: u32, name: &BStr) -> Result<Vec<u8>> {
    if stored.len() < 2 {
        return Err(BsaError::TruncatedEntry {
            name: name.to_string(),
            needed: 2,
            available: stored.len() as u64,
        });
    }
    if original_size != DEGENERATE_SIZE {
        let value = u16::from(stored[0]) << 8 | u16::from(stored[1]);
        if value % 31 != 0 {
            return Err(BsaError::CorruptHeader { value });
        }
    } else {
        trace!(%name, "headerless 4-byte payload, skipping frame validation");
    }

    let mut out = Vec::with_capacity(original_size as usize);
    let mut decoder = DeflateDecoder::new(&stored[2..]);
    decoder.read_to_end(&mut out)?;

    if out.len() as u64 != u64::from(original_size) {
        return Err(BsaError::SizeMismatch {
            name: name.to_string(),
            expected: u64::from(original_size),
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// Inflates a framed block whose original size is not yet known (compressed
/// caller input). The frame check cannot key off the 4-byte quirk up front,
/// so an invalid pair is forgiven only when the result turns out to be the
/// degenerate 4-byte case.
pub(crate) fn inflate_for_size(stored: &[u8], name: &BStr) -> Result<Vec<u8>> {
    if stored.len() < 2 {
        return Err(BsaError::TruncatedEntry {
            name: name.to_string(),
            needed: 2,
            available: stored.len() as u64,
        });
    }
    let value = u16::from(stored[0]) << 8 | u16::from(stored[1]);
    let valid = value % 31 == 0;

    let mut out = Vec::new();
    let mut decoder = DeflateDecoder::new(&stored[2..]);
    match decoder.read_to_end(&mut out) {
        Ok(_) => {
            if !valid && out.len() != DEGENERATE_SIZE as usize {
                return Err(BsaError::CorruptHeader { value });
            }
            Ok(out)
        }
        Err(_) if !valid => Err(BsaError::CorruptHeader { value }),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Fastest deflate level.
    FavorSpeed,
    #[default]
    Balanced,
    /// Best-ratio deflate level.
    FavorSize,
    /// Never initiate (re)compression; existing states are kept.
    LeaveAsIs,
}

impl CompressionStrategy {
    fn level(self) -> Option<Compression> {
        match self {
            Self::FavorSpeed => Some(Compression::fast()),
            Self::Balanced => Some(Compression::new(6)),
            Self::FavorSize => Some(Compression::best()),
            Self::LeaveAsIs => None,
        }
    }
}

/// Archive-wide compression policy. Passed explicitly wherever payloads are
/// (re)compressed; nothing reads it from ambient state.
#[derive(Debug, Clone, Default)]
pub struct CompressionSettings {
    default_compressed: bool,
    /// Extension (lowercase, with dot) to deflate level. Negative levels
    /// mean the extension's compression state is never toggled.
    overrides: IndexMap<BString, i32>,
    strategy: CompressionStrategy,
}

impl CompressionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_compressed(mut self, compressed: bool) -> Self {
        self.default_compressed = compressed;
        self
    }

    pub fn with_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn set_override(&mut self, extension: &BStr, level: i32) {
        let mut key: BString = extension.to_ascii_lowercase().into();
        if !key.starts_with(b".") {
            key.insert(0, b'.');
        }
        self.overrides.insert(key, level);
    }

    #[inline]
    pub fn default_compressed(&self) -> bool {
        self.default_compressed
    }

    #[inline]
    pub fn strategy(&self) -> CompressionStrategy {
        self.strategy
    }

    /// Deflate level to use for `extension`, or `None` when files of that
    /// extension must keep their current state (negative override, or the
    /// leave-as-is strategy).
    pub fn level_for(&self, extension: &BStr) -> Option<Compression> {
        let key: BString = extension.to_ascii_lowercase().into();
        match self.overrides.get(key.as_bstr()) {
            Some(&level) if level < 0 => None,
            Some(&level) => Some(Compression::new(level.min(9) as u32)),
            None => self.strategy.level(),
        }
    }

    /// Whether a newly added file of `extension` should be stored compressed.
    pub fn compress_new_files(&self, extension: &BStr) -> bool {
        self.default_compressed && self.level_for(extension).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framed_round_trip() {
        let data = b"Hello, world! Hello, world! Hello, world!";
        let block = deflate_block(data, Compression::new(6)).unwrap();
        assert_eq!(&block[..2], &[0x78, 0x9C]);
        let back = inflate_block(&block, data.len() as u32, b"t.txt".as_bstr()).unwrap();
        assert_eq!(back, data);
        // Repeat inflation of the same block yields the same bytes.
        let again = inflate_block(&block, data.len() as u32, b"t.txt".as_bstr()).unwrap();
        assert_eq!(again, back);
    }

    #[test]
    fn frame_pairs_match_canonical_zlib_values() {
        assert_eq!(frame_pair(Compression::new(1)), [0x78, 0x01]);
        assert_eq!(frame_pair(Compression::new(6)), [0x78, 0x9C]);
        assert_eq!(frame_pair(Compression::new(9)), [0x78, 0xDA]);
        for level in 0..=9 {
            let [cmf, flg] = frame_pair(Compression::new(level));
            assert_eq!((u16::from(cmf) << 8 | u16::from(flg)) % 31, 0);
        }
    }

    #[test]
    fn corrupt_frame_is_rejected() {
        let data = b"some payload long enough to matter";
        let mut block = deflate_block(data, Compression::new(6)).unwrap();
        block[1] ^= 0xFF;
        let err = inflate_block(&block, data.len() as u32, b"t.txt".as_bstr()).unwrap_err();
        assert!(matches!(err, BsaError::CorruptHeader { .. }));
    }

    #[test]
    fn four_byte_originals_skip_frame_validation() {
        let data = b"abcd";
        let mut block = deflate_block(data, Compression::new(6)).unwrap();
        // Wreck the frame; a 4-byte original must still inflate.
        block[0] = 0xDE;
        block[1] = 0xAD;
        let back = inflate_block(&block, 4, b"tiny.bin".as_bstr()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn inflated_length_is_validated() {
        let data = b"twelve bytes";
        let block = deflate_block(data, Compression::new(6)).unwrap();
        let err = inflate_block(&block, data.len() as u32 + 1, b"t.txt".as_bstr()).unwrap_err();
        assert!(matches!(
            err,
            BsaError::SizeMismatch {
                expected: 13,
                actual: 12,
                ..
            }
        ));
    }

    #[test]
    fn undersized_blocks_are_truncated_entries() {
        let err = inflate_block(&[0x78], 100, b"t.txt".as_bstr()).unwrap_err();
        assert!(matches!(err, BsaError::TruncatedEntry { .. }));
    }

    #[test]
    fn override_levels_and_freezes() {
        let mut settings = CompressionSettings::new()
            .with_default_compressed(true)
            .with_strategy(CompressionStrategy::FavorSize);
        settings.set_override(b"mp3".as_bstr(), -1);
        settings.set_override(b".dds".as_bstr(), 3);

        assert_eq!(settings.level_for(b".mp3".as_bstr()), None);
        assert!(!settings.compress_new_files(b".mp3".as_bstr()));

        assert_eq!(
            settings.level_for(b".dds".as_bstr()),
            Some(Compression::new(3))
        );
        assert_eq!(
            settings.level_for(b".NIF".as_bstr()),
            Some(Compression::best())
        );
        assert!(settings.compress_new_files(b".nif".as_bstr()));

        let leave = CompressionSettings::new().with_strategy(CompressionStrategy::LeaveAsIs);
        assert_eq!(leave.level_for(b".nif".as_bstr()), None);
    }
}
