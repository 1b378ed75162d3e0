//! 64-bit name hash reproducing the game engine's directory lookup hash.
//!
//! The low 32 bits pack structural bytes of the stem (last, second-to-last,
//! length, first) plus extension marker bits; the high 32 bits are a rolling
//! multiply-add over the interior stem bytes and the extension bytes. Engines
//! binary-search records by this value, so it must match bit-for-bit.

use std::fmt;

use bstr::{BStr, BString, ByteSlice};

use crate::error::{BsaError, Result};

const MULT: u32 = 0x1003F;

const KF_FLAG: u32 = 0x80;
const NIF_FLAG: u32 = 0x8000;
const DDS_FLAG: u32 = 0x8080;
const WAV_FLAG: u32 = 0x8000_0000;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameHash(u64);

impl NameHash {
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    #[inline]
    pub(crate) const fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameHash(0x{:016X})", self.0)
    }
}

impl fmt::Display for NameHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

/// Lowercases ASCII, maps `/` to `\` and strips leading/trailing separators.
/// Non-ASCII bytes pass through untouched (names are a legacy single-byte
/// codepage, not UTF-8).
pub fn normalize(name: &BStr) -> BString {
    let mut out: BString = name
        .iter()
        .map(|&b| match b {
            b'/' => b'\\',
            b => b.to_ascii_lowercase(),
        })
        .collect();
    while out.last() == Some(&b'\\') {
        out.pop();
    }
    while out.first() == Some(&b'\\') {
        out.remove(0);
    }
    out
}

/// Hash of a folder path. The whole normalized path is treated as the stem;
/// dots in folder names are ordinary bytes.
pub fn hash_folder(path: &BStr) -> Result<NameHash> {
    hash_folder_normalized(normalize(path).as_bstr())
}

pub(crate) fn hash_folder_normalized(path: &BStr) -> Result<NameHash> {
    if path.is_empty() {
        return Err(BsaError::InvalidName {
            reason: "empty folder path".into(),
        });
    }
    Ok(NameHash(combine(structural(path), interior_fold(path), 0)))
}

/// Hash of a file name. Any directory prefix is dropped, the extension is
/// split at the last dot, and the marker bit for the closed set of known
/// extensions (`.kf`, `.nif`, `.dds`, `.wav`) is ORed into the low half.
pub fn hash_file(name: &BStr) -> Result<NameHash> {
    hash_file_normalized(normalize(name).as_bstr())
}

pub(crate) fn hash_file_normalized(name: &BStr) -> Result<NameHash> {
    let name = match name.rfind_byte(b'\\') {
        Some(pos) => &name[pos + 1..],
        None => &name[..],
    };
    let (stem, extension) = split_extension(name.as_bstr());
    if stem.is_empty() {
        return Err(BsaError::InvalidName {
            reason: format!("empty file stem in `{}`", name.as_bstr()),
        });
    }
    let hash1 = structural(stem) | extension_flags(extension);
    Ok(NameHash(combine(hash1, interior_fold(stem), fold(extension))))
}

/// Splits at the last dot. A name without a dot has an empty extension; the
/// extension includes its leading dot.
pub(crate) fn split_extension(name: &BStr) -> (&BStr, &BStr) {
    match name.rfind_byte(b'.') {
        Some(pos) => (name[..pos].as_bstr(), name[pos..].as_bstr()),
        None => (name, b"".as_bstr()),
    }
}

// Low half: last byte, second-to-last (only when longer than 2), truncated
// length, first byte. The u8 length truncation is how the engine does it.
fn structural(stem: &BStr) -> u32 {
    let len = stem.len();
    let mut h = 0u32;
    if len >= 1 {
        h |= u32::from(stem[len - 1]);
        h |= u32::from(stem[0]) << 24;
    }
    if len > 2 {
        h |= u32::from(stem[len - 2]) << 8;
    }
    h |= u32::from(len as u8) << 16;
    h
}

fn fold(bytes: &BStr) -> u32 {
    let mut h = 0u32;
    for &b in bytes.iter() {
        h = h.wrapping_mul(MULT).wrapping_add(u32::from(b));
    }
    h
}

// Interior means everything but the first byte and the last two, which the
// structural half already covers. Stems of three bytes or fewer contribute
// nothing here.
fn interior_fold(stem: &BStr) -> u32 {
    let len = stem.len();
    if len > 3 { fold(stem[1..len - 2].as_bstr()) } else { 0 }
}

fn combine(hash1: u32, stem_fold: u32, ext_fold: u32) -> u64 {
    u64::from(stem_fold.wrapping_add(ext_fold)) << 32 | u64::from(hash1)
}

fn extension_flags(extension: &BStr) -> u32 {
    match extension.as_bytes() {
        b".kf" => KF_FLAG,
        b".nif" => NIF_FLAG,
        b".dds" => DDS_FLAG,
        b".wav" => WAV_FLAG,
        _ => 0,
    }
}
