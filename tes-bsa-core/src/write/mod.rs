//! Two-pass archive writer. Folder and file records are emitted with
//! placeholder offset fields whose stream positions are recorded as anchors;
//! once every name-table byte and data block has a known position, a final
//! pass seeks back and overwrites each anchor with its resolved value.

use std::io::{Seek, SeekFrom, Write};

use bstr::ByteSlice;
use byteorder::{LE, WriteBytesExt};
use rayon::prelude::*;
use tracing::debug;

use crate::bsa::{BsaArchive, BsaFile};
use crate::compression::CompressionSettings;
use crate::error::{BsaError, Result};
use crate::layout::{self, strings};

/// Format bound: every offset field is 32-bit.
pub const MAX_ARCHIVE_SIZE: u64 = 0x8000_0000;

/// Serializes `archive` in container iteration order (ascending hash).
///
/// Counts and name-table lengths are recomputed from the live model. The
/// file-type bitmask is taken from the retained header unless
/// `force_rebuild_header` asks for a fresh derivation from the extensions
/// actually present. Stored blocks are precomputed in parallel before the
/// sequential emission begins.
pub fn write_archive<W>(
    archive: &BsaArchive,
    writer: &mut W,
    force_rebuild_header: bool,
    settings: &CompressionSettings,
) -> Result<()>
where
    W: Write + Seek,
{
    verify_hashes(archive)?;
    warm_up(archive, settings)?;

    let flags = archive.header().archive_flags();
    let folder_count = count_u32(archive.folder_count())?;
    let file_count = count_u32(archive.file_count())?;

    let total_folder_name_length = if flags.named_directories() {
        size_u32(archive.folders().map(|f| f.path().len() as u64 + 1).sum())?
    } else {
        0
    };
    let total_file_name_length = if flags.named_files() {
        size_u32(
            archive
                .folders()
                .flat_map(|f| f.files())
                .map(|file| file.name().len() as u64 + 1)
                .sum(),
        )?
    } else {
        0
    };
    let mut header = archive.header().clone();
    header.set_counts(folder_count, file_count, total_folder_name_length, total_file_name_length);
    if force_rebuild_header {
        header.set_file_flags(rebuild_file_flags(archive));
    }

    let mut out = Out::new(writer);
    header.to_layout().write_to(&mut out)?;

    // Folder records with placeholder offsets.
    let mut folder_anchors = Vec::with_capacity(archive.folder_count());
    for folder in archive.folders() {
        let record_start = out.pos;
        layout::FolderRecord {
            hash: folder.hash().value(),
            file_count: count_u32(folder.file_count())?,
            offset: 0,
        }
        .write_to(&mut out)?;
        folder_anchors.push(record_start + 12);
    }

    // Per folder: its name and file records. The folder's resolved offset is
    // the block start plus the file-name table length.
    let mut folder_resolved = Vec::with_capacity(folder_anchors.len());
    let mut file_anchors = Vec::new();
    for folder in archive.folders() {
        folder_resolved.push(size_u32(out.pos + u64::from(total_file_name_length))?);
        if flags.named_directories() {
            strings::write_bzstring(&mut out, folder.path())?;
        }
        for file in folder.files() {
            let stored = file.content(false, false, settings)?;
            if stored.len() as u64 > u64::from(layout::FileRecord::SIZE_MASK) {
                return Err(BsaError::ArchiveTooLarge {
                    size: stored.len() as u64,
                });
            }
            let record_start = out.pos;
            layout::FileRecord::new(
                file.hash().value(),
                stored.len() as u32,
                file.compressed() ^ flags.default_compressed(),
                0,
            )
            .write_to(&mut out)?;
            file_anchors.push(record_start + 12);
        }
    }

    // The flat file-name table, in the same order as the records.
    if flags.named_files() {
        for folder in archive.folders() {
            for file in folder.files() {
                strings::write_cstring(&mut out, file.name())?;
            }
        }
    }

    // Data blocks; each start position resolves one file record.
    let mut file_resolved = Vec::with_capacity(file_anchors.len());
    for folder in archive.folders() {
        for file in folder.files() {
            file_resolved.push(size_u32(out.pos)?);
            if flags.bstring_prefixed() {
                strings::write_bstring(&mut out, folder.full_path(file.name()).as_bstr())?;
            }
            if file.compressed() {
                let original = file.original_size().ok_or_else(|| BsaError::InvariantViolation {
                    what: format!("compressed entry `{}` has no original size", file.name()),
                })?;
                out.write_u32::<LE>(original)?;
            }
            let stored = file.content(false, false, settings)?;
            out.write_all(stored)?;
        }
    }

    if out.pos > MAX_ARCHIVE_SIZE {
        return Err(BsaError::ArchiveTooLarge { size: out.pos });
    }

    // Patch pass.
    if folder_anchors.len() != folder_resolved.len() || file_anchors.len() != file_resolved.len() {
        return Err(BsaError::InvariantViolation {
            what: format!(
                "anchor/resolution mismatch: {}/{} folders, {}/{} files",
                folder_anchors.len(),
                folder_resolved.len(),
                file_anchors.len(),
                file_resolved.len()
            ),
        });
    }
    for (anchor, resolved) in folder_anchors.iter().zip(&folder_resolved) {
        out.patch(*anchor, *resolved)?;
    }
    for (anchor, resolved) in file_anchors.iter().zip(&file_resolved) {
        out.patch(*anchor, *resolved)?;
    }

    let total = out.pos;
    out.finish()?;
    debug!(folders = folder_count, files = file_count, bytes = total, "archive written");
    Ok(())
}

fn verify_hashes(archive: &BsaArchive) -> Result<()> {
    for folder in archive.folders() {
        folder.verify_hash()?;
        for file in folder.files() {
            file.verify_hash()?;
        }
    }
    Ok(())
}

// Precomputes every file's stored-state block in parallel before the
// sequential emission starts.
fn warm_up(archive: &BsaArchive, settings: &CompressionSettings) -> Result<()> {
    let files: Vec<&BsaFile> = archive.folders().flat_map(|f| f.files()).collect();
    files
        .par_iter()
        .try_for_each(|file| file.content(false, false, settings).map(|_| ()))
}

fn rebuild_file_flags(archive: &BsaArchive) -> crate::bsa::FileTypeFlags {
    archive
        .folders()
        .flat_map(|f| f.files())
        .map(|file| {
            let (_, extension) = crate::hash::split_extension(file.name());
            crate::bsa::FileTypeFlags::classify(extension)
        })
        .collect()
}

fn count_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| BsaError::ArchiveTooLarge { size: value as u64 })
}

fn size_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| BsaError::ArchiveTooLarge { size: value })
}

// Position-tracking wrapper so record/string codecs can write through it
// while anchors read the running position. Patching writes straight to the
// inner writer and leaves the tracked end position alone.
struct Out<'w, W: Write + Seek> {
    writer: &'w mut W,
    pos: u64,
}

impl<'w, W: Write + Seek> Out<'w, W> {
    fn new(writer: &'w mut W) -> Self {
        Self { writer, pos: 0 }
    }

    fn patch(&mut self, anchor: u64, value: u32) -> Result<()> {
        self.writer.seek(SeekFrom::Start(anchor))?;
        self.writer.write_u32::<LE>(value)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.seek(SeekFrom::Start(self.pos))?;
        Ok(())
    }
}

impl<W: Write + Seek> Write for Out<'_, W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.pos += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}
