//! Sequential archive reader: header, folder records, per-folder name and
//! file records, the flat file-name table, then a deferred-read descriptor
//! for every data block. Nothing is decompressed here.

use std::collections::BTreeMap;
use std::io::Cursor;

use bstr::{BString, ByteSlice};
use byteorder::{LE, ReadBytesExt};
use tracing::debug;

use crate::bsa::{BsaArchive, BsaFile, BsaFolder, BsaHeader, EntryKey};
use crate::error::{BsaError, Result};
use crate::hash::NameHash;
use crate::layout::{self, strings};
use crate::source::SourceBytes;

struct FolderBlock {
    record: layout::FolderRecord,
    name: Option<BString>,
    records: Vec<layout::FileRecord>,
}

/// Reads an archive's directory structure out of `source`. Every payload
/// stays behind an offset/length descriptor until first access.
pub fn read_archive(source: SourceBytes) -> Result<BsaArchive> {
    let bytes = source.as_slice();
    let mut cursor = Cursor::new(bytes);

    ensure(bytes, 0, layout::Header::SIZE as u64, "header")?;
    let header = BsaHeader::try_from(layout::Header::from_reader(&mut cursor)?)?;
    let flags = header.archive_flags();
    debug!(
        folders = header.folder_count(),
        files = header.file_count(),
        ?flags,
        "header parsed"
    );

    // Folder record block, directly after the header.
    let folder_count = u64::from(header.folder_count());
    ensure(
        bytes,
        cursor.position(),
        folder_count * layout::FolderRecord::SIZE as u64,
        "folder records",
    )?;
    let mut folder_records = Vec::with_capacity(folder_count as usize);
    for _ in 0..folder_count {
        folder_records.push(layout::FolderRecord::from_reader(&mut cursor)?);
    }

    // Per folder: optional BZString name, then its file records. The stored
    // offset includes the length of the file-name table, which physically
    // sits after all of these blocks.
    let mut blocks = Vec::with_capacity(folder_records.len());
    for record in folder_records {
        let stored = u64::from(record.offset);
        let target = stored
            .checked_sub(u64::from(header.total_file_name_length()))
            .ok_or(BsaError::OffsetOutOfRange {
                offset: stored,
                size: 0,
                source_size: source.len(),
            })?;
        cursor.set_position(target);

        let name = if flags.named_directories() {
            ensure(bytes, target, 1, "folder name")?;
            let len = u64::from(bytes[target as usize]);
            ensure(bytes, target + 1, len, "folder name")?;
            Some(strings::read_bzstring(&mut cursor)?)
        } else {
            None
        };

        ensure(
            bytes,
            cursor.position(),
            u64::from(record.file_count) * layout::FileRecord::SIZE as u64,
            "file records",
        )?;
        let mut records = Vec::with_capacity(record.file_count as usize);
        for _ in 0..record.file_count {
            records.push(layout::FileRecord::from_reader(&mut cursor)?);
        }
        blocks.push(FolderBlock {
            record,
            name,
            records,
        });
    }
    debug!(count = blocks.len(), "folders indexed");

    // The flat name table follows the last file-record block; names map onto
    // file records positionally, in read order.
    let names = if flags.named_files() {
        let table_start = cursor.position();
        let table_len = u64::from(header.total_file_name_length());
        ensure(bytes, table_start, table_len, "file name table")?;
        let block = &bytes[table_start as usize..(table_start + table_len) as usize];
        strings::parse_name_table(block, u64::from(header.file_count()))?
    } else {
        Vec::new()
    };

    let total_records: u64 = blocks.iter().map(|b| b.records.len() as u64).sum();
    if flags.named_files() && total_records != names.len() as u64 {
        return Err(BsaError::InvalidNameTable {
            expected: names.len() as u64,
            found: total_records,
        });
    }
    debug!(names = names.len(), "names resolved");

    let mut folders = BTreeMap::new();
    let mut names_iter = names.into_iter();
    for block in blocks {
        let folder_hash = NameHash::from_raw(block.record.hash);
        let mut folder = BsaFolder::from_record(block.name, folder_hash);

        for record in block.records {
            // Name-count equality with the table was checked above.
            let name = if flags.named_files() { names_iter.next() } else { None };
            let compressed = record.compression_flipped() ^ flags.default_compressed();

            cursor.set_position(u64::from(record.offset));
            if flags.bstring_prefixed() {
                let pos = cursor.position();
                ensure(bytes, pos, 1, "embedded name")?;
                let len = u64::from(bytes[pos as usize]);
                ensure(bytes, pos + 1, len, "embedded name")?;
                cursor.set_position(pos + 1 + len);
            }
            let original_size = if compressed {
                ensure(bytes, cursor.position(), 4, "original size")?;
                Some(cursor.read_u32::<LE>()?)
            } else {
                None
            };

            let data_offset = cursor.position();
            let stored_len = u64::from(record.stored_len());
            source.slice(data_offset, stored_len)?;

            folder.insert_raw(BsaFile::from_descriptor(
                name,
                NameHash::from_raw(record.hash),
                compressed,
                original_size,
                source.clone(),
                data_offset,
                stored_len,
            ));
        }

        folders.insert(EntryKey::new(folder_hash, folder.path().to_owned()), folder);
    }
    debug!("archive read");

    Ok(BsaArchive::from_parts(header, folders, source))
}

// Pre-checks a read so truncation surfaces as a typed error with section
// context instead of a bare IO error.
fn ensure(bytes: &[u8], offset: u64, needed: u64, section: &'static str) -> Result<()> {
    let available = bytes.len() as u64;
    if offset.checked_add(needed).is_none_or(|end| end > available) {
        return Err(BsaError::TruncatedRecord {
            section,
            offset,
            needed,
            available,
        });
    }
    Ok(())
}
