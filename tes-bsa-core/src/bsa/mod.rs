mod file;
mod flags;
mod folder;
mod header;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;

use bstr::{BStr, BString, ByteSlice};
use serde::Serialize;

pub use file::BsaFile;
pub use flags::{ArchiveFlags, FileTypeFlags};
pub use folder::BsaFolder;
pub use header::BsaHeader;

use crate::compression::CompressionSettings;
use crate::error::{BsaError, Result};
use crate::hash::{self, NameHash};
use crate::source::{SourceBackend, SourceBytes};
use crate::{layout, read, serde_util, write};

/// Ordering key of the hash-ordered containers: ascending hash, ties broken
/// by name bytes so equal hashes still iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EntryKey {
    hash: NameHash,
    name: BString,
}

impl EntryKey {
    pub(crate) fn new(hash: NameHash, name: BString) -> Self {
        Self { hash, name }
    }

    /// Smallest key with the given hash, for range scans.
    pub(crate) fn range_start(hash: NameHash) -> Self {
        Self {
            hash,
            name: BString::default(),
        }
    }

    #[inline]
    pub(crate) fn hash(&self) -> NameHash {
        self.hash
    }
}

/// An archive: retained header, hash-ordered folder set, and (when opened
/// from bytes) the shared source every deferred payload reads from.
#[derive(Debug)]
pub struct BsaArchive {
    header: BsaHeader,
    folders: BTreeMap<EntryKey, BsaFolder>,
    source: Option<SourceBytes>,
}

impl BsaArchive {
    /// New empty archive with the given feature flags. The flags fix the
    /// archive's format behavior (name tables, default compression, embedded
    /// name prefixes) and do not change afterwards.
    pub fn create(archive_flags: ArchiveFlags) -> Self {
        Self {
            header: BsaHeader::new(archive_flags),
            folders: BTreeMap::new(),
            source: None,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_backend(path, SourceBackend::default())
    }

    pub fn open_with_backend(path: impl AsRef<Path>, backend: SourceBackend) -> Result<Self> {
        let source = SourceBytes::open_with_backend(path, backend)?;
        read::read_archive(source)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        read::read_archive(SourceBytes::from_vec(bytes))
    }

    pub(crate) fn from_parts(
        header: BsaHeader,
        folders: BTreeMap<EntryKey, BsaFolder>,
        source: SourceBytes,
    ) -> Self {
        Self {
            header,
            folders,
            source: Some(source),
        }
    }

    #[inline]
    pub fn header(&self) -> &BsaHeader {
        &self.header
    }

    pub fn folder_count(&self) -> usize {
        self.folders.len()
    }

    pub fn file_count(&self) -> usize {
        self.folders.values().map(BsaFolder::file_count).sum()
    }

    /// Ascending-hash iteration over the folders.
    pub fn folders(&self) -> impl Iterator<Item = &BsaFolder> {
        self.folders.values()
    }

    /// Looks up a folder by path, insensitive to case and separator style.
    pub fn folder(&self, path: &BStr) -> Option<&BsaFolder> {
        let normalized = hash::normalize(path);
        let hash = hash::hash_folder_normalized(normalized.as_bstr()).ok()?;
        self.folders
            .range(EntryKey::range_start(hash)..)
            .take_while(|(key, _)| key.hash() == hash)
            .map(|(_, folder)| folder)
            .find(|folder| hash::normalize(folder.path()) == normalized)
    }

    pub fn folder_mut(&mut self, path: &BStr) -> Option<&mut BsaFolder> {
        let key = self.find_folder_key(path)?;
        self.folders.get_mut(&key)
    }

    pub fn file(&self, folder: &BStr, name: &BStr) -> Option<&BsaFile> {
        self.folder(folder)?.file(name)
    }

    pub fn file_mut(&mut self, folder: &BStr, name: &BStr) -> Option<&mut BsaFile> {
        self.folder_mut(folder)?.file_mut(name)
    }

    /// Adds a file under the given folder path, creating the folder if it
    /// does not exist yet. A file with the same identity is replaced and
    /// returned. The header's file-type bitmask picks up the extension's
    /// classification.
    pub fn add_file(&mut self, folder_path: &BStr, file: BsaFile) -> Result<Option<BsaFile>> {
        let normalized = hash::normalize(folder_path);
        let hash = hash::hash_folder_normalized(normalized.as_bstr())?;

        let (_, extension) = hash::split_extension(file.name());
        let file_flags = self.header.file_flags() | FileTypeFlags::classify(extension);
        self.header.set_file_flags(file_flags);

        if let Some(key) = self.find_folder_key(normalized.as_bstr())
            && let Some(folder) = self.folders.get_mut(&key)
        {
            return Ok(folder.add_file(file));
        }
        let mut folder = BsaFolder::new(normalized.clone(), hash, true);
        folder.add_file(file);
        self.folders.insert(EntryKey::new(hash, normalized), folder);
        Ok(None)
    }

    /// Removes a file. A folder emptied by the removal is dropped with it;
    /// folders that were empty in the source archive are kept as read.
    pub fn remove_file(&mut self, folder_path: &BStr, name: &BStr) -> Option<BsaFile> {
        let key = self.find_folder_key(folder_path)?;
        let folder = self.folders.get_mut(&key)?;
        let removed = folder.remove_file(name)?;
        if folder.is_empty() {
            self.folders.remove(&key);
        }
        Some(removed)
    }

    /// Serializes to a file. The output is written in place; callers that
    /// need all-or-nothing behavior write to a temporary path and promote it
    /// on success.
    pub fn save(
        &self,
        path: impl AsRef<Path>,
        force_rebuild_header: bool,
        settings: &CompressionSettings,
    ) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| {
            BsaError::IO(std::io::Error::new(
                e.kind(),
                format!("{}: {}", path.display(), e),
            ))
        })?;
        let mut writer = BufWriter::new(file);
        write::write_archive(self, &mut writer, force_rebuild_header, settings)?;
        writer.flush()?;
        Ok(())
    }

    pub fn write_to<W: Write + Seek>(
        &self,
        writer: &mut W,
        force_rebuild_header: bool,
        settings: &CompressionSettings,
    ) -> Result<()> {
        write::write_archive(self, writer, force_rebuild_header, settings)
    }

    pub fn info(&self) -> ArchiveInfo {
        let flags = self.header.archive_flags();
        ArchiveInfo {
            version: layout::VERSION,
            archive_flags: flags.bits(),
            named_directories: flags.named_directories(),
            named_files: flags.named_files(),
            default_compressed: flags.default_compressed(),
            bstring_prefixed: flags.bstring_prefixed(),
            folder_count: self.folder_count(),
            file_count: self.file_count(),
            file_flags: self.header.file_flags().bits(),
            source_size: self.source.as_ref().map(SourceBytes::len),
        }
    }

    /// Flat listing in iteration (ascending hash) order.
    pub fn file_infos(&self) -> Vec<FileInfo> {
        self.folders()
            .flat_map(|folder| {
                folder.files().map(move |file| FileInfo {
                    folder: folder.path().to_string(),
                    name: file.name().to_string(),
                    hash: file.hash().value(),
                    compressed: file.compressed(),
                    stored_size: file.stored_size_hint(),
                    extracted_size: file.extracted_size(),
                })
            })
            .collect()
    }

    fn find_folder_key(&self, path: &BStr) -> Option<EntryKey> {
        let normalized = hash::normalize(path);
        let hash = hash::hash_folder_normalized(normalized.as_bstr()).ok()?;
        self.folders
            .range(EntryKey::range_start(hash)..)
            .take_while(|(key, _)| key.hash() == hash)
            .find(|(_, folder)| hash::normalize(folder.path()) == normalized)
            .map(|(key, _)| key.clone())
    }
}

/// Header-level summary, serializable for machine-readable listings.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveInfo {
    pub version: u32,
    #[serde(serialize_with = "serde_util::serialize_u32_hex")]
    pub archive_flags: u32,
    pub named_directories: bool,
    pub named_files: bool,
    pub default_compressed: bool,
    pub bstring_prefixed: bool,
    pub folder_count: usize,
    pub file_count: usize,
    #[serde(serialize_with = "serde_util::serialize_u32_hex")]
    pub file_flags: u32,
    pub source_size: Option<u64>,
}

/// One row of a flat file listing.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub folder: String,
    pub name: String,
    #[serde(serialize_with = "serde_util::serialize_u64_hex")]
    pub hash: u64,
    pub compressed: bool,
    pub stored_size: Option<u64>,
    pub extracted_size: Option<u64>,
}
