use std::collections::BTreeMap;

use bstr::{BStr, BString, ByteSlice};

use crate::error::{BsaError, Result};
use crate::hash::{self, NameHash};

use super::EntryKey;
use super::file::BsaFile;

/// One virtual folder: a path, its hash, and a hash-ordered file set.
///
/// Files are keyed by (hash, name), so iteration is ascending by hash with
/// equal hashes in deterministic name-byte order. Lookups go through the
/// normalized form of the queried name, while stored names stay verbatim.
#[derive(Debug)]
pub struct BsaFolder {
    path: BString,
    hash: NameHash,
    named: bool,
    files: BTreeMap<EntryKey, BsaFile>,
}

impl BsaFolder {
    pub(crate) fn new(path: BString, hash: NameHash, named: bool) -> Self {
        Self {
            path,
            hash,
            named,
            files: BTreeMap::new(),
        }
    }

    pub(crate) fn from_path(path: &BStr) -> Result<Self> {
        let path = hash::normalize(path);
        let hash = hash::hash_folder_normalized(path.as_bstr())?;
        Ok(Self::new(path, hash, true))
    }

    /// Folder as read from a record. Without a directory-name table the path
    /// is a hex rendering of the hash, marked unnamed.
    pub(crate) fn from_record(name: Option<BString>, hash: NameHash) -> Self {
        let named = name.is_some();
        let path = name.unwrap_or_else(|| BString::from(format!("{:016x}", hash.value())));
        Self::new(path, hash, named)
    }

    #[inline]
    pub fn path(&self) -> &BStr {
        self.path.as_bstr()
    }

    /// Full archive path of a file in this folder.
    pub fn full_path(&self, name: &BStr) -> BString {
        let mut full = self.path.clone();
        full.push(b'\\');
        full.extend_from_slice(name);
        full
    }

    #[inline]
    pub fn hash(&self) -> NameHash {
        self.hash
    }

    /// False when the path is a synthetic hash rendering because the archive
    /// was written without directory names.
    #[inline]
    pub fn named(&self) -> bool {
        self.named
    }

    #[inline]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Ascending-hash iteration over the folder's files.
    pub fn files(&self) -> impl Iterator<Item = &BsaFile> {
        self.files.values()
    }

    /// Looks up a file by name, insensitive to case and separator style.
    pub fn file(&self, name: &BStr) -> Option<&BsaFile> {
        let normalized = hash::normalize(name);
        let hash = hash::hash_file_normalized(normalized.as_bstr()).ok()?;
        self.files
            .range(EntryKey::range_start(hash)..)
            .take_while(|(key, _)| key.hash() == hash)
            .map(|(_, file)| file)
            .find(|file| hash::normalize(file.name()) == normalized)
    }

    pub fn file_mut(&mut self, name: &BStr) -> Option<&mut BsaFile> {
        let key = self.find_key(name)?;
        self.files.get_mut(&key)
    }

    /// Inserts a file, replacing any existing file with the same identity.
    /// Returns the replaced file, if any.
    pub fn add_file(&mut self, file: BsaFile) -> Option<BsaFile> {
        let replaced = self.remove_file(file.name());
        self.insert_raw(file);
        replaced
    }

    pub fn remove_file(&mut self, name: &BStr) -> Option<BsaFile> {
        let key = self.find_key(name)?;
        self.files.remove(&key)
    }

    /// Inserts under the file's exact (hash, name) key with no identity
    /// merging. Reading uses this so that hash collisions between unnamed
    /// entries cannot shadow each other.
    pub(crate) fn insert_raw(&mut self, file: BsaFile) {
        self.files
            .insert(EntryKey::new(file.hash(), file.name().to_owned()), file);
    }

    pub(crate) fn verify_hash(&self) -> Result<()> {
        if !self.named {
            return Ok(());
        }
        let computed = hash::hash_folder_normalized(hash::normalize(self.path.as_bstr()).as_bstr())?;
        if computed != self.hash {
            return Err(BsaError::StaleHash {
                name: self.path.to_string(),
                cached: self.hash.value(),
                computed: computed.value(),
            });
        }
        Ok(())
    }

    fn find_key(&self, name: &BStr) -> Option<EntryKey> {
        let normalized = hash::normalize(name);
        let hash = hash::hash_file_normalized(normalized.as_bstr()).ok()?;
        self.files
            .range(EntryKey::range_start(hash)..)
            .take_while(|(key, _)| key.hash() == hash)
            .find(|(_, file)| hash::normalize(file.name()) == normalized)
            .map(|(key, _)| key.clone())
    }
}
