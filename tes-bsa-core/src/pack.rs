//! Builds an archive from a directory tree. Discovery walks the source
//! recursively; each file is keyed by its path relative to the root, so the
//! on-disk layout round-trips through unpack unchanged.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bstr::{BStr, BString, ByteSlice};
use tracing::debug;
use walkdir::WalkDir;

use crate::bsa::{ArchiveFlags, BsaArchive, BsaFile};
use crate::compression::CompressionSettings;
use crate::error::{BsaError, Result};

type ProgressHook = dyn Fn(&BStr, usize, usize) + Send + Sync;

#[derive(Debug)]
pub struct PackReport {
    pub packed: usize,
    pub folders: usize,
    pub bytes_read: u64,
}

pub struct PackBuilder {
    source_dir: PathBuf,
    flags: ArchiveFlags,
    settings: CompressionSettings,
    on_progress: Option<Arc<ProgressHook>>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl PackBuilder {
    pub fn new(source_dir: impl AsRef<Path>) -> Self {
        Self {
            source_dir: source_dir.as_ref().to_path_buf(),
            flags: ArchiveFlags::NAMED_DIRECTORIES | ArchiveFlags::NAMED_FILES,
            settings: CompressionSettings::new(),
            on_progress: None,
            cancel_flag: None,
        }
    }

    /// Flags for the new archive. Compression state is carried per file, so
    /// these need not agree with the settings; the record bits express any
    /// divergence from the archive default.
    pub fn archive_flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn settings(mut self, settings: CompressionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Called after each file is added with its full archive path, the
    /// completed count so far and the total task count.
    pub fn on_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(&BStr, usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    /// Checked between files; a set flag stops discovery output early and
    /// returns the archive built so far.
    pub fn cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    pub fn run(self) -> Result<(BsaArchive, PackReport)> {
        if !self.source_dir.is_dir() {
            return Err(BsaError::NotADirectory {
                path: self.source_dir.clone(),
            });
        }

        let mut entries: Vec<(BString, BString, PathBuf)> = Vec::new();
        for entry in WalkDir::new(&self.source_dir).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&self.source_dir).map_err(|_| {
                BsaError::InvariantViolation {
                    what: format!("walked entry `{}` escapes the source root", entry.path().display()),
                }
            })?;
            // Every file must live inside a folder; the format has no
            // root-level entries.
            let Some(parent) = rel.parent().filter(|p| !p.as_os_str().is_empty()) else {
                return Err(BsaError::NoTopLevelFiles {
                    path: entry.path().to_path_buf(),
                });
            };
            let name = BString::from(entry.file_name().to_string_lossy().as_bytes());
            entries.push((folder_key(parent), name, entry.path().to_path_buf()));
        }
        debug!(files = entries.len(), "source tree walked");

        let total = entries.len();
        let mut archive = BsaArchive::create(self.flags);
        let mut packed = 0usize;
        let mut bytes_read = 0u64;
        for (folder, name, path) in &entries {
            if self.should_abort() {
                debug!(packed, total, "packing cancelled");
                break;
            }
            let data = fs::read(path)?;
            bytes_read += data.len() as u64;
            let file = BsaFile::from_raw(name.as_bstr(), data, &self.settings)?;
            archive.add_file(folder.as_bstr(), file)?;
            packed += 1;
            if let Some(on_progress) = &self.on_progress {
                let mut full = folder.clone();
                full.push(b'\\');
                full.extend_from_slice(name);
                on_progress(full.as_bstr(), packed, total);
            }
        }

        let report = PackReport {
            packed,
            folders: archive.folder_count(),
            bytes_read,
        };
        debug!(packed = report.packed, folders = report.folders, "packing finished");
        Ok((archive, report))
    }

    fn should_abort(&self) -> bool {
        if let Some(flag) = &self.cancel_flag {
            return flag.load(Ordering::Relaxed);
        }
        false
    }
}

fn folder_key(rel_dir: &Path) -> BString {
    let mut key = BString::default();
    for component in rel_dir.components() {
        if !key.is_empty() {
            key.push(b'\\');
        }
        key.extend_from_slice(component.as_os_str().to_string_lossy().as_bytes());
    }
    key
}

impl BsaArchive {
    /// Packs a directory with default flags and settings.
    pub fn pack(source_dir: impl AsRef<Path>) -> Result<(BsaArchive, PackReport)> {
        PackBuilder::new(source_dir).run()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn seed_tree(root: &Path) {
        for (rel, data) in [
            ("meshes/clutter/bowl.nif", &b"bowl geometry bytes"[..]),
            ("meshes/clutter/cup.nif", &b"cup geometry bytes"[..]),
            ("textures/bowl.dds", &b"texel data"[..]),
        ] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
    }

    #[test]
    fn packs_a_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        let (archive, report) = BsaArchive::pack(dir.path()).unwrap();
        assert_eq!(report.packed, 3);
        assert_eq!(report.folders, 2);
        assert_eq!(report.bytes_read, 19 + 18 + 10);
        assert_eq!(archive.file_count(), 3);

        let file = archive
            .file(b"meshes\\clutter".as_bstr(), b"bowl.nif".as_bstr())
            .unwrap();
        let settings = CompressionSettings::new();
        assert_eq!(file.content(true, false, &settings).unwrap(), b"bowl geometry bytes");
    }

    #[test]
    fn top_level_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());
        fs::write(dir.path().join("loose.txt"), b"not allowed").unwrap();

        let err = BsaArchive::pack(dir.path()).unwrap_err();
        match err {
            BsaError::NoTopLevelFiles { path } => {
                assert!(path.ends_with("loose.txt"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_source_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = PackBuilder::new(dir.path().join("absent")).run().unwrap_err();
        assert!(matches!(err, BsaError::NotADirectory { .. }));
    }

    #[test]
    fn progress_reports_full_archive_paths() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let (_, report) = PackBuilder::new(dir.path())
            .on_progress(move |name, done, total| {
                hook_seen.lock().push((name.to_owned(), done, total));
            })
            .run()
            .unwrap();

        assert_eq!(report.packed, 3);
        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().any(|(name, ..)| name == "meshes\\clutter\\bowl.nif"));
        assert!(seen.iter().all(|&(_, _, total)| total == 3));
    }

    #[test]
    fn cancelled_runs_stop_between_files() {
        let dir = tempfile::tempdir().unwrap();
        seed_tree(dir.path());

        let flag = Arc::new(AtomicBool::new(true));
        let (archive, report) = PackBuilder::new(dir.path()).cancel_flag(flag).run().unwrap();
        assert_eq!(report.packed, 0);
        assert_eq!(archive.file_count(), 0);
    }
}
