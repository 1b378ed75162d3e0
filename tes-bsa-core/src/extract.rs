//! Parallel extraction of an archive onto the filesystem, mirroring the
//! folder tree under a chosen output directory.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bstr::{BStr, BString, ByteSlice};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;

use crate::bsa::{BsaArchive, BsaFile};
use crate::compression::CompressionSettings;
use crate::error::{BsaError, Result};

type NameFilter = dyn Fn(&BStr) -> bool + Send + Sync;
type ProgressHook = dyn Fn(&BStr, usize, usize) + Send + Sync;

#[derive(Debug)]
pub struct ExtractReport {
    pub extracted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Full archive path and message for every failed entry.
    pub errors: Vec<(BString, String)>,
}

pub struct ExtractBuilder<'a> {
    archive: &'a BsaArchive,
    output_dir: PathBuf,
    threads: Option<usize>,
    overwrite: bool,
    continue_on_error: bool,
    settings: CompressionSettings,
    filter: Option<Arc<NameFilter>>,
    on_progress: Option<Arc<ProgressHook>>,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl<'a> ExtractBuilder<'a> {
    pub fn new(archive: &'a BsaArchive, output_dir: impl AsRef<Path>) -> Self {
        Self {
            archive,
            output_dir: output_dir.as_ref().to_path_buf(),
            threads: None,
            overwrite: false,
            continue_on_error: false,
            settings: CompressionSettings::new(),
            filter: None,
            on_progress: None,
            cancel_flag: None,
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn settings(mut self, settings: CompressionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Keeps only entries whose full archive path passes `filter`.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&BStr) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Called after each entry completes with its full archive path, the
    /// completed count so far and the total task count.
    pub fn on_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(&BStr, usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub fn cancel_flag(mut self, cancel_flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(cancel_flag);
        self
    }

    pub fn run(self) -> Result<ExtractReport> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir)?;
        }

        let mut tasks: Vec<(&BsaFile, BString, PathBuf)> = Vec::new();
        let mut skipped = 0usize;
        for folder in self.archive.folders() {
            for file in folder.files() {
                let full = folder.full_path(file.name());
                if let Some(filter) = &self.filter
                    && !filter(full.as_bstr())
                {
                    skipped += 1;
                    continue;
                }
                let rel = relative_path(folder.path(), file.name());
                tasks.push((file, full, rel));
            }
        }

        if self.should_abort() {
            debug!(skipped, "extraction cancelled before start");
            return Ok(ExtractReport {
                extracted: 0,
                skipped,
                failed: 0,
                errors: Vec::new(),
            });
        }

        let total = tasks.len();
        let errors: Mutex<Vec<(BString, String)>> = Mutex::new(Vec::new());
        let extracted = AtomicUsize::new(0);

        let work = || -> Result<()> {
            if self.continue_on_error {
                tasks.par_iter().for_each(|(file, full, rel)| {
                    if self.should_abort() {
                        return;
                    }
                    let out_path = self.output_dir.join(rel);
                    match self.extract_one(file, &out_path) {
                        Ok(()) => {
                            let done = extracted.fetch_add(1, Ordering::Relaxed) + 1;
                            if let Some(on_progress) = &self.on_progress {
                                on_progress(full.as_bstr(), done, total);
                            }
                        }
                        Err(e) => errors.lock().push((full.clone(), e.to_string())),
                    }
                });
                Ok(())
            } else {
                tasks.par_iter().try_for_each(|(file, full, rel)| -> Result<()> {
                    if self.should_abort() {
                        return Ok(());
                    }
                    let out_path = self.output_dir.join(rel);
                    self.extract_one(file, &out_path)?;
                    let done = extracted.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(on_progress) = &self.on_progress {
                        on_progress(full.as_bstr(), done, total);
                    }
                    Ok(())
                })
            }
        };

        if let Some(n) = self.threads {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| BsaError::ThreadPoolBuild(e.to_string()))?;
            pool.install(work)?;
        } else {
            work()?;
        }

        let extracted = extracted.load(Ordering::Relaxed);
        let errors = errors.into_inner();
        let failed = errors.len();
        debug!(extracted, skipped, failed, "extraction finished");

        Ok(ExtractReport {
            extracted,
            skipped,
            failed,
            errors,
        })
    }

    fn should_abort(&self) -> bool {
        if let Some(flag) = &self.cancel_flag {
            return flag.load(Ordering::Relaxed);
        }
        false
    }

    fn extract_one(&self, file: &BsaFile, out_path: &Path) -> Result<()> {
        if let Some(parent) = out_path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let mut open_options = OpenOptions::new();
        if self.overwrite {
            open_options.create(true).write(true).truncate(true);
        } else {
            open_options.create_new(true).write(true);
        }
        let mut out = open_options.open(out_path)?;
        file.extract_into(&mut out, &self.settings)?;
        out.flush()?;
        Ok(())
    }
}

// Archive separators become platform path components; name bytes outside
// UTF-8 are replaced so the tree stays writable everywhere.
fn relative_path(folder: &BStr, name: &BStr) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in folder.split(|&b| b == b'\\') {
        if segment.is_empty() {
            continue;
        }
        path.push(String::from_utf8_lossy(segment).into_owned());
    }
    path.push(String::from_utf8_lossy(name).into_owned());
    path
}

impl BsaArchive {
    pub fn extractor(&self, output_dir: impl AsRef<Path>) -> ExtractBuilder<'_> {
        ExtractBuilder::new(self, output_dir)
    }

    /// Extracts every file with default settings.
    pub fn unpack(&self, output_dir: impl AsRef<Path>) -> Result<ExtractReport> {
        self.extractor(output_dir).run()
    }
}
