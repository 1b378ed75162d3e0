use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bstr::ByteSlice;
use indicatif::{ProgressBar, ProgressStyle};
use tes_bsa_core::bsa::ArchiveFlags;
use tes_bsa_core::compression::CompressionSettings;
use tes_bsa_core::pack::PackBuilder;

use crate::PackCommand;

pub fn pack(cmd: &PackCommand) -> anyhow::Result<()> {
    let output_path = cmd.output.clone().unwrap_or_else(|| default_output(&cmd.input));
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent)?;
    }

    let mut flags = ArchiveFlags::empty();
    if !cmd.no_names {
        flags |= ArchiveFlags::NAMED_DIRECTORIES | ArchiveFlags::NAMED_FILES;
    }
    if cmd.embed_names {
        flags |= ArchiveFlags::BSTRING_PREFIXED;
    }
    let mut settings = CompressionSettings::new().with_strategy(cmd.level.strategy());
    if !cmd.no_compress {
        flags |= ArchiveFlags::DEFAULT_COMPRESSED;
        settings = settings.with_default_compressed(true);
    }
    for ext in &cmd.uncompressed_ext {
        settings.set_override(ext.as_bytes().as_bstr(), -1);
    }

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::default_bar().template("{pos}/{len} files packed {wide_bar}")?);
    bar.enable_steady_tick(Duration::from_millis(100));
    let progress_bar = bar.clone();

    let (archive, report) = PackBuilder::new(&cmd.input)
        .archive_flags(flags)
        .settings(settings.clone())
        .on_progress(move |_, done, total| {
            progress_bar.set_length(total as u64);
            progress_bar.set_position(done as u64);
        })
        .run()
        .context(format!("Failed to pack `{}`", cmd.input.display()))?;
    bar.finish();

    let mut open_options = OpenOptions::new();
    if cmd.force {
        open_options.create(true).write(true).truncate(true);
    } else {
        open_options.create_new(true).write(true);
    }
    let file = open_options
        .open(&output_path)
        .context(format!("Failed to create `{}`", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    archive.write_to(&mut writer, false, &settings)?;
    writer.flush()?;

    println!("Output file: `{}`", output_path.display());
    println!(
        "Done. {} files in {} folders, {} bytes read.",
        report.packed, report.folders, report.bytes_read
    );
    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    input
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{stem}.bsa"))
}
