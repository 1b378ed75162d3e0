use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bstr::ByteSlice;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use tes_bsa_core::bsa::BsaArchive;

use crate::UnpackCommand;

pub fn unpack(cmd: &UnpackCommand) -> anyhow::Result<()> {
    let archive = BsaArchive::open(&cmd.input)
        .context(format!("Failed to open archive `{}`", cmd.input.display()))?;

    let output_dir = output_path(&cmd.output, &cmd.input);

    let bar = ProgressBar::new(archive.file_count() as u64);
    bar.set_style(ProgressStyle::default_bar().template("{pos}/{len} files written {wide_bar}")?);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.println(format!("Output directory: `{}`", output_dir.display()));

    let mut extractor = archive
        .extractor(&output_dir)
        .overwrite(cmd.force)
        .continue_on_error(cmd.skip_errors);
    if let Some(threads) = cmd.threads {
        extractor = extractor.threads(threads);
    }
    if let Some(pattern) = &cmd.filter {
        let regex = Regex::new(pattern).context("Invalid --filter pattern")?;
        extractor = extractor.filter(move |path| regex.is_match(&path.to_str_lossy()));
    }
    let progress_bar = bar.clone();
    extractor = extractor.on_progress(move |_, done, _| progress_bar.set_position(done as u64));

    let report = extractor.run()?;
    bar.finish();

    for (name, message) in &report.errors {
        eprintln!("Failed `{name}`: {message}");
    }
    if report.failed > 0 {
        anyhow::bail!(
            "{} of {} entries failed",
            report.failed,
            report.extracted + report.failed
        );
    }
    println!("Done. {} files written, {} skipped.", report.extracted, report.skipped);
    Ok(())
}

fn output_path(output: &Option<PathBuf>, input: &Path) -> PathBuf {
    if let Some(output) = output {
        output.clone()
    } else if let Some(parent) = input.parent() {
        let dir_name = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        parent.join(dir_name)
    } else {
        PathBuf::from(".")
    }
}
