use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::report::{round_trip, RoundTrip};

pub fn is_4ds(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("4ds"))
}

/// Expands directories into the 4DS files below them, sorted. Plain file
/// arguments are kept whatever their extension.
pub fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = vec![];
    for path in paths {
        if path.is_dir() {
            let mut found = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!("skipping unreadable entry: {}", err);
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file() && is_4ds(entry.path()))
                .map(|entry| entry.into_path())
                .collect::<Vec<_>>();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

#[derive(Debug)]
pub struct FileCheck {
    pub path: PathBuf,
    pub outcome: Result<RoundTrip>,
}

pub fn check_file(path: &Path) -> Result<RoundTrip> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    round_trip(&bytes)
}

pub fn check_files(files: &[PathBuf], bar: &ProgressBar) -> Vec<FileCheck> {
    bar.set_length(files.len() as u64);
    let mut results = Vec::with_capacity(files.len());
    for path in files {
        bar.set_message(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let outcome = check_file(path);
        match &outcome {
            Ok(report) => debug!(
                "{}: {} frames, {} warnings, identical: {}",
                path.display(),
                report.frames,
                report.warnings,
                report.identical
            ),
            Err(err) => warn!("{}: {:#}", path.display(), err),
        }
        results.push(FileCheck {
            path: path.clone(),
            outcome,
        });
        bar.inc(1);
    }
    bar.finish_with_message("checked");
    results
}
