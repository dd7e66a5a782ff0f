/// Coverage postprocessor: turns gcov counter artifacts into per-line
/// execution counts for diagnosing why an exploit failed.
///
/// Extraction is one-shot: both the counter (`.gcda`) and the listing
/// (`.gcov`) are unlinked once read, so artifacts never leak across workflow
/// iterations. The whole path is best-effort diagnostics; nothing here
/// affects a workflow outcome.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use walkdir::WalkDir;

use crate::exec::{GcovCommand, Supervisor};

/// One executed source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineHit {
    pub count: u64,
    pub line: u32,
    pub source: String,
}

/// Run gcov over every counter file under `build_dir` and collect the
/// executed lines per source file stem.
pub fn extract(build_dir: &Path, supervisor: &Supervisor) -> BTreeMap<String, Vec<LineHit>> {
    let mut executed = BTreeMap::new();

    for counter in counter_files(build_dir) {
        let listing = counter.with_extension("gcov");
        let stem = counter
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        match (GcovCommand { counter: counter.clone() }).build() {
            Ok(spec) => {
                supervisor.run(
                    &spec,
                    Some(&format!("Generating coverage file for {}", counter.display())),
                );
            }
            Err(e) => warn!("skipping counter {}: {}", counter.display(), e),
        }

        if listing.is_file() {
            let hits = parse_listing(&listing);
            if !hits.is_empty() {
                executed.insert(stem, hits);
            }
            remove(&listing);
        }
        remove(&counter);
    }

    executed
}

fn counter_files(build_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(build_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("gcda"))
        .collect()
}

fn parse_listing(listing: &Path) -> Vec<LineHit> {
    match fs::read_to_string(listing) {
        Ok(text) => text.lines().filter_map(parse_line).collect(),
        Err(e) => {
            warn!("cannot read listing {}: {}", listing.display(), e);
            Vec::new()
        }
    }
}

/// gcov listing rows are `count: line: source`. Only executed lines carry a
/// numeric count; `-` (no code) and `#####` (never executed) rows are
/// filtered out here.
fn parse_line(line: &str) -> Option<LineHit> {
    let mut parts = line.splitn(3, ':');
    let count = parts.next()?.trim();
    let line_no = parts.next()?.trim();
    let source = parts.next().unwrap_or("");

    if count.is_empty() || !count.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(LineHit {
        count: count.parse().ok()?,
        line: line_no.parse().ok()?,
        source: source.trim_end().to_string(),
    })
}

fn remove(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!("cannot remove {}: {}", path.display(), e);
    }
}
