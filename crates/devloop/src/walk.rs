//! Depth-bounded directory walking with exclusions

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Files, directories and extensions skipped while listing or reading
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionSet {
    /// Exact file names
    pub files: BTreeSet<String>,
    /// Directory names, matched at any depth
    pub dirs: BTreeSet<String>,
    /// Extensions including the leading dot, matched case-insensitively
    pub extensions: BTreeSet<String>,
}

const DEFAULT_FILES: &[&str] = &[
    ".DS_Store",
    ".gitignore",
    "package-lock.json",
    "postcss.config.js",
    "tailwind.config.js",
    "next.config.js",
    "playwright.config.js",
    "jsconfig.json",
    "components.json",
    "API_doc.md",
    "env.example",
];

const DEFAULT_DIRS: &[&str] = &[
    "ui",
    "cypress",
    "node_modules",
    "migrations",
    ".next",
    "playwright-report",
    "test-results",
    "dist",
    "build",
    "coverage",
];

const DEFAULT_EXTENSIONS: &[&str] = &[
    ".ico", ".svg", ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".tiff", ".webp",
];

fn owned(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self {
            files: owned(DEFAULT_FILES),
            dirs: owned(DEFAULT_DIRS),
            extensions: owned(DEFAULT_EXTENSIONS),
        }
    }
}

impl ExclusionSet {
    /// An empty set that excludes nothing
    pub fn none() -> Self {
        Self {
            files: BTreeSet::new(),
            dirs: BTreeSet::new(),
            extensions: BTreeSet::new(),
        }
    }

    pub fn excludes_dir(&self, name: &str) -> bool {
        self.dirs.contains(name)
    }

    pub fn excludes_file(&self, name: &str) -> bool {
        if self.files.contains(name) {
            return true;
        }
        let lower = name.to_ascii_lowercase();
        self.extensions
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }
}

/// Walk `dir` and collect files at most `depth` directory levels down.
///
/// Depth 0 yields only the directory's own files. Returned paths are
/// relative to `dir` and sorted.
pub fn list_files(dir: &Path, depth: usize, exclude: &ExclusionSet) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("Not a directory: {}", dir.display());
    }

    let walker = WalkDir::new(dir)
        .max_depth(depth.saturating_add(1))
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| keep_entry(entry, exclude));

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(dir) {
            files.push(rel.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}

/// Files that could not be returned as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skipped {
    pub paths: Vec<String>,
}

/// Read every listed file as UTF-8, keyed by its path relative to `dir`.
///
/// Files that are not valid UTF-8 or cannot be read are skipped.
pub fn read_files(
    dir: &Path,
    depth: usize,
    exclude: &ExclusionSet,
) -> Result<(BTreeMap<String, String>, Skipped)> {
    let mut contents = BTreeMap::new();
    let mut skipped = Skipped::default();

    for rel in list_files(dir, depth, exclude)? {
        let key = rel.to_string_lossy().into_owned();
        match fs::read(dir.join(&rel)) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    contents.insert(key, text);
                }
                Err(_) => {
                    debug!(path = %key, "Skipping non UTF-8 file");
                    skipped.paths.push(key);
                }
            },
            Err(e) => {
                debug!(path = %key, error = %e, "Skipping unreadable file");
                skipped.paths.push(key);
            }
        }
    }

    Ok((contents, skipped))
}

fn keep_entry(entry: &DirEntry, exclude: &ExclusionSet) -> bool {
    // The walk root itself is never filtered
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        !exclude.excludes_dir(&name)
    } else {
        !exclude.excludes_file(&name)
    }
}
