//! Workspace path sandbox
//!
//! Every filesystem tool resolves user-supplied paths through [`Sandbox`]
//! before touching storage. Resolution is pure path algebra: no I/O, no
//! symlink resolution.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

/// Why a user path was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path '{0}': home directory references (~) are not allowed")]
    InvalidPath(String),

    #[error("path '{path}' resolves outside the workspace root {}", .root.display())]
    PathEscape { path: String, root: PathBuf },
}

/// A fixed workspace root that all relative tool paths are anchored to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a sandbox rooted at `root`; relative roots are taken from the
    /// current directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()
                .context("Failed to determine current directory")?
                .join(root)
        };

        Ok(Self {
            root: normalize(&absolute),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a user path to an absolute path inside the root.
    ///
    /// A `.` segment anywhere in the path discards everything up to and
    /// including it; the remainder is anchored at the root.
    pub fn resolve(&self, user_path: &str) -> Result<PathBuf, PathError> {
        if user_path.contains('~') {
            return Err(PathError::InvalidPath(user_path.to_string()));
        }

        let segments: Vec<&str> = user_path.split('/').collect();
        let candidate = match segments.iter().rposition(|s| *s == ".") {
            Some(reset) => self.root.join(segments[reset + 1..].join("/")),
            None if Path::new(user_path).is_absolute() => PathBuf::from(user_path),
            None => self.root.join(user_path),
        };

        let resolved = normalize(&candidate);
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(PathError::PathEscape {
                path: user_path.to_string(),
                root: self.root.clone(),
            })
        }
    }

    /// Path relative to the root, for display back to the model
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Lexically normalize an absolute path: drop `.`, fold `..`
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
