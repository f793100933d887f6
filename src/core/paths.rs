//! Path helpers shared by the scanner, the ledger and the quarantine vault.

use std::env;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::{Result, SwdError};

/// Resolve a scan root to an absolute, normalized path.
///
/// Findings are keyed by their path string, so roots are made absolute to keep
/// the same file from being recorded under two spellings across runs. Uses
/// `fs::canonicalize` when the path exists and falls back to syntactic
/// normalization otherwise.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// Borrow a path as UTF-8, the form the ledger persists and hashes.
pub fn path_as_utf8(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| SwdError::NonUtf8Path {
        path: path.to_path_buf(),
    })
}

/// True when `path` equals or lives under any of `prefixes`.
pub fn is_under_any(path: &Path, prefixes: &[PathBuf]) -> bool {
    prefixes.iter().any(|prefix| path.starts_with(prefix))
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
