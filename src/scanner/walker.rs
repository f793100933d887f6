//! Sequential directory walker with cross-device, symlink and exclusion guards.
//!
//! The walker yields regular files lazily, depth-first, using an explicit work
//! stack instead of recursion. Entries are sorted by name within each
//! directory, so a fixed tree snapshot always produces the same sequence:
//! a directory's files first, then its subdirectories in name order.

#![allow(missing_docs)]

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::ScannerConfig;
use crate::core::errors::{Result, SwdError};
use crate::core::paths::{is_under_any, resolve_absolute_path};

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// `None` walks to any depth.
    pub max_depth: Option<usize>,
    pub follow_symlinks: bool,
    pub cross_devices: bool,
    pub excluded_paths: Vec<PathBuf>,
}

impl WalkerConfig {
    /// Build from scanner settings plus extra exclusions (e.g. the quarantine directory).
    ///
    /// Exclusions are resolved to canonical absolute paths so they compare
    /// against the resolved scan root.
    pub fn from_scanner(config: &ScannerConfig, extra_excluded: &[PathBuf]) -> Self {
        let excluded_paths = config
            .excluded_paths
            .iter()
            .chain(extra_excluded)
            .map(|path| resolve_absolute_path(path))
            .collect();
        Self {
            max_depth: config.max_depth,
            follow_symlinks: config.follow_symlinks,
            cross_devices: config.cross_devices,
            excluded_paths,
        }
    }
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self::from_scanner(&ScannerConfig::default(), &[])
    }
}

/// Pending directory on the work stack.
struct Frame {
    dir: PathBuf,
    depth: usize,
}

/// Lazy depth-first iterator over the regular files under one root.
///
/// Anything that cannot be read (a directory, an entry, a link target) yields
/// one `Err` item in walk order; the walk continues with its siblings.
pub struct FileWalker {
    config: WalkerConfig,
    stack: Vec<Frame>,
    ready: VecDeque<Result<PathBuf>>,
    root_dev: u64,
    visited: HashSet<DirKey>,
}

impl FileWalker {
    pub fn new(root: &Path, config: WalkerConfig) -> Self {
        let mut walker = Self {
            config,
            stack: Vec::new(),
            ready: VecDeque::new(),
            root_dev: 0,
            visited: HashSet::new(),
        };

        // The root is followed even when it is itself a symlink.
        match fs::metadata(root) {
            Ok(meta) if meta.is_dir() => {
                walker.root_dev = device_id(&meta);
                if !is_under_any(root, &walker.config.excluded_paths) {
                    walker.stack.push(Frame {
                        dir: root.to_path_buf(),
                        depth: 0,
                    });
                }
            }
            Ok(meta) if meta.is_file() => walker.ready.push_back(Ok(root.to_path_buf())),
            Ok(_) => {}
            Err(source) => walker.ready.push_back(Err(SwdError::io(root, source))),
        }
        walker
    }

    /// Read one directory: queue its files and entry errors, push its subdirectories.
    fn expand(&mut self, frame: &Frame) -> Result<()> {
        let meta = metadata_for_path(&frame.dir, self.config.follow_symlinks)
            .map_err(|source| SwdError::io(&frame.dir, source))?;
        if !self.config.cross_devices && device_id(&meta) != self.root_dev {
            return Ok(());
        }
        if !self.visited.insert(dir_key(&frame.dir, &meta)) {
            // Already walked through another symlink.
            return Ok(());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&frame.dir).map_err(|source| SwdError::io(&frame.dir, source))? {
            match entry {
                Ok(entry) => entries.push(entry),
                Err(source) => self.ready.push_back(Err(SwdError::io(&frame.dir, source))),
            }
        }
        entries.sort_by_key(fs::DirEntry::file_name);

        let mut subdirs = Vec::new();
        for entry in entries {
            let path = entry.path();
            if is_under_any(&path, &self.config.excluded_paths) {
                continue;
            }
            let ft = match entry.file_type() {
                Ok(ft) => ft,
                Err(source) => {
                    self.ready.push_back(Err(SwdError::io(&path, source)));
                    continue;
                }
            };

            let (is_file, is_dir) = if ft.is_symlink() {
                if !self.config.follow_symlinks {
                    continue;
                }
                let target = match fs::metadata(&path) {
                    Ok(target) => target,
                    Err(source) => {
                        // Dangling or unreadable link target.
                        self.ready.push_back(Err(SwdError::io(&path, source)));
                        continue;
                    }
                };
                // A link may lead into an excluded tree from outside it.
                if let Ok(resolved) = fs::canonicalize(&path)
                    && is_under_any(&resolved, &self.config.excluded_paths)
                {
                    continue;
                }
                (target.is_file(), target.is_dir())
            } else {
                (ft.is_file(), ft.is_dir())
            };

            if is_file {
                self.ready.push_back(Ok(path));
            } else if is_dir {
                match self.config.max_depth {
                    Some(max_depth) if frame.depth >= max_depth => {
                        self.ready
                            .push_back(Err(SwdError::DepthLimit { path, max_depth }));
                    }
                    _ => subdirs.push(path),
                }
            }
        }

        // Reverse so the first subdirectory by name is popped first.
        for dir in subdirs.into_iter().rev() {
            self.stack.push(Frame {
                dir,
                depth: frame.depth + 1,
            });
        }
        Ok(())
    }
}

impl Iterator for FileWalker {
    type Item = Result<PathBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            let frame = self.stack.pop()?;
            if let Err(err) = self.expand(&frame) {
                return Some(Err(err));
            }
        }
    }
}

fn metadata_for_path(path: &Path, follow_symlinks: bool) -> std::io::Result<fs::Metadata> {
    if follow_symlinks {
        fs::metadata(path)
    } else {
        fs::symlink_metadata(path)
    }
}

/// Get device ID from metadata (for cross-device detection).
fn device_id(meta: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.dev()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}

/// Identity of a walked directory, used to break symlink cycles.
#[cfg(unix)]
type DirKey = (u64, u64);
#[cfg(not(unix))]
type DirKey = PathBuf;

#[cfg(unix)]
fn dir_key(_path: &Path, meta: &fs::Metadata) -> DirKey {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn dir_key(path: &Path, _meta: &fs::Metadata) -> DirKey {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

// ──────────────────── tests ────────────────────
