//! Heal remediation: excise the matched bytes from a file.
//!
//! The healed content is assembled in a sibling temp file (prefix, then the
//! suffix after the match), synced, given the original permissions and
//! renamed over the original. Until the rename the original is untouched, so
//! a failure at any step leaves it as it was.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::core::errors::{Result, SwdError};

/// Sizes before and after a successful heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealOutcome {
    pub original_size: u64,
    pub healed_size: u64,
}

/// Remove `signature.len()` bytes at `offset` from the file at `path`.
///
/// Preconditions checked before anything is written: the file is large
/// enough, and with `verify` the signature bytes are still at `offset`.
/// Either failing is `SignatureMismatch`.
pub fn heal_file(path: &Path, offset: u64, signature: &[u8], verify: bool) -> Result<HealOutcome> {
    let mut original = File::open(path).map_err(|e| SwdError::io(path, e))?;
    let meta = original.metadata().map_err(|e| SwdError::io(path, e))?;
    let original_size = meta.len();
    let siglen = signature.len() as u64;

    let match_end = offset
        .checked_add(siglen)
        .filter(|end| *end <= original_size)
        .ok_or_else(|| SwdError::SignatureMismatch {
            path: path.to_path_buf(),
            offset,
        })?;

    if verify {
        let present = bytes_at_offset_match(&mut original, offset, signature)
            .map_err(|e| SwdError::io(path, e))?;
        if !present {
            return Err(SwdError::SignatureMismatch {
                path: path.to_path_buf(),
                offset,
            });
        }
    }

    let temp = TempSibling::create(path)?;
    let write_result = (|| -> io::Result<()> {
        let mut out = temp.file()?;
        original.seek(SeekFrom::Start(0))?;
        io::copy(&mut (&mut original).take(offset), &mut out)?;
        original.seek(SeekFrom::Start(match_end))?;
        io::copy(&mut original, &mut out)?;
        out.sync_all()?;
        fs::set_permissions(&temp.path, meta.permissions())
    })();
    write_result.map_err(|e| SwdError::io(&temp.path, e))?;
    drop(original);

    temp.persist(path)?;
    Ok(HealOutcome {
        original_size,
        healed_size: original_size - siglen,
    })
}

fn bytes_at_offset_match(file: &mut File, offset: u64, expected: &[u8]) -> io::Result<bool> {
    file.seek(SeekFrom::Start(offset))?;
    let mut found = vec![0u8; expected.len()];
    file.read_exact(&mut found)?;
    Ok(found == expected)
}

/// Temp file next to the target; removed on drop unless persisted.
struct TempSibling {
    path: PathBuf,
    persisted: bool,
}

impl TempSibling {
    fn create(target: &Path) -> Result<Self> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let name = target
            .file_name()
            .map_or_else(|| "heal".into(), |n| n.to_string_lossy().into_owned());

        let path = dir.join(format!(".{name}.swd-heal-{:016x}", rand::random::<u64>()));
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| SwdError::io(&path, e))?;
        Ok(Self {
            path,
            persisted: false,
        })
    }

    fn file(&self) -> io::Result<File> {
        OpenOptions::new().write(true).open(&self.path)
    }

    fn persist(mut self, target: &Path) -> Result<()> {
        fs::rename(&self.path, target).map_err(|e| SwdError::io(target, e))?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempSibling {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = fs::remove_file(&self.path);
        }
    }
}

// ──────────────────── tests ────────────────────
