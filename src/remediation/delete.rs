//! Delete remediation: unlink the infected file.

use std::fs;
use std::path::Path;

use crate::core::errors::{Result, SwdError};

/// Unlink `path`. Directories are refused; a finding always names a regular file.
pub fn delete_file(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| SwdError::io(path, e))?;
    if meta.is_dir() {
        return Err(SwdError::Runtime {
            details: format!("refusing to delete directory {}", path.display()),
        });
    }
    fs::remove_file(path).map_err(|e| SwdError::io(path, e))?;

    if fs::symlink_metadata(path).is_ok() {
        return Err(SwdError::Runtime {
            details: format!("path still exists after deletion: {}", path.display()),
        });
    }
    Ok(())
}
