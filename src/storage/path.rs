use std::path::PathBuf;

use super::StorageError;

pub(crate) fn expand_home_path(raw_path: &str) -> Result<PathBuf, StorageError> {
    if let Some(rest) = raw_path.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }

    if let Some(rest) = raw_path.strip_prefix("$HOME") {
        if rest.is_empty() {
            return home_dir();
        }
        if let Some(rest) = rest.strip_prefix('/') {
            return Ok(home_dir()?.join(rest));
        }
    }

    Ok(PathBuf::from(raw_path))
}

fn home_dir() -> Result<PathBuf, StorageError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or(StorageError::HomeDirectoryUnavailable)
}
