use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{DownloadError, DownloadResult};

/// Whether `name` looks like a chunk artifact: `<base>.$$<digits>` with an
/// optional `$PART` tail.
pub fn is_chunk_artifact(name: &str) -> bool {
    let rest = name.strip_suffix("$PART").unwrap_or(name);
    let Some(idx) = rest.rfind(".$$") else {
        return false;
    };
    if idx == 0 {
        return false;
    }
    let digits = &rest[idx + 3..];
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Remove orphan chunk files from `dir`, returning what was deleted.
pub fn clean_dir(dir: &Path) -> DownloadResult<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|err| DownloadError::Filesystem(err.to_string()))?;
    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| DownloadError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_chunk_artifact(name) {
            fs::remove_file(&path).map_err(|err| DownloadError::Filesystem(err.to_string()))?;
            removed.push(path);
        }
    }
    debug!(count = removed.len(), dir = %dir.display(), "cleaned chunk files");
    Ok(removed)
}
