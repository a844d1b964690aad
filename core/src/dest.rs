use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::config::ExistBehavior;
use crate::error::{DownloadError, DownloadResult};

const FALLBACK_NAME: &str = "download";

/// Normalize the caller-supplied destination.
///
/// Directories receive a filename derived from the URL. An existing file
/// is renamed with a `(COPY)` suffix, kept as-is, or skipped entirely
/// depending on the policy; `None` means the session should end silently.
pub fn resolve_destination(
    dest: &Path,
    url: &str,
    behavior: ExistBehavior,
) -> DownloadResult<Option<PathBuf>> {
    let mut current = dest.to_path_buf();
    loop {
        let meta = match fs::metadata(&current) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => break,
            Err(err) => return Err(DownloadError::Filesystem(err.to_string())),
        };
        if meta.is_dir() {
            current = current.join(filename_from_url(url));
            continue;
        }
        match behavior {
            ExistBehavior::NewFile => current = copy_suffixed(&current),
            ExistBehavior::Overwrite => break,
            ExistBehavior::Ignore => return Ok(None),
        }
    }
    validate_parent(&current)?;
    Ok(Some(current))
}

fn validate_parent(dest: &Path) -> DownloadResult<()> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    match fs::metadata(&parent) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(DownloadError::InvalidDestination(format!(
            "{} is not a directory",
            parent.display()
        ))),
        Err(_) => Err(DownloadError::InvalidDestination(format!(
            "missing parent directory {}",
            parent.display()
        ))),
    }
}

/// `<dir>/<stem>(COPY)<ext>` next to the occupied path.
fn copy_suffixed(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}(COPY).{}", stem, ext.to_string_lossy()),
        None => format!("{}(COPY)", stem),
    };
    path.with_file_name(name)
}

fn filename_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return FALLBACK_NAME.to_string();
    };
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}
