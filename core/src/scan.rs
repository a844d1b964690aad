use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::chunk::ChunkRange;
use crate::error::{DownloadError, DownloadResult};

/// Completed chunk file: `<dest>.$$<id>`.
pub fn chunk_path(dest: &Path, id: u32) -> PathBuf {
    sibling(dest, &format!(".$${}", id))
}

/// In-flight write target for one attempt: `<dest>.$$<id>$PART`.
pub fn part_path(dest: &Path, id: u32) -> PathBuf {
    sibling(dest, &format!(".$${}$PART", id))
}

fn sibling(dest: &Path, suffix: &str) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
        _ => PathBuf::from(name),
    }
}

#[derive(Debug, Default)]
pub struct ResumeScan {
    /// Chunk ids still to be downloaded, in planning order.
    pub pending: Vec<u32>,
    /// Chunk ids whose files are already complete on disk.
    pub completed: Vec<u32>,
    /// Bytes credited from completed chunk files.
    pub resumed_bytes: u64,
}

impl ResumeScan {
    pub fn is_resume(&self) -> bool {
        !self.completed.is_empty()
    }
}

/// Classify each planned chunk against its on-disk file.
///
/// A file of exactly the planned length is complete. A larger file means
/// the disk state belongs to a different plan and the session cannot
/// safely continue. A shorter file is not trusted and is re-requested in
/// full.
pub fn scan_resume(dest: &Path, plan: &[ChunkRange]) -> DownloadResult<ResumeScan> {
    let mut scan = ResumeScan::default();
    for chunk in plan {
        let path = chunk_path(dest, chunk.id);
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                scan.pending.push(chunk.id);
                continue;
            }
            Err(err) => return Err(DownloadError::Filesystem(err.to_string())),
        };

        let len = meta.len();
        if len == chunk.size() {
            scan.completed.push(chunk.id);
            scan.resumed_bytes += len;
        } else if len > chunk.size() {
            return Err(DownloadError::OnDiskInconsistency(
                path.to_string_lossy().into_owned(),
            ));
        } else {
            warn!(chunk = chunk.id, found = len, expected = chunk.size(), "discarding short chunk file");
            fs::remove_file(&path).map_err(|err| DownloadError::Filesystem(err.to_string()))?;
            scan.pending.push(chunk.id);
        }
    }
    debug!(
        completed = scan.completed.len(),
        pending = scan.pending.len(),
        "resume scan"
    );
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_file_names_are_dest_siblings() {
        let dest = Path::new("/tmp/out/file.zip");
        assert_eq!(chunk_path(dest, 3), Path::new("/tmp/out/file.zip.$$3"));
        assert_eq!(
            part_path(dest, 12),
            Path::new("/tmp/out/file.zip.$$12$PART")
        );
    }

    #[test]
    fn scan_classifies_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let plan = vec![
            ChunkRange::new(0, 0, 249),
            ChunkRange::new(1, 250, 499),
            ChunkRange::new(2, 500, 749),
            ChunkRange::new(3, 750, 999),
        ];

        fs::write(chunk_path(&dest, 0), vec![0u8; 250]).unwrap();
        fs::write(chunk_path(&dest, 2), vec![0u8; 100]).unwrap();

        let scan = scan_resume(&dest, &plan).unwrap();
        assert_eq!(scan.completed, vec![0]);
        assert_eq!(scan.pending, vec![1, 2, 3]);
        assert_eq!(scan.resumed_bytes, 250);
        assert!(scan.is_resume());
        // the short file for chunk 2 was discarded
        assert!(!chunk_path(&dest, 2).exists());
    }

    #[test]
    fn oversize_chunk_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let plan = vec![ChunkRange::new(0, 0, 99)];
        fs::write(chunk_path(&dest, 0), vec![0u8; 500]).unwrap();

        match scan_resume(&dest, &plan) {
            Err(DownloadError::OnDiskInconsistency(_)) => {}
            other => panic!("expected on-disk inconsistency, got {:?}", other),
        }
    }

    #[test]
    fn fresh_directory_enqueues_everything() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        let plan = vec![ChunkRange::new(0, 0, 499), ChunkRange::new(1, 500, 999)];

        let scan = scan_resume(&dest, &plan).unwrap();
        assert_eq!(scan.pending, vec![0, 1]);
        assert!(!scan.is_resume());
        assert_eq!(scan.resumed_bytes, 0);
    }
}
