use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{DownloadError, DownloadResult};
use crate::scan::chunk_path;

const COPY_BUFFER: usize = 64 * 1024;

/// Concatenate the completed chunk files into `dest`, in id order, then
/// remove them. `on_chunk` receives the build percentage after each chunk.
/// Chunk files survive any error so the session stays resumable.
pub fn assemble_chunks<F>(dest: &Path, total_chunks: u32, mut on_chunk: F) -> DownloadResult<()>
where
    F: FnMut(f64),
{
    let mut output =
        File::create(dest).map_err(|err| DownloadError::Filesystem(err.to_string()))?;

    let mut buffer = vec![0u8; COPY_BUFFER];
    for id in 0..total_chunks {
        let path = chunk_path(dest, id);
        let mut input =
            File::open(&path).map_err(|err| DownloadError::Filesystem(err.to_string()))?;
        loop {
            let read = input
                .read(&mut buffer)
                .map_err(|err| DownloadError::Filesystem(err.to_string()))?;
            if read == 0 {
                break;
            }
            output
                .write_all(&buffer[..read])
                .map_err(|err| DownloadError::Filesystem(err.to_string()))?;
        }
        on_chunk(100.0 * f64::from(id + 1) / f64::from(total_chunks));
    }
    output
        .flush()
        .map_err(|err| DownloadError::Filesystem(err.to_string()))?;

    for id in 0..total_chunks {
        fs::remove_file(chunk_path(dest, id))
            .map_err(|err| DownloadError::Filesystem(err.to_string()))?;
    }
    debug!(chunks = total_chunks, dest = %dest.display(), "assembly complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenates_in_id_order_and_removes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        fs::write(chunk_path(&dest, 0), b"alpha-").unwrap();
        fs::write(chunk_path(&dest, 1), b"beta-").unwrap();
        fs::write(chunk_path(&dest, 2), b"gamma").unwrap();

        let mut builds = Vec::new();
        assemble_chunks(&dest, 3, |pct| builds.push(pct)).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"alpha-beta-gamma");
        assert_eq!(builds.len(), 3);
        assert!((builds[2] - 100.0).abs() < f64::EPSILON);
        for id in 0..3 {
            assert!(!chunk_path(&dest, id).exists());
        }
    }

    #[test]
    fn missing_chunk_aborts_and_keeps_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("file.bin");
        fs::write(chunk_path(&dest, 0), b"alpha").unwrap();
        // chunk 1 is missing

        let err = assemble_chunks(&dest, 2, |_| {}).unwrap_err();
        assert!(matches!(err, DownloadError::Filesystem(_)));
        assert!(chunk_path(&dest, 0).exists());
    }
}
