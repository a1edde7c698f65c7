//! Atomic JSON document persistence for shared (possibly network) filesystems.
//!
//! Writes go to a uniquely named temp file in the target's directory, are
//! synced, then renamed over the target, and the directory entry is synced.
//! Readers retry a bounded number of times to ride out stale directory
//! caches and renames racing in from other hosts.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{AnnotatorError, AnnotatorResult, ReadFailure};

/// Number of read attempts before a read is reported as failed.
pub const READ_ATTEMPTS: u32 = 3;

/// Base backoff between read attempts; attempt `n` sleeps `n * READ_BACKOFF`.
const READ_BACKOFF: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Write path
// ---------------------------------------------------------------------------

/// Serialize `document` as pretty JSON and atomically replace `path` with it.
pub fn write_document<T: Serialize + ?Sized>(path: &Path, document: &T) -> AnnotatorResult<()> {
    let mut bytes =
        serde_json::to_vec_pretty(document).map_err(|source| AnnotatorError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
    bytes.push(b'\n');
    write_bytes_atomic(path, &bytes)
}

/// Atomically replace `path` with `data`.
///
/// On failure the temp file is removed and whatever was at `path` before is
/// left in place.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> AnnotatorResult<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(|e| AnnotatorError::write(&dir, e))?;

    let tmp_path = dir.join(temp_file_name(path));
    let outcome = write_synced(&tmp_path, data).and_then(|()| fs::rename(&tmp_path, path));
    if let Err(err) = outcome {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove temp file {}: {cleanup}", tmp_path.display());
            }
        }
        return Err(AnnotatorError::write(path, err));
    }

    // The rename already landed; some network filesystems reject fsync on a
    // directory handle, which only weakens crash durability of the entry.
    if let Err(err) = fsync_dir(&dir) {
        debug!("Directory fsync skipped for {}: {err}", dir.display());
    }
    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}

fn write_synced(tmp_path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp_path)?;
    file.write_all(data)?;
    file.flush()?;
    file.sync_all()
}

fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// `.{stem}_{uuid}.tmp`: unique across processes and hosts.
fn temp_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{stem}_{}.tmp", Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Read path
// ---------------------------------------------------------------------------

/// Read and decode the document at `path`.
///
/// Returns `Ok(None)` when the file does not exist. I/O and decode failures
/// are retried; once [`READ_ATTEMPTS`] are used up the last failure is
/// returned as [`AnnotatorError::ReadExhausted`].
pub fn read_document<T: DeserializeOwned>(path: &Path) -> AnnotatorResult<Option<T>> {
    let mut attempt = 1;
    loop {
        match try_read(path) {
            Ok(document) => return Ok(document),
            Err(source) if attempt >= READ_ATTEMPTS => {
                return Err(AnnotatorError::ReadExhausted {
                    path: path.to_path_buf(),
                    attempts: attempt,
                    source,
                });
            }
            Err(source) => {
                warn!(
                    "Read attempt {attempt}/{READ_ATTEMPTS} of {} failed: {source}",
                    path.display()
                );
                thread::sleep(READ_BACKOFF * attempt);
                attempt += 1;
            }
        }
    }
}

fn try_read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ReadFailure> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}
