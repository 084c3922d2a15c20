use crate::writer::naming::{RotationKey, rotation_key};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Tracks detached post-rotation work so shutdown can wait for it.
///
/// Nothing flows back to the writer; the count exists only for `join`.
#[derive(Debug, Default)]
pub struct Finalizers {
    pending: Mutex<usize>,
    done: Condvar,
}

impl Finalizers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` on its own detached thread.
    pub fn spawn<F>(self: &Arc<Self>, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let guard = PendingGuard {
            finalizers: self.clone(),
        };

        let spawned = thread::Builder::new()
            .name("linetap-finalize".to_string())
            .spawn(move || {
                let _guard = guard;
                work();
            });

        // A failed spawn drops the closure, and with it the guard.
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "failed to spawn finalize thread");
        }
    }

    /// Wait until no work is pending or `timeout` elapses. Returns true when
    /// everything finished.
    pub fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            pending = self
                .done
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Decrements the pending count even if the work panics.
struct PendingGuard {
    finalizers: Arc<Finalizers>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self
            .finalizers
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *pending = pending.saturating_sub(1);
        self.finalizers.done.notify_all();
    }
}

/// Gzip `path` into `path.gz` and remove the plaintext.
///
/// The archive is built under `path.gz.tmp` and renamed into place, so a
/// retention scan never sees a partial file. On failure the temporary is
/// removed and the plaintext is kept.
pub fn gzip_in_place(path: &Path) -> io::Result<PathBuf> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);
    let mut tmp_name = gz_path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = (|| {
        let mut src = BufReader::new(File::open(path)?);
        let dst = BufWriter::new(File::create(&tmp_path)?);
        let mut encoder = GzEncoder::new(dst, Compression::default());
        io::copy(&mut src, &mut encoder)?;
        encoder.finish()?.flush()?;
        fs::rename(&tmp_path, &gz_path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    // Retention may already have removed the plaintext.
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    Ok(gz_path)
}

/// Delete rotated files for `prefix` in `dir` beyond the newest `retain`.
///
/// Age is the stamp and sequence in the name. A plaintext and its `.gz` are
/// one rotation. Errors on individual files are ignored; returns how many
/// files were deleted.
pub fn prune_retention(dir: &Path, prefix: &str, retain: usize) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "retention scan failed");
            return 0;
        }
    };

    let mut rotations: BTreeMap<RotationKey, Vec<PathBuf>> = BTreeMap::new();
    for entry in entries.filter_map(Result::ok) {
        let Some(key) = entry
            .file_name()
            .to_str()
            .and_then(|name| rotation_key(name, prefix))
        else {
            continue;
        };
        if entry.file_type().is_ok_and(|t| t.is_file()) {
            rotations.entry(key).or_default().push(entry.path());
        }
    }

    let mut deleted = 0;
    for path in rotations.into_values().rev().skip(retain).flatten() {
        match fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                tracing::debug!(file = %path.display(), "retention removed rotated file");
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "retention delete failed");
            }
        }
    }
    deleted
}
