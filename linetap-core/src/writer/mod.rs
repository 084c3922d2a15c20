mod active;
mod error;
mod finalize;
mod naming;
mod policy;

#[cfg(test)]
mod tests;

pub use error::WriterError;
pub use finalize::{Finalizers, gzip_in_place, prune_retention};
pub use naming::{current_file_name, is_rotated_name, rotated_file_name};
pub use policy::{CompressMode, PolicyDelta, PolicyField, RotationPolicy};

use crate::hub::StreamHub;
use crate::idle::LineSink;
use crate::line::LogLine;
use crate::metrics::Metrics;
use active::ActiveFile;
use arc_swap::ArcSwap;
use chrono::{Local, SecondsFormat};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Local copy of each persisted line, when `echo` is on.
pub type EchoSink = Box<dyn Write + Send>;

/// Result of a single successful `write`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    /// Bytes persisted, timestamp prefix included.
    pub bytes: usize,
    /// Set when this write tripped a rotation.
    pub rotation: Option<RotationReport>,
}

/// What a rotation closed and what it opened.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationReport {
    /// Final name of the closed file. `None` when nothing was open.
    ///
    /// For `after` mode this is the plaintext name; the `.gz` appears once
    /// background compression completes.
    pub previous_file: Option<PathBuf>,
    pub current_file: PathBuf,
}

struct WriterState {
    active: Option<ActiveFile>,
    closed: bool,
}

/// Owns the active output file and applies the rotation policy.
///
/// One mutex serializes writes, rotations and close. The policy is read
/// lock-free on every line and only ever replaced whole.
pub struct RotatingWriter {
    policy: ArcSwap<RotationPolicy>,
    state: Mutex<WriterState>,
    rotation_pending: AtomicBool,
    seq: AtomicU64,
    metrics: Arc<Metrics>,
    hub: Arc<StreamHub>,
    finalizers: Arc<Finalizers>,
    echo: Mutex<EchoSink>,
}

impl RotatingWriter {
    pub fn new(policy: RotationPolicy, metrics: Arc<Metrics>, hub: Arc<StreamHub>) -> Self {
        Self::with_echo_sink(policy, metrics, hub, Box::new(io::stdout()))
    }

    pub fn with_echo_sink(
        policy: RotationPolicy,
        metrics: Arc<Metrics>,
        hub: Arc<StreamHub>,
        echo: EchoSink,
    ) -> Self {
        metrics.set_policy(&policy, hub.ring_size());
        Self {
            policy: ArcSwap::from_pointee(policy),
            state: Mutex::new(WriterState {
                active: None,
                closed: false,
            }),
            rotation_pending: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            metrics,
            hub,
            finalizers: Arc::new(Finalizers::new()),
            echo: Mutex::new(echo),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the initial active file. Startup treats a failure as fatal.
    pub fn open(&self) -> Result<PathBuf, WriterError> {
        let mut state = self.lock();
        if state.closed {
            return Err(WriterError::Closed);
        }
        if let Some(active) = &state.active {
            return Ok(active.path.clone());
        }
        let policy = self.policy.load_full();
        self.open_locked(&mut state, &policy)
    }

    pub fn policy(&self) -> Arc<RotationPolicy> {
        self.policy.load_full()
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock().active.as_ref().map(|a| a.path.clone())
    }

    /// Uncompressed bytes in the active file.
    pub fn bytes_written(&self) -> u64 {
        self.lock().active.as_ref().map_or(0, |a| a.bytes_written)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Persist one line, then rotate if a trigger fired.
    pub fn write(&self, line: &LogLine) -> Result<WriteOutcome, WriterError> {
        let mut state = self.lock();
        if state.closed {
            return Err(WriterError::Closed);
        }

        let policy = self.policy.load_full();
        let line = if policy.timestamp {
            line.prefixed(timestamp_prefix().as_bytes())
        } else {
            line.clone()
        };

        if policy.echo {
            self.echo_line(&line);
        }

        if state.active.is_none() {
            if let Err(e) = self.open_locked(&mut state, &policy) {
                self.metrics.write_failed();
                return Err(e);
            }
        }
        let Some(active) = state.active.as_mut() else {
            return Err(WriterError::Closed);
        };

        if let Err(source) = active.write_line(line.as_bytes()) {
            let path = active.path.clone();
            // Drop the handle; the next line reopens the file.
            if let Some(broken) = state.active.take() {
                let _ = broken.finish();
            }
            self.metrics.write_failed();
            tracing::warn!(file = %path.display(), error = %source, "write failed");
            return Err(WriterError::Write { path, source });
        }

        self.metrics.record_write(
            line.len() as u64,
            active.disk_bytes(),
            active.bytes_written,
            active.compression_ratio(),
        );

        let report = self.hub.publish(&line);
        if report.dropped > 0 {
            self.metrics.stream_lines_dropped(report.dropped as u64);
        }

        let size_due = policy.max_bytes > 0 && active.bytes_written >= policy.max_bytes;
        let time_due = !policy.interval.is_zero() && active.opened_at.elapsed() >= policy.interval;
        let requested = self.rotation_pending.swap(false, Ordering::AcqRel);

        let mut rotation = None;
        if size_due || time_due || requested {
            tracing::debug!(size_due, time_due, requested, "rotation triggered");
            match self.rotate_locked(&mut state, &policy) {
                Ok(r) => rotation = Some(r),
                Err(e) => {
                    // The line itself is on disk; the next write retries the open.
                    self.metrics.write_failed();
                    tracing::warn!(error = %e, "rotation failed to open a new file");
                }
            }
        }

        Ok(WriteOutcome {
            bytes: line.len(),
            rotation,
        })
    }

    /// Rotate immediately, between two lines.
    pub fn rotate(&self) -> Result<RotationReport, WriterError> {
        let mut state = self.lock();
        if state.closed {
            return Err(WriterError::Closed);
        }
        let policy = self.policy.load_full();
        self.rotation_pending.store(false, Ordering::Release);
        self.rotate_locked(&mut state, &policy)
    }

    /// Rotate after the next line is written.
    pub fn request_rotation(&self) {
        self.rotation_pending.store(true, Ordering::Release);
    }

    pub fn rotation_pending(&self) -> bool {
        self.rotation_pending.load(Ordering::Acquire)
    }

    /// Merge a validated update and swap the policy in one step.
    ///
    /// Changes that affect the file itself (directory, prefix, compression)
    /// take effect at the next line boundary.
    pub fn apply_policy(&self, delta: &PolicyDelta) -> Vec<PolicyField> {
        // Held so concurrent updates cannot lose each other's fields.
        let _state = self.lock();

        let mut next = RotationPolicy::clone(&self.policy.load());
        let changed = delta.apply_to(&mut next);
        if changed.is_empty() {
            return changed;
        }

        if changed.iter().any(PolicyField::needs_new_file) {
            self.rotation_pending.store(true, Ordering::Release);
        }
        self.metrics.set_policy(&next, self.hub.ring_size());
        self.policy.store(Arc::new(next));

        tracing::info!(
            fields = ?changed.iter().map(PolicyField::as_str).collect::<Vec<_>>(),
            "rotation policy updated"
        );
        changed
    }

    /// Finalize the active file and refuse all further writes.
    ///
    /// A file that never received a byte is removed instead of rotated.
    pub fn close(&self) -> Option<PathBuf> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.closed = true;

        let policy = self.policy.load_full();
        let finalized = state
            .active
            .take()
            .and_then(|active| self.finalize(active, &policy, true));
        self.metrics.file_closed();
        finalized
    }

    /// Wait for background compression, bounded by `timeout`.
    pub fn join_finalizers(&self, timeout: Duration) -> bool {
        let done = self.finalizers.join(timeout);
        if !done {
            tracing::warn!(
                pending = self.finalizers.pending(),
                "background compression still running at shutdown"
            );
        }
        done
    }

    fn open_locked(
        &self,
        state: &mut WriterState,
        policy: &RotationPolicy,
    ) -> Result<PathBuf, WriterError> {
        let active = ActiveFile::open(policy)?;
        let path = active.path.clone();
        self.metrics.file_opened(
            &path.display().to_string(),
            active.bytes_written,
            active.disk_bytes(),
        );
        tracing::debug!(file = %path.display(), "opened active file");
        state.active = Some(active);
        Ok(path)
    }

    fn rotate_locked(
        &self,
        state: &mut WriterState,
        policy: &RotationPolicy,
    ) -> Result<RotationReport, WriterError> {
        let previous_file = state
            .active
            .take()
            .and_then(|active| self.finalize(active, policy, false));
        self.metrics.rotated();

        let current_file = self.open_locked(state, policy)?;
        tracing::info!(
            previous = ?previous_file,
            current = %current_file.display(),
            "rotated"
        );
        Ok(RotationReport {
            previous_file,
            current_file,
        })
    }

    /// Close, rename, then compress and prune.
    ///
    /// Returns the rotated name, or the active path if the rename failed.
    fn finalize(
        &self,
        active: ActiveFile,
        policy: &RotationPolicy,
        drop_untouched: bool,
    ) -> Option<PathBuf> {
        let untouched = active.is_untouched();
        let path = active.path.clone();
        let dir = active.dir.clone();
        let prefix = active.prefix.clone();
        let compress = active.compress;

        if let Err(e) = active.finish() {
            tracing::warn!(file = %path.display(), error = %e, "failed to close active file");
        }

        if drop_untouched && untouched {
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(file = %path.display(), error = %e, "failed to remove empty file");
            }
            return None;
        }

        let rotated = naming::next_rotated_path(
            &dir,
            &prefix,
            compress == CompressMode::Inline,
            &self.seq,
        );
        let finalized = match fs::rename(&path, &rotated) {
            Ok(()) => rotated,
            Err(e) => {
                tracing::warn!(
                    from = %path.display(),
                    to = %rotated.display(),
                    error = %e,
                    "rename failed; leaving file in place"
                );
                return Some(path);
            }
        };

        // Retention follows the file's own prefix and directory, which may
        // differ from the policy after a live change.
        let retain = policy.retain;

        if compress == CompressMode::After {
            let target = finalized.clone();
            self.finalizers.spawn(move || {
                match gzip_in_place(&target) {
                    Ok(gz) => tracing::debug!(file = %gz.display(), "compressed rotated file"),
                    Err(e) => tracing::warn!(
                        file = %target.display(),
                        error = %e,
                        "compression failed; keeping plaintext"
                    ),
                }
                prune_retention(&dir, &prefix, retain);
            });
        } else {
            prune_retention(&dir, &prefix, retain);
        }

        Some(finalized)
    }

    fn echo_line(&self, line: &LogLine) {
        let mut echo = self.echo.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = echo.write_all(line.as_bytes()).and_then(|_| echo.flush()) {
            tracing::debug!(error = %e, "echo failed");
        }
    }
}

impl LineSink for RotatingWriter {
    fn write_marker(&self, line: &LogLine) -> Result<(), WriterError> {
        self.write(line).map(|_| ())
    }
}

fn timestamp_prefix() -> String {
    let mut ts = Local::now().to_rfc3339_opts(SecondsFormat::Micros, false);
    ts.push(' ');
    ts
}
