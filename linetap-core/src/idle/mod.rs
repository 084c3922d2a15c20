#[cfg(test)]
mod tests;

use crate::line::LogLine;
use crate::metrics::Metrics;
use crate::writer::WriterError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Where idle markers go. Implemented by the rotating writer, so a marker
/// goes through the same line-boundary path as any ingested line.
pub trait LineSink: Send + Sync {
    fn write_marker(&self, line: &LogLine) -> Result<(), WriterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePhase {
    Disabled,
    Armed,
    Fired,
}

struct IdleState {
    last_activity: Instant,
    threshold: Duration,
    phase: IdlePhase,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl IdleState {
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Writes `[IDLE for <N>s]` once per period without real input.
///
/// There is at most one outstanding timer. Every re-arm bumps the
/// generation, so a timer that already woke up but lost the race for the
/// lock sees a stale generation and does nothing.
///
/// Lock order is monitor then writer: `fire` writes the marker while
/// holding the monitor lock, so callers must never `poke` while holding the
/// writer lock.
pub struct IdleMonitor {
    state: Mutex<IdleState>,
    sink: Arc<dyn LineSink>,
    metrics: Arc<Metrics>,
    runtime: Handle,
    this: Weak<IdleMonitor>,
}

impl IdleMonitor {
    /// A disabled monitor. Timers run on `runtime`.
    pub fn new(sink: Arc<dyn LineSink>, metrics: Arc<Metrics>, runtime: Handle) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(IdleState {
                last_activity: Instant::now(),
                threshold: Duration::ZERO,
                phase: IdlePhase::Disabled,
                generation: 0,
                timer: None,
            }),
            sink,
            metrics,
            runtime,
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, IdleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> IdlePhase {
        self.lock().phase
    }

    pub fn threshold(&self) -> Duration {
        self.lock().threshold
    }

    /// Record real activity and restart the countdown.
    pub fn poke(&self) {
        let mut state = self.lock();
        state.last_activity = Instant::now();
        if state.phase == IdlePhase::Fired {
            self.metrics.idle_reset();
        }
        let threshold = state.threshold;
        if threshold.is_zero() {
            return;
        }
        self.arm_locked(&mut state, threshold);
    }

    /// Set the threshold and restart the countdown from now. Zero disables.
    pub fn arm(&self, threshold: Duration) {
        let mut state = self.lock();
        state.threshold = threshold;
        self.metrics.set_idle_threshold(threshold.as_secs_f64());

        if threshold.is_zero() {
            state.cancel();
            if state.phase == IdlePhase::Fired {
                self.metrics.idle_reset();
            }
            state.phase = IdlePhase::Disabled;
            return;
        }
        self.arm_locked(&mut state, threshold);
    }

    /// Cancel the timer for shutdown.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.cancel();
        state.phase = IdlePhase::Disabled;
    }

    fn arm_locked(&self, state: &mut IdleState, delay: Duration) {
        state.cancel();
        state.phase = IdlePhase::Armed;

        let generation = state.generation;
        let monitor = self.this.clone();
        state.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let fired = tokio::task::spawn_blocking(move || {
                if let Some(monitor) = monitor.upgrade() {
                    monitor.fire(generation);
                }
            })
            .await;
            if let Err(e) = fired {
                tracing::warn!(error = %e, "idle timer task failed");
            }
        }));
    }

    fn fire(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.phase != IdlePhase::Armed {
            return;
        }
        // This task is finishing; dropping the handle detaches it.
        state.timer = None;

        let idle_for = state.last_activity.elapsed();
        if idle_for < state.threshold {
            let remaining = state.threshold - idle_for;
            self.arm_locked(&mut state, remaining);
            return;
        }

        let marker = LogLine::from(format!("[IDLE for {}s]\n", idle_for.as_secs()));
        if let Err(e) = self.sink.write_marker(&marker) {
            tracing::warn!(error = %e, "failed to write idle marker");
        }
        self.metrics.idle_triggered();
        state.phase = IdlePhase::Fired;
        tracing::info!(idle_secs = idle_for.as_secs(), "idle threshold reached");
    }
}
