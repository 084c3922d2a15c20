
use crate::idle::IdleMonitor;
use crate::line::LogLine;
use crate::writer::{RotatingWriter, WriterError};
use std::io::{self, BufRead};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Totals for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub bytes: u64,
    pub failed: u64,
}

/// Why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEnd {
    EndOfStream,
    Stopped,
    WriterClosed,
}

/// Cloneable stop switch for a running ingestor.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pulls lines from a source and hands them to the writer, one at a time.
///
/// This is the only producer of real lines. The idle monitor is poked after
/// the writer returns, never while its lock is held.
pub struct Ingestor {
    writer: Arc<RotatingWriter>,
    idle: Option<Arc<IdleMonitor>>,
    stop: StopFlag,
}

impl Ingestor {
    pub fn new(writer: Arc<RotatingWriter>, idle: Option<Arc<IdleMonitor>>) -> Self {
        Self {
            writer,
            idle,
            stop: StopFlag::default(),
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Run until end of stream, a stop request, or the writer closing.
    ///
    /// A final line without a newline is persisted as-is. Write failures are
    /// counted and skipped; read failures end the run.
    pub fn run<R: BufRead>(&self, mut reader: R) -> io::Result<(IngestEnd, IngestStats)> {
        let mut stats = IngestStats::default();
        let mut buf = Vec::with_capacity(4096);

        loop {
            if self.stop.is_stopped() {
                return Ok((IngestEnd::Stopped, stats));
            }

            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => return Ok((IngestEnd::EndOfStream, stats)),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let line = LogLine::new(buf.clone());
            match self.writer.write(&line) {
                Ok(outcome) => {
                    stats.lines += 1;
                    stats.bytes += outcome.bytes as u64;
                    if let Some(idle) = &self.idle {
                        idle.poke();
                    }
                }
                Err(WriterError::Closed) => return Ok((IngestEnd::WriterClosed, stats)),
                Err(e) => {
                    stats.failed += 1;
                    tracing::debug!(error = %e, "line dropped");
                }
            }
        }
    }
}
