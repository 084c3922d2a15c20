mod capture;
mod shutdown;

#[cfg(test)]
mod tests;

pub use capture::{ApplyOutcome, Capture, ConfigView, RotateResult};
pub use shutdown::{ShutdownHandle, ShutdownReason};

use crate::conf::CaptureSettings;
use crate::control::{ControlServer, ControlState};
use crate::ingest::{IngestEnd, Ingestor, StopFlag};
use crate::source::{ChildHandle, OpenSource};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::runtime::Handle;

/// Upper bound on waiting for background compression at shutdown.
pub const FINALIZE_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on waiting for a killed child to exit.
const CHILD_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A running capture: writer and idle monitor, the optional control plane,
/// and the ingestion thread once started.
pub struct CaptureService {
    capture: Arc<Capture>,
    control: Option<ControlServer>,
    shutdown: ShutdownHandle,
    ingest: Option<IngestThread>,
}

struct IngestThread {
    stop: StopFlag,
    child: Option<ChildHandle>,
    thread: JoinHandle<()>,
}

impl CaptureService {
    /// Open the first output file, arm the idle monitor and, if configured,
    /// start the control plane. Must run inside a Tokio runtime.
    pub async fn start(settings: &CaptureSettings, shutdown: ShutdownHandle) -> Result<Self> {
        let capture = Arc::new(Capture::new(settings, Handle::current()));
        Self::start_with(capture, settings, shutdown, |state| state).await
    }

    /// Like `start`, with a prepared capture and a hook to adjust the
    /// control-plane state.
    pub async fn start_with(
        capture: Arc<Capture>,
        settings: &CaptureSettings,
        shutdown: ShutdownHandle,
        control: impl FnOnce(ControlState) -> ControlState,
    ) -> Result<Self> {
        let first = capture
            .writer()
            .open()
            .context("failed to open the initial output file")?;
        tracing::info!(file = %first.display(), "capturing");

        capture.arm_idle(settings.idle_alert);

        let control = match &settings.metrics_bind {
            Some(bind) => {
                let state = control(ControlState::new(capture.clone()));
                let server = ControlServer::start(state, bind)
                    .await
                    .context("failed to start the HTTP control plane")?;
                Some(server)
            }
            None => None,
        };

        Ok(Self {
            capture,
            control,
            shutdown,
            ingest: None,
        })
    }

    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.as_ref().map(ControlServer::local_addr)
    }

    /// Start the ingestion thread. End of stream or a read failure requests
    /// shutdown.
    pub fn start_ingest(&mut self, source: OpenSource) -> Result<()> {
        let ingestor = Ingestor::new(
            self.capture.writer().clone(),
            Some(self.capture.idle().clone()),
        );
        let stop = ingestor.stop_flag();
        let shutdown = self.shutdown.clone();
        let metrics = self.capture.metrics().clone();
        let reader = source.reader;

        metrics.set_running(true);
        let thread = thread::Builder::new()
            .name("linetap-ingest".to_string())
            .spawn(move || {
                let reason = match ingestor.run(reader) {
                    Ok((IngestEnd::EndOfStream, stats)) => {
                        tracing::info!(lines = stats.lines, bytes = stats.bytes, "end of input");
                        ShutdownReason::EndOfStream
                    }
                    Ok((end, stats)) => {
                        tracing::info!(?end, lines = stats.lines, "ingestion stopped");
                        ShutdownReason::Requested
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "reading input failed");
                        ShutdownReason::SourceFailed
                    }
                };
                metrics.set_running(false);
                shutdown.trigger(reason);
            })
            .context("failed to spawn the ingestion thread")?;

        self.ingest = Some(IngestThread {
            stop,
            child: source.child,
            thread,
        });
        Ok(())
    }

    /// Orderly teardown: stop ingestion, finalize the active file, wait for
    /// compression, stop the idle timer, end streams, stop HTTP.
    pub async fn shutdown(mut self) {
        if let Some(ingest) = self.ingest.take() {
            ingest.stop.stop();
            if let Some(child) = &ingest.child {
                child.kill();
                let child = child.clone();
                let code = tokio::task::spawn_blocking(move || child.wait(CHILD_EXIT_TIMEOUT))
                    .await
                    .ok()
                    .flatten();
                tracing::info!(exit_code = ?code, "source command ended");
            }
            // A thread blocked on stdin cannot be interrupted; it is left to
            // exit with the process.
            if !ingest.thread.is_finished() {
                tracing::debug!("ingestion thread still blocked on input");
            }
        }
        self.capture.metrics().set_running(false);

        let writer = self.capture.writer().clone();
        let finalized = tokio::task::spawn_blocking(move || {
            let finalized = writer.close();
            writer.join_finalizers(FINALIZE_JOIN_TIMEOUT);
            finalized
        })
        .await;
        match finalized {
            Ok(Some(path)) => tracing::info!(file = %path.display(), "finalized active file"),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "finalize task failed"),
        }

        self.capture.idle().stop();
        self.capture.hub().close_all();

        if let Some(control) = self.control.take() {
            control.stop().await;
        }
        tracing::info!("shutdown complete");
    }
}

/// Run a capture until the source ends or a signal arrives.
pub async fn run(settings: CaptureSettings) -> Result<ShutdownReason> {
    let shutdown = ShutdownHandle::new();
    shutdown
        .install_signal_handler()
        .context("failed to install the signal handler")?;

    let mut service = CaptureService::start(&settings, shutdown.clone()).await?;

    let source = crate::source::open(&settings.source).context("failed to open the input source")?;
    if let Err(e) = service.start_ingest(source) {
        service.shutdown().await;
        return Err(e);
    }

    let reason = shutdown.wait().await;
    service.shutdown().await;
    Ok(reason)
}
