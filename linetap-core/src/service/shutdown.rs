use tokio::sync::watch;

/// Why the service is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    EndOfStream,
    SourceFailed,
    Requested,
}

/// Cloneable one-shot shutdown trigger. The first reason wins.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<Option<ShutdownReason>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Request shutdown. Returns false if it was already requested.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            tracing::info!(?reason, "shutdown requested");
        }
        first
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return ShutdownReason::Requested;
            }
        }
    }

    /// Route Ctrl-C and SIGTERM into this handle.
    pub fn install_signal_handler(&self) -> Result<(), ctrlc::Error> {
        let handle = self.clone();
        ctrlc::set_handler(move || {
            if !handle.trigger(ShutdownReason::Signal) {
                tracing::warn!("second signal received while shutting down");
            }
        })
    }
}
