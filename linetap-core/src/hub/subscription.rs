use super::StreamHub;
use crate::line::LogLine;
use std::sync::Weak;
use tokio::sync::mpsc;

/// A registered live consumer of the hub.
///
/// Invariants:
/// - The queue is deregistered exactly once, either by `close()` or on Drop
/// - Holding a subscription never keeps the hub alive
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<LogLine>,
    hub: Weak<StreamHub>,
    closed: bool,
}

impl Subscription {
    pub(super) fn new(id: u64, rx: mpsc::Receiver<LogLine>, hub: Weak<StreamHub>) -> Self {
        Self {
            id,
            rx,
            hub,
            closed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next live line. `None` once the hub dropped this queue.
    pub async fn recv(&mut self) -> Option<LogLine> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LogLine> {
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
