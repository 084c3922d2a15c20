mod subscription;


pub use subscription::Subscription;

use crate::line::LogLine;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default number of recent lines replayed to a new subscriber.
pub const DEFAULT_RING_SIZE: usize = 25;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Outcome of one `publish`, so the caller can account for drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug)]
struct HubInner {
    ring: VecDeque<LogLine>,
    capacity: usize,
    subscribers: HashMap<u64, mpsc::Sender<LogLine>>,
}

/// Recent-history ring plus fan-out to live subscribers.
///
/// Invariants:
/// - `publish` never blocks: a full subscriber queue loses that line, only
///   for that subscriber
/// - `subscribe` snapshots the ring and registers the queue under the same
///   lock, so replay and live delivery neither overlap nor leave a gap
#[derive(Debug)]
pub struct StreamHub {
    inner: Mutex<HubInner>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl StreamHub {
    pub fn new(ring_size: usize) -> Self {
        Self::with_queue_capacity(ring_size, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(ring_size: usize, queue_capacity: usize) -> Self {
        let capacity = ring_size.max(1);
        Self {
            inner: Mutex::new(HubInner {
                ring: VecDeque::with_capacity(capacity),
                capacity,
                subscribers: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, line: &LogLine) -> PublishReport {
        let mut inner = self.lock();

        if inner.ring.len() >= inner.capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(line.clone());

        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        for (id, tx) in &inner.subscribers {
            match try_deliver(tx, line) {
                Delivery::Sent => report.delivered += 1,
                Delivery::Full => report.dropped += 1,
                Delivery::Closed => closed.push(*id),
            }
        }

        for id in closed {
            inner.subscribers.remove(&id);
        }

        report
    }

    /// Register a new subscriber; returns it together with the replay backlog.
    pub fn subscribe(self: &Arc<Self>) -> (Subscription, Vec<LogLine>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let backlog = {
            let mut inner = self.lock();
            inner.subscribers.insert(id, tx);
            inner.ring.iter().cloned().collect()
        };

        tracing::debug!(subscriber = id, "stream subscriber registered");
        (Subscription::new(id, rx, Arc::downgrade(self)), backlog)
    }

    /// Deregister a subscriber. Unknown or already-removed ids are ignored.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = id, "stream subscriber removed");
        }
        removed
    }

    /// Replace the ring with one of capacity `n`, keeping the newest entries.
    pub fn resize(&self, n: usize) {
        let n = n.max(1);
        let mut inner = self.lock();
        let skip = inner.ring.len().saturating_sub(n);
        let ring: VecDeque<LogLine> = inner.ring.iter().skip(skip).cloned().collect();
        inner.ring = ring;
        inner.capacity = n;
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lock().ring.iter().cloned().collect()
    }

    pub fn ring_size(&self) -> usize {
        self.lock().capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Drop every subscriber queue so open streams drain and finish.
    pub fn close_all(&self) {
        let n = {
            let mut inner = self.lock();
            let n = inner.subscribers.len();
            inner.subscribers.clear();
            n
        };
        if n > 0 {
            tracing::info!(subscribers = n, "closed all stream subscribers");
        }
    }
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

/// Non-blocking hand-off: a full queue drops the line instead of waiting.
fn try_deliver(tx: &mpsc::Sender<LogLine>, line: &LogLine) -> Delivery {
    match tx.try_send(line.clone()) {
        Ok(()) => Delivery::Sent,
        Err(TrySendError::Full(_)) => Delivery::Full,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}
