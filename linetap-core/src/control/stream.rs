use crate::hub::{StreamHub, Subscription};
use crate::line::LogLine;
use crate::metrics::Metrics;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Default silence before an SSE heartbeat comment.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) const OPENED_FRAME: &[u8] = b": stream opened\n\n";
pub(crate) const HEARTBEAT_FRAME: &[u8] = b": heartbeat\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `text/event-stream`, one `data:` event per line.
    Sse,
    /// Bytes exactly as written.
    Raw,
}

impl Framing {
    pub fn content_type(&self) -> &'static str {
        match self {
            Framing::Sse => "text/event-stream; charset=utf-8",
            Framing::Raw => "text/plain; charset=utf-8",
        }
    }

    /// Encode one line for the wire.
    pub fn frame(&self, line: &LogLine) -> Bytes {
        match self {
            Framing::Raw => line.bytes(),
            Framing::Sse => {
                let payload = line.as_bytes();
                let mut out = BytesMut::with_capacity(payload.len() + 16);
                for part in payload.split_inclusive(|b| *b == b'\n') {
                    out.put_slice(b"data: ");
                    out.put_slice(part);
                }
                if !line.ends_with_newline() {
                    out.put_u8(b'\n');
                }
                out.put_u8(b'\n');
                out.freeze()
            }
        }
    }
}

/// Counts one `/stream` connection for as long as it lives.
///
/// Invariants:
/// - connected is recorded when the guard is created
/// - disconnected is recorded exactly once, on Drop
pub struct StreamConnection {
    metrics: Arc<Metrics>,
}

impl StreamConnection {
    pub fn open(metrics: Arc<Metrics>) -> Self {
        metrics.stream_connected();
        Self { metrics }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.metrics.stream_disconnected();
        tracing::debug!("stream client disconnected");
    }
}

enum Phase {
    Opening,
    Replay,
    Live,
}

struct StreamState {
    phase: Phase,
    framing: Framing,
    backlog: VecDeque<LogLine>,
    subscription: Subscription,
    heartbeat: Duration,
    connection: StreamConnection,
}

impl StreamState {
    fn deliver(&self, line: &LogLine) -> Bytes {
        self.connection.metrics.add_stream_bytes(line.len() as u64);
        self.framing.frame(line)
    }
}

/// Body stream for one `/stream` client: opening comment, ring replay, then
/// live lines with heartbeats.
///
/// It ends when the hub closes; a client hang-up drops it, which
/// deregisters the subscriber and records the disconnect.
pub fn line_stream(
    hub: &Arc<StreamHub>,
    metrics: Arc<Metrics>,
    framing: Framing,
    heartbeat: Duration,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let (subscription, backlog) = hub.subscribe();
    let state = StreamState {
        phase: Phase::Opening,
        framing,
        backlog: backlog.into(),
        subscription,
        heartbeat,
        connection: StreamConnection::open(metrics),
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            match state.phase {
                Phase::Opening => {
                    state.phase = Phase::Replay;
                    if state.framing == Framing::Sse {
                        return Some((Ok(Bytes::from_static(OPENED_FRAME)), state));
                    }
                }
                Phase::Replay => match state.backlog.pop_front() {
                    Some(line) => {
                        let frame = state.deliver(&line);
                        return Some((Ok(frame), state));
                    }
                    None => state.phase = Phase::Live,
                },
                Phase::Live => {
                    match tokio::time::timeout(state.heartbeat, state.subscription.recv()).await {
                        Ok(Some(line)) => {
                            let frame = state.deliver(&line);
                            return Some((Ok(frame), state));
                        }
                        Ok(None) => return None,
                        Err(_) if state.framing == Framing::Sse => {
                            return Some((Ok(Bytes::from_static(HEARTBEAT_FRAME)), state));
                        }
                        Err(_) => {}
                    }
                }
            }
        }
    })
}
