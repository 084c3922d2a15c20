mod bind;
mod handlers;
mod server;
mod stream;


pub use bind::{BindError, PORT_SCAN_SPAN, bind_with_scan, candidate_ports, parse_bind};
pub use server::ControlServer;
pub use stream::{Framing, HEARTBEAT_INTERVAL, StreamConnection, line_stream};

use crate::service::Capture;
use axum::Router;
use axum::routing::{MethodRouter, get};
use std::sync::Arc;
use std::time::Duration;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ControlState {
    pub(crate) capture: Arc<Capture>,
    pub(crate) heartbeat: Duration,
}

impl ControlState {
    pub fn new(capture: Arc<Capture>) -> Self {
        Self {
            capture,
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    /// Override the SSE heartbeat interval.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlEndpoint {
    Metrics,
    Health,
    Stream,
    Rotate,
    Config,
}

impl ControlEndpoint {
    const ALL: [ControlEndpoint; 5] = [
        ControlEndpoint::Metrics,
        ControlEndpoint::Health,
        ControlEndpoint::Stream,
        ControlEndpoint::Rotate,
        ControlEndpoint::Config,
    ];

    fn path(&self) -> &'static str {
        match self {
            ControlEndpoint::Metrics => "/metrics",
            ControlEndpoint::Health => "/healthz",
            ControlEndpoint::Stream => "/stream",
            ControlEndpoint::Rotate => "/rotate",
            ControlEndpoint::Config => "/config",
        }
    }

    fn methods(&self) -> MethodRouter<ControlState> {
        match self {
            ControlEndpoint::Metrics => get(handlers::metrics),
            ControlEndpoint::Health => get(handlers::healthz),
            ControlEndpoint::Stream => get(handlers::stream),
            ControlEndpoint::Rotate => get(handlers::rotate).post(handlers::rotate),
            ControlEndpoint::Config => get(handlers::get_config).post(handlers::post_config),
        }
    }
}

/// Paths served, for the startup log line.
pub fn endpoint_paths() -> Vec<&'static str> {
    ControlEndpoint::ALL.iter().map(|e| e.path()).collect()
}

/// Every endpoint answers with or without a trailing slash; anything else
/// is a 404.
pub fn router(state: ControlState) -> Router {
    let mut router = Router::new();
    for endpoint in ControlEndpoint::ALL {
        let path = endpoint.path();
        router = router
            .route(path, endpoint.methods())
            .route(&format!("{path}/"), endpoint.methods());
    }
    router.with_state(state)
}
