use crate::control::bind::{BindError, bind_with_scan, parse_bind};
use crate::control::{ControlState, endpoint_paths, router};
use std::io;
use std::net::SocketAddr;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A running HTTP control plane.
pub struct ControlServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<io::Result<()>>,
}

impl ControlServer {
    /// Bind `bind` (scanning upward if busy) and start serving.
    pub async fn start(state: ControlState, bind: &str) -> Result<Self, BindError> {
        let (host, port) = parse_bind(bind)?;
        let listener = bind_with_scan(&host, port).await?;
        let local_addr = listener.local_addr().map_err(|source| BindError::Exhausted {
            host: host.clone(),
            port,
            source,
        })?;

        state
            .capture
            .metrics()
            .set_metrics_bind(&host, local_addr.port());

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let app = router(state);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        });

        tracing::info!(
            url = %format!("http://{host}:{}", local_addr.port()),
            paths = ?endpoint_paths(),
            "control plane listening"
        );

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for in-flight requests to finish.
    ///
    /// Open streams only end once the hub closes them.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(Ok(())) => tracing::info!("control plane stopped"),
            Ok(Err(e)) => tracing::warn!(error = %e, "control plane exited with error"),
            Err(e) => tracing::warn!(error = %e, "control plane task failed"),
        }
    }
}
