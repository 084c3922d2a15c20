use crate::harness::{CapturedEvent, init_test_tracing};
use linetap_core::conf::CaptureSettings;
use linetap_core::line::LogLine;
use linetap_core::service::{Capture, CaptureService, ShutdownHandle};
use reqwest::blocking::{Client, RequestBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// SSE heartbeat used by test servers, short enough to observe.
pub const TEST_HEARTBEAT: Duration = Duration::from_millis(200);

/// Handle to a running linetap capture with its control plane.
///
/// Lines are fed directly into the writer; no source process is involved.
pub struct TestServer {
    base_url: String,
    client: Client,
    capture: Arc<Capture>,
    service: Option<CaptureService>,
    runtime: Runtime,
    out_dir: TempDir,
}

impl TestServer {
    /// Start with default settings in a fresh output directory.
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    /// Start after letting `customize` adjust the settings.
    ///
    /// The output directory and bind address are filled in first.
    pub fn start_with(customize: impl FnOnce(&mut CaptureSettings)) -> Self {
        // Initialize tracing (this must happen first).
        init_test_tracing(events());

        let out_dir = TempDir::new().expect("failed to create output dir");
        let mut settings = CaptureSettings::default();
        settings.policy.out_dir = out_dir.path().to_path_buf();
        settings.metrics_bind = Some(format!("127.0.0.1:{}", free_port()));
        customize(&mut settings);

        // Server tasks keep running on the worker threads between calls.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("failed to build runtime");

        let capture = Arc::new(runtime.block_on(async {
            Capture::with_echo_sink(
                &settings,
                tokio::runtime::Handle::current(),
                Box::new(io::sink()),
            )
        }));

        let service = runtime
            .block_on(CaptureService::start_with(
                capture.clone(),
                &settings,
                ShutdownHandle::new(),
                |state| state.with_heartbeat(TEST_HEARTBEAT),
            ))
            .expect("failed to start capture service");

        let addr = service.control_addr().expect("control plane not started");
        let base_url = format!("http://{addr}");
        wait_for_server(addr);

        let client = Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .expect("failed to build client");

        Self {
            base_url,
            client,
            capture,
            service: Some(service),
            runtime,
            out_dir,
        }
    }

    /// Convenience helper for GET requests.
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(format!("{}{}", self.base_url, path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(format!("{}{}", self.base_url, path))
    }

    /// A GET whose body may stay open longer than the default timeout.
    pub fn open_stream(&self, path: &str) -> reqwest::blocking::Response {
        Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build client")
            .get(format!("{}{}", self.base_url, path))
            .send()
            .expect("stream request failed")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn capture(&self) -> &Arc<Capture> {
        &self.capture
    }

    pub fn out_dir(&self) -> &Path {
        self.out_dir.path()
    }

    /// Write each line through the capture, as the ingestion loop would.
    pub fn feed(&self, lines: &[&str]) {
        for line in lines {
            self.capture
                .writer()
                .write(&LogLine::from(line.to_string()))
                .expect("write failed");
        }
    }

    /// Files in the output directory other than the active one, sorted.
    pub fn rotated_files(&self) -> Vec<PathBuf> {
        let active = self.capture.writer().current_path();
        let mut files = fs::read_dir(self.out_dir())
            .expect("failed to list output dir")
            .map(|e| e.expect("bad dir entry").path())
            .filter(|p| Some(p) != active.as_ref())
            .collect::<Vec<_>>();
        files.sort();
        files
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            self.runtime.block_on(service.shutdown());
        }
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Events captured so far, across every test server in this process.
pub fn captured_events() -> Vec<CapturedEvent> {
    events().lock().unwrap().clone()
}

/// Poll until the server accepts connections (or panic).
fn wait_for_server(addr: std::net::SocketAddr) {
    let ok = eventually(Duration::from_secs(2), || {
        std::net::TcpStream::connect(addr).is_ok()
    });
    assert!(ok, "server failed to start at {addr}");
}

static EVENTS: OnceLock<Arc<Mutex<Vec<CapturedEvent>>>> = OnceLock::new();

fn events() -> Arc<Mutex<Vec<CapturedEvent>>> {
    EVENTS
        .get_or_init(|| Arc::new(Mutex::new(Vec::new())))
        .clone()
}

/// Allocate a free port on localhost.
/// This is required to avoid port collisions when running tests in parallel.
fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
