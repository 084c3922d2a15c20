use crate::writer::RotationPolicy;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Where ingested lines come from, exported as the `mode` label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Unknown,
    Command,
    Stdin,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Unknown => "unknown",
            SourceMode::Command => "cmd",
            SourceMode::Stdin => "stdin",
        }
    }
}

/// Everything the registry tracks. Counters only ever grow.
#[derive(Debug, Clone)]
pub struct MetricsState {
    // counters
    pub lines_total: u64,
    pub bytes_total: u64,
    pub files_rotated_total: u64,
    pub scrapes_total: u64,
    pub streams_connected_total: u64,
    pub streams_disconnected_total: u64,
    pub stream_bytes_sent_total: u64,
    pub stream_lines_dropped_total: u64,
    pub idle_alerts_total: u64,
    pub write_errors_total: u64,

    // gauges
    pub current_file_bytes: u64,
    pub current_file_disk_bytes: u64,
    pub current_compression_ratio: f64,
    pub start_time: f64,
    pub last_rotation_time: f64,
    pub last_write_time: f64,
    pub mode: SourceMode,
    pub process_running: bool,
    pub streams_current: u64,
    pub idle_active: bool,
    pub idle_threshold_seconds: f64,
    pub writer_failing: bool,
    pub config: BTreeMap<&'static str, String>,
    pub current_file_path: String,
    pub metrics_bind: Option<(String, u16)>,
}

impl MetricsState {
    fn new(start_time: f64) -> Self {
        let mut config = BTreeMap::new();
        config.insert("compress", "none".to_string());
        config.insert("echo", "false".to_string());
        config.insert("interval_seconds", "0".to_string());
        config.insert("max_bytes", "0".to_string());
        config.insert("retain", "0".to_string());
        config.insert("ring_size", "25".to_string());
        config.insert("timestamp", "false".to_string());

        Self {
            lines_total: 0,
            bytes_total: 0,
            files_rotated_total: 0,
            scrapes_total: 0,
            streams_connected_total: 0,
            streams_disconnected_total: 0,
            stream_bytes_sent_total: 0,
            stream_lines_dropped_total: 0,
            idle_alerts_total: 0,
            write_errors_total: 0,
            current_file_bytes: 0,
            current_file_disk_bytes: 0,
            current_compression_ratio: 1.0,
            start_time,
            last_rotation_time: 0.0,
            last_write_time: 0.0,
            mode: SourceMode::Unknown,
            process_running: false,
            streams_current: 0,
            idle_active: false,
            idle_threshold_seconds: 0.0,
            writer_failing: false,
            config,
            current_file_path: String::new(),
            metrics_bind: None,
        }
    }
}

/// Thread-safe counter/gauge registry.
///
/// All state sits behind one mutex and every method is a single critical
/// section, so a render can never see half of a compound update (for example
/// a rotation counted but the current-file gauges not yet reset).
#[derive(Debug)]
pub struct Metrics {
    state: Mutex<MetricsState>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MetricsState::new(unix_now())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state, for assertions and JSON views.
    pub fn snapshot(&self) -> MetricsState {
        self.lock().clone()
    }

    /// Render the exposition text without touching any counter.
    pub fn render(&self) -> String {
        let state = self.lock();
        super::render::render(&state, unix_now())
    }

    /// Count a scrape and render, as one atomic step.
    pub fn scrape(&self) -> String {
        let mut state = self.lock();
        state.scrapes_total += 1;
        super::render::render(&state, unix_now())
    }

    pub fn set_mode(&self, mode: SourceMode) {
        self.lock().mode = mode;
    }

    pub fn set_running(&self, running: bool) {
        self.lock().process_running = running;
    }

    /// Account for one line that reached the active file.
    pub fn record_write(&self, bytes: u64, disk_bytes: u64, file_bytes: u64, ratio: f64) {
        let mut s = self.lock();
        s.lines_total += 1;
        s.bytes_total += bytes;
        s.current_file_bytes = file_bytes;
        s.current_file_disk_bytes = disk_bytes;
        s.current_compression_ratio = ratio;
        s.last_write_time = unix_now();
        s.writer_failing = false;
    }

    pub fn write_failed(&self) {
        let mut s = self.lock();
        s.write_errors_total += 1;
        s.writer_failing = true;
    }

    pub fn rotated(&self) {
        let mut s = self.lock();
        s.files_rotated_total += 1;
        s.last_rotation_time = unix_now();
        s.current_file_bytes = 0;
        s.current_file_disk_bytes = 0;
        s.current_compression_ratio = 1.0;
    }

    /// A fresh active file was opened at `path` holding `bytes` already.
    pub fn file_opened(&self, path: &str, bytes: u64, disk_bytes: u64) {
        let mut s = self.lock();
        s.current_file_path = path.to_string();
        s.current_file_bytes = bytes;
        s.current_file_disk_bytes = disk_bytes;
        s.current_compression_ratio = 1.0;
    }

    pub fn file_closed(&self) {
        let mut s = self.lock();
        s.current_file_path.clear();
        s.current_file_bytes = 0;
        s.current_file_disk_bytes = 0;
        s.current_compression_ratio = 1.0;
    }

    /// Mirror the rotation policy (plus ring size) into `config_info` labels.
    pub fn set_policy(&self, policy: &RotationPolicy, ring_size: usize) {
        let mut s = self.lock();
        s.config.insert("compress", policy.compress.as_str().to_string());
        s.config.insert("echo", policy.echo.to_string());
        s.config
            .insert("interval_seconds", policy.interval.as_secs().to_string());
        s.config.insert("max_bytes", policy.max_bytes.to_string());
        s.config.insert("retain", policy.retain.to_string());
        s.config.insert("ring_size", ring_size.to_string());
        s.config.insert("timestamp", policy.timestamp.to_string());
    }

    pub fn set_ring_size(&self, ring_size: usize) {
        self.lock().config.insert("ring_size", ring_size.to_string());
    }

    pub fn set_metrics_bind(&self, host: &str, port: u16) {
        self.lock().metrics_bind = Some((host.to_string(), port));
    }

    pub fn stream_connected(&self) {
        let mut s = self.lock();
        s.streams_connected_total += 1;
        s.streams_current += 1;
    }

    pub fn stream_disconnected(&self) {
        let mut s = self.lock();
        s.streams_disconnected_total += 1;
        s.streams_current = s.streams_current.saturating_sub(1);
    }

    pub fn add_stream_bytes(&self, n: u64) {
        self.lock().stream_bytes_sent_total += n;
    }

    pub fn stream_lines_dropped(&self, n: u64) {
        self.lock().stream_lines_dropped_total += n;
    }

    pub fn idle_triggered(&self) {
        let mut s = self.lock();
        s.idle_alerts_total += 1;
        s.idle_active = true;
    }

    pub fn idle_reset(&self) {
        self.lock().idle_active = false;
    }

    pub fn set_idle_threshold(&self, secs: f64) {
        self.lock().idle_threshold_seconds = secs;
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
