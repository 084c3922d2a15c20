use crate::conf::{CaptureSettings, ConfigUpdate, Updated};
use crate::hub::StreamHub;
use crate::idle::IdleMonitor;
use crate::metrics::Metrics;
use crate::source::SourceSpec;
use crate::writer::{
    EchoSink, PolicyField, RotatingWriter, RotationPolicy, RotationReport, WriterError,
};
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// What a `/rotate` request did.
#[derive(Debug, Clone, PartialEq)]
pub enum RotateResult {
    /// Soft request: the rotation happens after the next line.
    Scheduled { current_file: Option<PathBuf> },
    Rotated(RotationReport),
}

/// Result of applying a validated config update.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub updated: Updated,
    /// Present when the update asked for an immediate rotation.
    pub rotation: Option<Result<RotationReport, WriterError>>,
}

/// Live settings plus state, as served by `GET /config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigView {
    pub out_dir: String,
    pub prefix: String,
    pub compress: String,
    pub retain: usize,
    pub max_bytes: u64,
    pub interval_seconds: u64,
    pub echo: bool,
    pub timestamp: bool,
    pub ring_size: usize,
    pub idle_alert_secs: f64,
    pub current_file: String,
    pub bytes_written: u64,
    pub rotation_pending: bool,
    pub source: String,
}

/// The shared capture state: writer, hub, metrics and idle monitor.
///
/// Everything the control plane does goes through here.
pub struct Capture {
    writer: Arc<RotatingWriter>,
    hub: Arc<StreamHub>,
    metrics: Arc<Metrics>,
    idle: Arc<IdleMonitor>,
    source: SourceSpec,
}

impl Capture {
    pub fn new(settings: &CaptureSettings, runtime: Handle) -> Self {
        Self::with_echo_sink(settings, runtime, Box::new(io::stdout()))
    }

    pub fn with_echo_sink(settings: &CaptureSettings, runtime: Handle, echo: EchoSink) -> Self {
        let metrics = Arc::new(Metrics::new());
        let hub = Arc::new(StreamHub::new(settings.ring_size));
        let writer = Arc::new(RotatingWriter::with_echo_sink(
            settings.policy.clone(),
            metrics.clone(),
            hub.clone(),
            echo,
        ));
        let idle = IdleMonitor::new(writer.clone(), metrics.clone(), runtime);

        metrics.set_mode(settings.source.mode());

        Self {
            writer,
            hub,
            metrics,
            idle,
            source: settings.source.clone(),
        }
    }

    pub fn writer(&self) -> &Arc<RotatingWriter> {
        &self.writer
    }

    pub fn hub(&self) -> &Arc<StreamHub> {
        &self.hub
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn idle(&self) -> &Arc<IdleMonitor> {
        &self.idle
    }

    pub fn source(&self) -> &SourceSpec {
        &self.source
    }

    /// Hard rotation now, or a soft request honored after the next line.
    pub fn rotate(&self, soft: bool) -> Result<RotateResult, WriterError> {
        if soft {
            self.writer.request_rotation();
            tracing::info!("rotation scheduled for the next line");
            return Ok(RotateResult::Scheduled {
                current_file: self.writer.current_path(),
            });
        }
        self.writer.rotate().map(RotateResult::Rotated)
    }

    pub fn config_view(&self) -> ConfigView {
        let policy = self.writer.policy();
        ConfigView {
            out_dir: policy.out_dir.display().to_string(),
            prefix: policy.prefix.clone(),
            compress: policy.compress.as_str().to_string(),
            retain: policy.retain,
            max_bytes: policy.max_bytes,
            interval_seconds: policy.interval.as_secs(),
            echo: policy.echo,
            timestamp: policy.timestamp,
            ring_size: self.hub.ring_size(),
            idle_alert_secs: self.idle.threshold().as_secs_f64(),
            current_file: self
                .writer
                .current_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            bytes_written: self.writer.bytes_written(),
            rotation_pending: self.writer.rotation_pending(),
            source: self.source.describe(),
        }
    }

    /// Apply a validated update.
    ///
    /// `updated` lists exactly the fields whose value changed. An immediate
    /// rotation, if asked for, runs after the new policy is in place.
    pub fn apply_config(&self, update: &ConfigUpdate) -> ApplyOutcome {
        let mut updated = Updated::new();

        let changed = self.writer.apply_policy(&update.policy);
        if !changed.is_empty() {
            let policy = self.writer.policy();
            for field in changed {
                updated.insert(field.as_str().to_string(), policy_value(&policy, field));
            }
        }

        if let Some(ring_size) = update.ring_size {
            if ring_size != self.hub.ring_size() {
                self.hub.resize(ring_size);
                self.metrics.set_ring_size(ring_size);
                updated.insert("ring_size".to_string(), ring_size.into());
            }
        }

        if let Some(threshold) = update.idle_alert {
            if threshold != self.idle.threshold() {
                self.idle.arm(threshold);
                updated.insert(
                    "idle_alert_secs".to_string(),
                    threshold.as_secs_f64().into(),
                );
            }
        }

        let rotation = update.rotate_now.then(|| self.writer.rotate());

        tracing::info!(
            fields = ?updated.keys().collect::<Vec<_>>(),
            rotate_now = update.rotate_now,
            "configuration updated"
        );
        ApplyOutcome { updated, rotation }
    }

    /// Arm the idle monitor with its startup threshold.
    pub(crate) fn arm_idle(&self, threshold: Duration) {
        self.metrics.set_idle_threshold(threshold.as_secs_f64());
        if !threshold.is_zero() {
            self.idle.arm(threshold);
        }
    }
}

fn policy_value(policy: &RotationPolicy, field: PolicyField) -> Value {
    match field {
        PolicyField::OutDir => policy.out_dir.display().to_string().into(),
        PolicyField::Prefix => policy.prefix.clone().into(),
        PolicyField::Compress => policy.compress.as_str().into(),
        PolicyField::Retain => policy.retain.into(),
        PolicyField::MaxBytes => policy.max_bytes.into(),
        PolicyField::Interval => policy.interval.as_secs().into(),
        PolicyField::Echo => policy.echo.into(),
        PolicyField::Timestamp => policy.timestamp.into(),
    }
}
