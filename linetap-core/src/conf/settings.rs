use crate::conf::error::SettingsError;
use crate::conf::units::{parse_interval, parse_size};
use crate::hub::DEFAULT_RING_SIZE;
use crate::source::{CommandSpec, SourceSpec};
use crate::writer::{CompressMode, RotationPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_METRICS_BIND: &str = "0.0.0.0:9108";

/// A size given as a byte count or a string such as `25M`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SizeSetting {
    Bytes(u64),
    Text(String),
}

impl TryFrom<SizeSetting> for u64 {
    type Error = String;

    fn try_from(value: SizeSetting) -> Result<Self, Self::Error> {
        match value {
            SizeSetting::Bytes(n) => Ok(n),
            SizeSetting::Text(s) => parse_size(&s),
        }
    }
}

/// An interval given as seconds or a string such as `10m`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum IntervalSetting {
    Seconds(u64),
    Text(String),
}

impl TryFrom<IntervalSetting> for Duration {
    type Error = String;

    fn try_from(value: IntervalSetting) -> Result<Self, Self::Error> {
        match value {
            IntervalSetting::Seconds(n) => Ok(Duration::from_secs(n)),
            IntervalSetting::Text(s) => parse_interval(&s),
        }
    }
}

/// One settings layer. Every key is optional; the TOML file and the command
/// line both produce one, and `overlay` stacks them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub cmd: Option<String>,
    pub env: Option<BTreeMap<String, String>>,
    pub cwd: Option<PathBuf>,
    pub out_dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub max_bytes: Option<SizeSetting>,
    pub interval: Option<IntervalSetting>,
    pub compress: Option<CompressMode>,
    pub retain: Option<usize>,
    pub echo: Option<bool>,
    pub timestamp: Option<bool>,
    /// Seconds without input before an idle marker; 0 disables.
    pub idle_alert: Option<f64>,
    pub metrics: Option<bool>,
    pub metrics_bind: Option<String>,
    pub ring_size: Option<usize>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, SettingsError> {
        toml::from_str(text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Stack `top` over `self`. Keys set in `top` win; `env` maps merge.
    pub fn overlay(self, top: SettingsFile) -> SettingsFile {
        let env = match (self.env, top.env) {
            (Some(mut base), Some(over)) => {
                base.extend(over);
                Some(base)
            }
            (base, over) => over.or(base),
        };

        SettingsFile {
            cmd: top.cmd.or(self.cmd),
            env,
            cwd: top.cwd.or(self.cwd),
            out_dir: top.out_dir.or(self.out_dir),
            prefix: top.prefix.or(self.prefix),
            max_bytes: top.max_bytes.or(self.max_bytes),
            interval: top.interval.or(self.interval),
            compress: top.compress.or(self.compress),
            retain: top.retain.or(self.retain),
            echo: top.echo.or(self.echo),
            timestamp: top.timestamp.or(self.timestamp),
            idle_alert: top.idle_alert.or(self.idle_alert),
            metrics: top.metrics.or(self.metrics),
            metrics_bind: top.metrics_bind.or(self.metrics_bind),
            ring_size: top.ring_size.or(self.ring_size),
        }
    }
}

/// Fully resolved startup settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSettings {
    pub policy: RotationPolicy,
    pub ring_size: usize,
    pub idle_alert: Duration,
    /// Bind address for the control plane; `None` keeps HTTP off.
    pub metrics_bind: Option<String>,
    pub source: SourceSpec,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            policy: RotationPolicy::default(),
            ring_size: DEFAULT_RING_SIZE,
            idle_alert: Duration::ZERO,
            metrics_bind: None,
            source: SourceSpec::Stdin,
        }
    }
}

impl TryFrom<SettingsFile> for CaptureSettings {
    type Error = SettingsError;

    fn try_from(layer: SettingsFile) -> Result<Self, Self::Error> {
        let mut settings = CaptureSettings::default();
        let policy = &mut settings.policy;

        if let Some(dir) = layer.out_dir {
            policy.out_dir = std::path::absolute(&dir).map_err(|e| SettingsError::Invalid {
                field: "out_dir",
                message: e.to_string(),
            })?;
        }
        if let Some(prefix) = layer.prefix {
            if prefix.is_empty() || prefix.contains(['/', '\\']) {
                return Err(invalid("prefix", format!("invalid file name prefix {prefix:?}")));
            }
            policy.prefix = prefix;
        }
        if let Some(size) = layer.max_bytes {
            policy.max_bytes = u64::try_from(size).map_err(|m| invalid("max_bytes", m))?;
        }
        if let Some(interval) = layer.interval {
            policy.interval = Duration::try_from(interval).map_err(|m| invalid("interval", m))?;
        }
        if let Some(compress) = layer.compress {
            policy.compress = compress;
        }
        if let Some(retain) = layer.retain {
            policy.retain = retain;
        }
        policy.echo = layer.echo.unwrap_or(false);
        policy.timestamp = layer.timestamp.unwrap_or(false);

        if let Some(ring_size) = layer.ring_size {
            if ring_size == 0 {
                return Err(invalid("ring_size", "must be at least 1"));
            }
            settings.ring_size = ring_size;
        }

        if let Some(secs) = layer.idle_alert {
            if secs.is_nan() || secs < 0.0 {
                return Err(invalid("idle_alert", "must be a non-negative number of seconds"));
            }
            settings.idle_alert = Duration::try_from_secs_f64(secs)
                .map_err(|_| invalid("idle_alert", format!("{secs} seconds is out of range")))?;
        }

        if layer.metrics.unwrap_or(false) {
            settings.metrics_bind = Some(
                layer
                    .metrics_bind
                    .unwrap_or_else(|| DEFAULT_METRICS_BIND.to_string()),
            );
        }

        settings.source = match layer.cmd.filter(|c| !c.trim().is_empty()) {
            Some(command) => SourceSpec::Command(CommandSpec {
                command,
                env: layer.env.unwrap_or_default().into_iter().collect(),
                cwd: layer.cwd,
            }),
            None => SourceSpec::Stdin,
        };

        Ok(settings)
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field,
        message: message.into(),
    }
}
