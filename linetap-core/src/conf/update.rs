use crate::conf::error::{FieldError, UpdateError};
use crate::conf::units::{parse_interval, parse_size};
use crate::writer::{CompressMode, PolicyDelta};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fields an update actually changed, keyed by request name, with their new
/// values.
pub type Updated = Map<String, Value>;

/// A fully validated `POST /config` body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigUpdate {
    pub policy: PolicyDelta,
    pub ring_size: Option<usize>,
    pub idle_alert: Option<Duration>,
    pub rotate_now: bool,
}

#[derive(Default)]
struct UpdateCtx {
    errors: Vec<FieldError>,
}

impl UpdateCtx {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    fn into_result(self) -> Result<(), UpdateError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(UpdateError::Invalid(self.errors))
        }
    }
}

impl ConfigUpdate {
    /// Parse a raw request body. An empty body is an empty update.
    pub fn from_slice(body: &[u8]) -> Result<Self, UpdateError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_slice(body)?;
        Self::from_json(&value)
    }

    /// Validate every field independently; any failure rejects the whole
    /// update.
    ///
    /// The output directory is created only once everything else passed.
    pub fn from_json(value: &Value) -> Result<Self, UpdateError> {
        let Some(fields) = value.as_object() else {
            return Err(UpdateError::NotAnObject);
        };

        let mut ctx = UpdateCtx::default();
        let mut update = ConfigUpdate::default();
        let mut out_dir = None;

        for (key, v) in fields {
            let field = key.as_str();
            let result = match field {
                "out_dir" => non_empty_str(v).map(|s| out_dir = Some(PathBuf::from(s))),
                "prefix" => prefix(v).map(|p| update.policy.prefix = Some(p)),
                "compress" => v
                    .as_str()
                    .ok_or_else(|| "expected a string".to_string())
                    .and_then(str::parse::<CompressMode>)
                    .map(|c| update.policy.compress = Some(c)),
                "retain" => count(v).map(|n| update.policy.retain = Some(n as usize)),
                "max_bytes" => size(v).map(|n| update.policy.max_bytes = Some(n)),
                "interval" => interval(v).map(|d| update.policy.interval = Some(d)),
                "echo" => flag(v).map(|b| update.policy.echo = Some(b)),
                "timestamp" => flag(v).map(|b| update.policy.timestamp = Some(b)),
                "ring_size" => count(v).and_then(|n| {
                    if n == 0 {
                        Err("must be at least 1".to_string())
                    } else {
                        update.ring_size = Some(n as usize);
                        Ok(())
                    }
                }),
                "idle_alert_secs" => seconds(v).map(|d| update.idle_alert = Some(d)),
                "rotate_now" => flag(v).map(|b| update.rotate_now = b),
                "cmd" | "command" => Err("the capture source cannot be changed at runtime".into()),
                _ => Err("unknown field".into()),
            };
            if let Err(message) = result {
                ctx.push(field, message);
            }
        }

        if ctx.errors.is_empty() {
            if let Some(dir) = out_dir {
                match prepare_dir(&dir) {
                    Ok(resolved) => update.policy.out_dir = Some(resolved),
                    Err(message) => ctx.push("out_dir", message),
                }
            }
        }

        ctx.into_result()?;
        Ok(update)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn non_empty_str(v: &Value) -> Result<&str, String> {
    match v.as_str().map(str::trim) {
        Some("") => Err("must not be empty".into()),
        Some(s) => Ok(s),
        None => Err("expected a string".into()),
    }
}

fn prefix(v: &Value) -> Result<String, String> {
    let p = non_empty_str(v)?;
    if p == "." || p == ".." || p.contains(['/', '\\', '\0']) {
        return Err(format!("invalid file name prefix {p:?}"));
    }
    Ok(p.to_string())
}

fn prepare_dir(dir: &Path) -> Result<PathBuf, String> {
    fs::create_dir_all(dir)
        .and_then(|_| fs::canonicalize(dir))
        .map_err(|e| format!("cannot use directory {}: {e}", dir.display()))
}

/// JSON booleans, 0/1, or the usual spellings as strings.
fn flag(v: &Value) -> Result<bool, String> {
    match v {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(format!("expected a boolean, got {s:?}")),
        },
        _ => Err("expected a boolean".into()),
    }
}

fn count(v: &Value) -> Result<u64, String> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("expected a non-negative integer, got {n}")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("expected a non-negative integer, got {s:?}")),
        _ => Err("expected a non-negative integer".into()),
    }
}

/// Bytes as a number or a size string; null or 0 disables.
fn size(v: &Value) -> Result<u64, String> {
    match v {
        Value::Null => Ok(0),
        Value::String(s) => parse_size(s),
        _ => count(v),
    }
}

/// Seconds as a number or an interval string; null or 0 disables.
fn interval(v: &Value) -> Result<Duration, String> {
    match v {
        Value::Null => Ok(Duration::ZERO),
        Value::String(s) => parse_interval(s),
        _ => count(v).map(Duration::from_secs),
    }
}

/// Fractional seconds; null or 0 disables.
fn seconds(v: &Value) -> Result<Duration, String> {
    let secs = match v {
        Value::Null => return Ok(Duration::ZERO),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match secs {
        Some(s) if s >= 0.0 => {
            Duration::try_from_secs_f64(s).map_err(|_| format!("{s} seconds is out of range"))
        }
        _ => Err("expected a non-negative number of seconds".into()),
    }
}
