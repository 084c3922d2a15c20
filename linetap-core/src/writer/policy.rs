use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How bytes reach disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressMode {
    /// Plaintext, never compressed.
    #[default]
    None,
    /// Gzip written incrementally into the active file.
    Inline,
    /// Plaintext while active, gzipped in the background once rotated.
    After,
}

impl CompressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressMode::None => "none",
            CompressMode::Inline => "inline",
            CompressMode::After => "after",
        }
    }
}

impl FromStr for CompressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CompressMode::None),
            "inline" => Ok(CompressMode::Inline),
            "after" => Ok(CompressMode::After),
            _ => Err(format!(
                "invalid compression mode {s:?} (must be one of: none, inline, after)"
            )),
        }
    }
}

impl fmt::Display for CompressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how files are written, and when they rotate.
///
/// The writer only ever swaps a whole policy, never single fields.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationPolicy {
    pub out_dir: PathBuf,
    pub prefix: String,
    pub compress: CompressMode,
    /// Rotated files to keep.
    pub retain: usize,
    /// Uncompressed size trigger; 0 disables.
    pub max_bytes: u64,
    /// Age trigger measured from when the active file was opened; zero disables.
    pub interval: Duration,
    pub echo: bool,
    pub timestamp: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("."),
            prefix: "capture".to_string(),
            compress: CompressMode::None,
            retain: 10,
            max_bytes: 0,
            interval: Duration::ZERO,
            echo: false,
            timestamp: false,
        }
    }
}

/// Names of the policy fields, as exposed over the config API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PolicyField {
    OutDir,
    Prefix,
    Compress,
    Retain,
    MaxBytes,
    Interval,
    Echo,
    Timestamp,
}

impl PolicyField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyField::OutDir => "out_dir",
            PolicyField::Prefix => "prefix",
            PolicyField::Compress => "compress",
            PolicyField::Retain => "retain",
            PolicyField::MaxBytes => "max_bytes",
            PolicyField::Interval => "interval",
            PolicyField::Echo => "echo",
            PolicyField::Timestamp => "timestamp",
        }
    }

    /// Fields that decide where or how the *next* file is written.
    pub fn needs_new_file(&self) -> bool {
        matches!(
            self,
            PolicyField::OutDir | PolicyField::Prefix | PolicyField::Compress
        )
    }
}

/// A validated partial policy update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDelta {
    pub out_dir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub compress: Option<CompressMode>,
    pub retain: Option<usize>,
    pub max_bytes: Option<u64>,
    pub interval: Option<Duration>,
    pub echo: Option<bool>,
    pub timestamp: Option<bool>,
}

impl PolicyDelta {
    pub fn is_empty(&self) -> bool {
        *self == PolicyDelta::default()
    }

    /// Merge into `policy`, returning the fields whose value actually changed.
    pub fn apply_to(&self, policy: &mut RotationPolicy) -> Vec<PolicyField> {
        let mut changed = Vec::new();

        set(&mut policy.out_dir, &self.out_dir, PolicyField::OutDir, &mut changed);
        set(&mut policy.prefix, &self.prefix, PolicyField::Prefix, &mut changed);
        set(
            &mut policy.compress,
            &self.compress,
            PolicyField::Compress,
            &mut changed,
        );
        set(&mut policy.retain, &self.retain, PolicyField::Retain, &mut changed);
        set(
            &mut policy.max_bytes,
            &self.max_bytes,
            PolicyField::MaxBytes,
            &mut changed,
        );
        set(
            &mut policy.interval,
            &self.interval,
            PolicyField::Interval,
            &mut changed,
        );
        set(&mut policy.echo, &self.echo, PolicyField::Echo, &mut changed);
        set(
            &mut policy.timestamp,
            &self.timestamp,
            PolicyField::Timestamp,
            &mut changed,
        );

        changed
    }
}

fn set<T: PartialEq + Clone>(
    slot: &mut T,
    value: &Option<T>,
    field: PolicyField,
    changed: &mut Vec<PolicyField>,
) {
    if let Some(v) = value {
        if slot != v {
            *slot = v.clone();
            changed.push(field);
        }
    }
}
