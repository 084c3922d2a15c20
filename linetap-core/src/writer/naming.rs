use crate::writer::CompressMode;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// `<prefix>.current.log`, or `<prefix>.current.log.gz` when gzipping inline.
pub fn current_file_name(prefix: &str, compress: CompressMode) -> String {
    match compress {
        CompressMode::Inline => format!("{prefix}.current.log.gz"),
        CompressMode::None | CompressMode::After => format!("{prefix}.current.log"),
    }
}

pub fn rotated_file_name(prefix: &str, stamp: &str, seq: u64, gz: bool) -> String {
    let ext = if gz { ".log.gz" } else { ".log" };
    format!("{prefix}-{stamp}-{seq:06}{ext}")
}

/// Pick a free rotated path in `dir`.
///
/// The sequence is bumped until neither the plaintext nor the gzip variant of
/// the name exists, so two rotations in the same second never collide and a
/// later background compression cannot clobber another file.
pub fn next_rotated_path(dir: &Path, prefix: &str, gz: bool, seq: &AtomicU64) -> PathBuf {
    let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    loop {
        let n = seq.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let plain = dir.join(rotated_file_name(prefix, &stamp, n, false));
        let zipped = dir.join(rotated_file_name(prefix, &stamp, n, true));
        if !plain.exists() && !zipped.exists() {
            return if gz { zipped } else { plain };
        }
    }
}

/// Sort key of a rotated file: stamp date, stamp time, sequence.
///
/// `X.log` and `X.log.gz` share a key, so a file caught mid-compression is
/// still one rotation.
pub type RotationKey = (u64, u64, u64);

/// True for `<prefix>-YYYYMMDD-HHMMSS-<digits>.log[.gz]`.
pub fn is_rotated_name(name: &str, prefix: &str) -> bool {
    rotation_key(name, prefix).is_some()
}

/// Parse the key out of a rotated name, or `None` for anything else.
pub fn rotation_key(name: &str, prefix: &str) -> Option<RotationKey> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    let stem = rest
        .strip_suffix(".log.gz")
        .or_else(|| rest.strip_suffix(".log"))?;

    let parts: Vec<&str> = stem.split('-').collect();
    let [date, time, seq] = parts.as_slice() else {
        return None;
    };
    if date.len() != 8 || time.len() != 6 || seq.is_empty() {
        return None;
    }
    if ![date, time, seq]
        .iter()
        .all(|p| p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }
    Some((date.parse().ok()?, time.parse().ok()?, seq.parse().ok()?))
}
