use crate::writer::naming::current_file_name;
use crate::writer::{CompressMode, RotationPolicy, WriterError};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

enum FileSink {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl FileSink {
    fn file(&self) -> &File {
        match self {
            FileSink::Plain(f) => f,
            FileSink::Gzip(enc) => enc.get_ref(),
        }
    }
}

/// The single file currently receiving lines.
pub(crate) struct ActiveFile {
    pub(crate) path: PathBuf,
    pub(crate) dir: PathBuf,
    pub(crate) prefix: String,
    pub(crate) compress: CompressMode,
    /// Uncompressed bytes written through this handle.
    pub(crate) bytes_written: u64,
    pub(crate) opened_at: Instant,
    sink: FileSink,
}

impl ActiveFile {
    /// Open (or append to) the current file described by `policy`.
    pub(crate) fn open(policy: &RotationPolicy) -> Result<Self, WriterError> {
        let path = policy
            .out_dir
            .join(current_file_name(&policy.prefix, policy.compress));

        fs::create_dir_all(&policy.out_dir).map_err(|source| WriterError::Open {
            path: path.clone(),
            source,
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| WriterError::Open {
                path: path.clone(),
                source,
            })?;

        // A leftover plaintext file keeps counting from its size; a leftover
        // gzip file gets a new member and its uncompressed size is unknown.
        let (sink, bytes_written) = match policy.compress {
            CompressMode::Inline => (
                FileSink::Gzip(GzEncoder::new(file, Compression::default())),
                0,
            ),
            CompressMode::None | CompressMode::After => {
                let len = file.metadata().map(|m| m.len()).unwrap_or(0);
                (FileSink::Plain(file), len)
            }
        };

        Ok(Self {
            path,
            dir: policy.out_dir.clone(),
            prefix: policy.prefix.clone(),
            compress: policy.compress,
            bytes_written,
            opened_at: Instant::now(),
            sink,
        })
    }

    /// Append one line and flush it to the OS.
    ///
    /// Inline gzip uses a sync flush, so the file stays decodable up to the
    /// last complete line.
    pub(crate) fn write_line(&mut self, bytes: &[u8]) -> io::Result<()> {
        match &mut self.sink {
            FileSink::Plain(f) => {
                f.write_all(bytes)?;
                f.flush()?;
            }
            FileSink::Gzip(enc) => {
                enc.write_all(bytes)?;
                enc.flush()?;
            }
        }
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn disk_bytes(&self) -> u64 {
        self.sink.file().metadata().map(|m| m.len()).unwrap_or(0)
    }

    pub(crate) fn compression_ratio(&self) -> f64 {
        match self.compress {
            CompressMode::Inline => self.bytes_written as f64 / self.disk_bytes().max(1) as f64,
            CompressMode::None | CompressMode::After => 1.0,
        }
    }

    /// True when nothing was ever written to the file.
    pub(crate) fn is_untouched(&self) -> bool {
        self.bytes_written == 0 && self.disk_bytes() == 0
    }

    /// Close the handle, writing the gzip trailer if needed.
    pub(crate) fn finish(self) -> io::Result<()> {
        match self.sink {
            FileSink::Plain(mut f) => f.flush(),
            FileSink::Gzip(enc) => enc.finish()?.flush(),
        }
    }
}
