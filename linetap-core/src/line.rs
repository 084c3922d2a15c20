use bytes::Bytes;
use std::fmt;

/// One ingested record, exactly as it will be persisted.
///
/// Cloning is cheap (reference counted), which is what lets the writer hand
/// the same line to the file, the stream hub and every subscriber queue.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LogLine {
    bytes: Bytes,
}

impl LogLine {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Build a new line with `prefix` placed in front of this one.
    pub fn prefixed(&self, prefix: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(prefix.len() + self.bytes.len());
        buf.extend_from_slice(prefix);
        buf.extend_from_slice(&self.bytes);
        Self::new(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn ends_with_newline(&self) -> bool {
        self.bytes.last() == Some(&b'\n')
    }
}

impl From<Vec<u8>> for LogLine {
    fn from(v: Vec<u8>) -> Self {
        Self::new(v)
    }
}

impl From<&'static str> for LogLine {
    fn from(s: &'static str) -> Self {
        Self::new(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for LogLine {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl fmt::Debug for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogLine({:?})", String::from_utf8_lossy(&self.bytes))
    }
}
