//! Sequential byte-sink writer.
//!
//! The generator only ever appends bytes; nothing in this pipeline seeks
//! backwards in the output; xref offsets are computed from a running byte
//! counter instead.

use std::fmt;

use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug)]
pub enum WriterError {
    /// A write (or drain, or close) was attempted after the sink was closed.
    Closed,
    Io(std::io::Error),
}
impl fmt::Display for WriterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "writer is closed"),
            Self::Io(e) => write!(f, "writer I/O error: {}", e),
        }
    }
}
impl std::error::Error for WriterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Closed => None,
            Self::Io(e) => Some(e),
        }
    }
}
impl From<std::io::Error> for WriterError {
    fn from(value: std::io::Error) -> Self { Self::Io(value) }
}

/// Wraps any sequential async writer, tracking total bytes written and
/// refusing further writes once closed.
pub struct ByteSink<W> {
    inner: Option<W>,
    total_written: u64,
}

impl<W: AsyncWrite + Unpin + Send> ByteSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner), total_written: 0 }
    }

    /// Total bytes written so far, for progress reporting.
    pub fn bytes_written(&self) -> u64 {
        self.total_written
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), WriterError> {
        let inner = self.inner.as_mut().ok_or(WriterError::Closed)?;
        inner.write_all(bytes).await?;
        self.total_written += bytes.len() as u64;
        Ok(())
    }

    /// Back-pressure hook: the pipeline calls this between pages so a slow
    /// sink doesn't accumulate unbounded buffered data upstream.
    pub async fn wait_for_drain(&mut self) -> Result<(), WriterError> {
        let inner = self.inner.as_mut().ok_or(WriterError::Closed)?;
        inner.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), WriterError> {
        let mut inner = self.inner.take().ok_or(WriterError::Closed)?;
        inner.flush().await?;
        inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_bytes_written() {
        let mut buf = Vec::new();
        let mut sink = ByteSink::new(&mut buf);
        sink.write(b"hello").await.unwrap();
        sink.write(b" world").await.unwrap();
        assert_eq!(sink.bytes_written(), 11);
        sink.close().await.unwrap();
        assert_eq!(buf, b"hello world");
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let mut buf = Vec::new();
        let mut sink = ByteSink::new(&mut buf);
        sink.close().await.unwrap();
        let err = sink.write(b"oops").await.unwrap_err();
        assert!(matches!(err, WriterError::Closed));
    }
}
