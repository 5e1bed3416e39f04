use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// In-memory sink for process output.
///
/// Clones share one buffer, so a single capture can serve as both stdout and
/// stderr of an exec.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer().clone()
    }

    /// Drain the buffer, leaving it empty for reuse.
    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buffer())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buffer().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn clones_share_one_buffer() {
        let capture = CaptureBuffer::new();
        let mut out = capture.clone();
        let mut err = capture.clone();

        out.write_all(b"one\n").await.unwrap();
        err.write_all(b"two\n").await.unwrap();
        out.write_all(b"three\n").await.unwrap();

        assert_eq!(capture.contents(), b"one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn take_empties_buffer() {
        let mut capture = CaptureBuffer::new();
        capture.write_all(b"abc").await.unwrap();

        assert_eq!(capture.take(), b"abc");
        assert!(capture.is_empty());
    }
}
