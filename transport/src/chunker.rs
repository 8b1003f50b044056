//! Chunk-size constants and a progress-tracking reader for the push/pull
//! transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Maximum payload carried by a single `Chunk` packet on the send path.
pub const SEND_CHUNK_SIZE: usize = 1024;

/// Maximum payload the server accepts per `Chunk` packet on ingest (push);
/// larger chunks are a protocol violation.
pub const INGEST_CHUNK_MAX: usize = 2 * 1024 * 1024;

/// A read wrapper that reports cumulative bytes read through `on_read`, a
/// plain callback instead of a `watch::Sender` since the caller here already
/// owns the outbound gRPC stream.
pub struct ProgressingReader<R> {
    reader: R,
    read: u64,
    on_read: Box<dyn FnMut(u64) + Send>,
}

impl<R> std::fmt::Debug for ProgressingReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressingReader")
            .field("read", &self.read)
            .finish()
    }
}

impl<R: AsyncRead + Unpin> ProgressingReader<R> {
    /// Wrap `reader`, invoking `on_read(total_bytes_read)` after every
    /// successful poll that advances the buffer.
    pub fn new(reader: R, on_read: impl FnMut(u64) + Send + 'static) -> Self {
        Self {
            reader,
            read: 0,
            on_read: Box::new(on_read),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let pinned = Pin::new(&mut this.reader);
        let result = pinned.poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &result {
            let advanced = (buf.filled().len() - before) as u64;
            if advanced > 0 {
                this.read += advanced;
                (this.on_read)(this.read);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reports_cumulative_bytes_read() {
        let data = vec![1u8; SEND_CHUNK_SIZE * 3];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut reader = ProgressingReader::new(std::io::Cursor::new(data.clone()), move |n| {
            seen_clone.lock().unwrap().push(n);
        });
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, data);
        let last = *seen.lock().unwrap().last().unwrap();
        assert_eq!(last, data.len() as u64);
    }
}
