//! A trivial in-memory `AsyncRead` source.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Wraps an owned `Vec<u8>` as an [`AsyncRead`] without ever actually
/// suspending — reads are always immediately ready since the data already
/// lives in memory.
pub struct MemoryCursor {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryCursor {
    /// Wrap `data`, reading from the start.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }
}

impl AsyncRead for MemoryCursor {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let remaining = &this.data[this.pos..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn reads_all_bytes() {
        let mut cursor = MemoryCursor::new(b"hello world".to_vec());
        let mut out = Vec::new();
        cursor.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
    }
}
