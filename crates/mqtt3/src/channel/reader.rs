//! Inbound half of the framed byte channel.

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, Notify};
use tracing::trace;

use crate::channel::Deadline;
use crate::protocol::{MqttError, Result};

struct ReadBuf {
    buf: BytesMut,
    /// Set by [`FrameReader::stop`] or when the drainer exits; fails any
    /// read that cannot be satisfied from the buffer.
    stopped: bool,
}

/// Read-ahead buffer between the connection and the packet layer.
///
/// The drainer task pumps connection bytes in through
/// [`read_from`](FrameReader::read_from); the session peeks with
/// [`read`](FrameReader::read) and consumes with
/// [`commit_tail`](FrameReader::commit_tail). Reads are peeks: nothing is
/// consumed until committed, so the fixed-header decoder can look one byte
/// deeper on each pass.
///
/// A single consumer is assumed; that is the session's handler loop.
pub struct FrameReader {
    state: Mutex<ReadBuf>,
    readable: Notify,
    stop_tx: watch::Sender<bool>,
    label: Mutex<String>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ReadBuf {
                buf: BytesMut::new(),
                stopped: false,
            }),
            readable: Notify::new(),
            stop_tx: watch::Sender::new(false),
            label: Mutex::new("reader".to_string()),
        }
    }

    /// Diagnostic name, set at identify time.
    pub fn set_label(&self, label: String) {
        *self.label.lock() = label;
    }

    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    /// Wait until at least `n` buffered bytes are available and return an
    /// owned copy of them, without consuming. The copy means the caller
    /// never aliases the reader's storage past a later commit.
    pub async fn read(&self, n: usize) -> Result<Bytes> {
        loop {
            {
                let state = self.state.lock();
                if state.buf.len() >= n {
                    return Ok(Bytes::copy_from_slice(&state.buf[..n]));
                }
                if state.stopped {
                    return Err(MqttError::ConnectionClosed);
                }
            }
            self.readable.notified().await;
        }
    }

    /// Advance the logical tail: the next `read` starts `n` bytes later.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the buffered byte count; callers only commit
    /// what a successful `read` returned.
    pub fn commit_tail(&self, n: usize) {
        self.state.lock().buf.advance(n);
    }

    /// Unread buffered bytes.
    pub fn cap_delta(&self) -> usize {
        self.state.lock().buf.len()
    }

    /// Fail in-flight and future reads and tell the drainer to exit.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.stop_tx.send_replace(true);
        self.readable.notify_one();
    }

    /// Drainer entry point: pump connection bytes into the buffer until
    /// stopped, end of stream, an I/O error, or deadline expiry.
    ///
    /// Whatever the exit reason, the reader is left stopped so a blocked
    /// [`read`](FrameReader::read) cannot hang.
    pub async fn read_from<C>(&self, mut conn: C, deadline: &Deadline, chunk_size: usize) -> Result<()>
    where
        C: AsyncRead + Unpin,
    {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut chunk = BytesMut::with_capacity(chunk_size);

        let result = loop {
            tokio::select! {
                res = conn.read_buf(&mut chunk) => match res {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        trace!(reader = %self.label(), bytes = n, "buffered inbound bytes");
                        self.state.lock().buf.extend_from_slice(&chunk);
                        chunk.clear();
                        self.readable.notify_one();
                    }
                    Err(e) => break Err(e.into()),
                },
                _ = stop_rx.wait_for(|&stopped| stopped) => break Ok(()),
                () = deadline.expired() => break Err(MqttError::KeepAliveTimeout),
            }
        };

        self.state.lock().stopped = true;
        self.readable.notify_one();
        result
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn read_is_a_peek_until_committed() {
        let reader = Arc::new(FrameReader::new());
        let (mut tx, rx) = tokio::io::duplex(64);

        let drainer = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move {
                let deadline = Deadline::new();
                reader.read_from(rx, &deadline, 4096).await
            })
        };

        tx.write_all(b"abcdef").await.unwrap();

        let first = reader.read(3).await.unwrap();
        assert_eq!(&first[..], b"abc");
        // Not yet committed: the same bytes again.
        let again = reader.read(3).await.unwrap();
        assert_eq!(&again[..], b"abc");

        reader.commit_tail(2);
        let after = reader.read(3).await.unwrap();
        assert_eq!(&after[..], b"cde");
        assert_eq!(reader.cap_delta(), 4);

        drop(tx);
        drainer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn read_blocks_until_enough_bytes_arrive() {
        let reader = Arc::new(FrameReader::new());
        let (mut tx, rx) = tokio::io::duplex(64);

        let drainer = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move {
                let deadline = Deadline::new();
                reader.read_from(rx, &deadline, 4096).await
            })
        };

        let pending = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.read(4).await })
        };

        tx.write_all(b"ab").await.unwrap();
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        tx.write_all(b"cd").await.unwrap();
        let bytes = pending.await.unwrap().unwrap();
        assert_eq!(&bytes[..], b"abcd");

        drop(tx);
        drainer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_unblocks_a_pending_read() {
        let reader = Arc::new(FrameReader::new());

        let pending = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.read(1).await })
        };
        tokio::task::yield_now().await;

        reader.stop();
        assert_eq!(pending.await.unwrap(), Err(MqttError::ConnectionClosed));
    }

    #[tokio::test]
    async fn drainer_exit_leaves_reader_stopped() {
        let reader = Arc::new(FrameReader::new());
        let deadline = Deadline::new();
        let (tx, rx) = tokio::io::duplex(64);

        drop(tx); // immediate end of stream
        reader.read_from(rx, &deadline, 4096).await.unwrap();

        assert_eq!(reader.read(1).await, Err(MqttError::ConnectionClosed));
    }
}
