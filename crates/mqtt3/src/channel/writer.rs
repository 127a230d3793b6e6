//! Outbound half of the framed byte channel.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Notify};
use tracing::trace;

use crate::channel::Deadline;
use crate::protocol::{MqttError, Result};

struct WriteBuf {
    buf: BytesMut,
    stopped: bool,
}

/// Buffered writer between the packet layer and the connection.
///
/// [`write`](FrameWriter::write) pushes a whole encoded frame into the
/// buffer, all or nothing; the drainer task pulls buffered bytes out to the
/// connection through [`write_to`](FrameWriter::write_to). Frames pushed by
/// concurrent callers never interleave because each push lands under one
/// lock acquisition.
///
/// A soft limit bounds how far a slow peer can let the buffer grow; pushes
/// beyond it fail rather than block.
pub struct FrameWriter {
    state: Mutex<WriteBuf>,
    writable: Notify,
    stop_tx: watch::Sender<bool>,
    label: Mutex<String>,
    limit: usize,
}

impl FrameWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(WriteBuf {
                buf: BytesMut::new(),
                stopped: false,
            }),
            writable: Notify::new(),
            stop_tx: watch::Sender::new(false),
            label: Mutex::new("writer".to_string()),
            limit,
        }
    }

    /// Diagnostic name, set at identify time.
    pub fn set_label(&self, label: String) {
        *self.label.lock() = label;
    }

    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    /// Push an encoded frame into the buffer. Either every byte is accepted
    /// or the buffer is left untouched.
    pub fn write(&self, bytes: &[u8]) -> Result<usize> {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(MqttError::ConnectionClosed);
            }
            if state.buf.len() + bytes.len() > self.limit {
                return Err(MqttError::BufferFull {
                    queued: state.buf.len(),
                    limit: self.limit,
                });
            }
            state.buf.extend_from_slice(bytes);
        }
        self.writable.notify_one();
        Ok(bytes.len())
    }

    /// Buffered bytes not yet drained to the connection.
    pub fn pending(&self) -> usize {
        self.state.lock().buf.len()
    }

    /// Refuse further pushes and tell the drainer to exit once drained.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.stop_tx.send_replace(true);
        self.writable.notify_one();
    }

    /// Drainer entry point: drain buffered bytes to the connection until
    /// stopped, an I/O error, or deadline expiry.
    ///
    /// A stop request is honored only after the buffer is empty, so frames
    /// queued just before shutdown still reach the wire.
    pub async fn write_to<C>(&self, mut conn: C, deadline: &Deadline) -> Result<()>
    where
        C: AsyncWrite + Unpin,
    {
        let mut stop_rx = self.stop_tx.subscribe();

        let result = loop {
            let pending: Option<Bytes> = {
                let mut state = self.state.lock();
                if state.buf.is_empty() {
                    if state.stopped {
                        break Ok(());
                    }
                    None
                } else {
                    Some(state.buf.split().freeze())
                }
            };

            match pending {
                Some(bytes) => {
                    trace!(writer = %self.label(), bytes = bytes.len(), "draining outbound bytes");
                    tokio::select! {
                        res = async {
                            conn.write_all(&bytes).await?;
                            conn.flush().await
                        } => {
                            if let Err(e) = res {
                                break Err(e.into());
                            }
                        }
                        () = deadline.expired() => break Err(MqttError::KeepAliveTimeout),
                    }
                }
                None => {
                    tokio::select! {
                        () = self.writable.notified() => {}
                        _ = stop_rx.wait_for(|&stopped| stopped) => {}
                    }
                }
            }
        };

        self.state.lock().stopped = true;
        result
    }
}
