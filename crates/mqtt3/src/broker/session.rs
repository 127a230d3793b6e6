//! The per-client session: owns one connection, drives the two-direction
//! packet pipeline, tracks QoS in-flight state, enforces keepalive, and
//! coordinates lifecycle with the broker's registry.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{watch, Barrier, OnceCell};
use tracing::{debug, trace};

use crate::broker::auth::{AllowAll, AuthController};
use crate::broker::config::EngineConfig;
use crate::broker::inflight::{backoff_for, InFlight, MAX_RESENDS};
use crate::channel::{Deadline, FrameReader, FrameWriter};
use crate::protocol::{
    ConnectPacket, FixedHeader, LastWill, MqttError, Packet, QoS, Result,
};

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Identification captured from the CONNECT packet.
#[derive(Debug, Default)]
struct Identity {
    client_id: String,
    username: Option<String>,
    listener: String,
    keepalive: u16,
    clean_session: bool,
    lwt: Option<LastWill>,
}

/// Lifecycle trackers for the two drainer tasks and the once-only shutdown.
struct Lifecycle {
    /// Flips to true exactly once, after both drainers have exited.
    done: watch::Sender<bool>,
    ended_w: watch::Sender<bool>,
    ended_r: watch::Sender<bool>,
    end_once: OnceCell<()>,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            done: watch::Sender::new(false),
            // True until start() arms them, so stopping a session that was
            // never started does not wait on tasks that do not exist.
            ended_w: watch::Sender::new(true),
            ended_r: watch::Sender::new(true),
            end_once: OnceCell::new(),
        }
    }
}

/// One client's session on the broker.
///
/// The session exclusively owns its connection: only the two drainer tasks
/// spawned by [`start`](Session::start) touch the socket, while the packet
/// layer works against the framed byte channel. Shared broker-side state
/// (identity, subscriptions, in-flight table) lives behind interior locks
/// so the registry and the session's own tasks can reach it through the
/// same `Arc`.
pub struct Session {
    /// Self-handle for the tasks this session spawns.
    me: Weak<Session>,
    reader: FrameReader,
    writer: FrameWriter,
    deadline: Deadline,
    /// Connection halves, consumed by `start`.
    transport: Mutex<Option<(BoxedRead, BoxedWrite)>>,
    identity: RwLock<Identity>,
    auth: RwLock<Arc<dyn AuthController>>,
    /// Topic filter -> granted QoS; the broker's cache of what this client
    /// believes it is subscribed to.
    subscriptions: RwLock<std::collections::HashMap<String, QoS>>,
    /// Outstanding QoS 1/2 packets awaiting acknowledgement.
    pub inflight: InFlight,
    packet_id: AtomicU32,
    /// Write-path scratch buffer; doubles as the write mutex serializing
    /// encoded frames. Held across encode + push only, never across an
    /// await.
    scratch: Mutex<BytesMut>,
    lifecycle: Lifecycle,
    config: EngineConfig,
}

impl Session {
    /// Wrap an accepted connection. The session starts unidentified, with
    /// the configured default keepalive already armed.
    pub fn new<S>(stream: S, config: EngineConfig) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let session = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            reader: FrameReader::new(),
            writer: FrameWriter::new(config.write_buffer_limit),
            deadline: Deadline::new(),
            transport: Mutex::new(Some((Box::new(read_half), Box::new(write_half)))),
            identity: RwLock::new(Identity {
                keepalive: config.default_keepalive,
                ..Identity::default()
            }),
            auth: RwLock::new(Arc::new(AllowAll)),
            subscriptions: RwLock::new(std::collections::HashMap::new()),
            inflight: InFlight::new(),
            packet_id: AtomicU32::new(0),
            scratch: Mutex::new(BytesMut::new()),
            lifecycle: Lifecycle::new(),
            config,
        });
        session.deadline.refresh(session.config.default_keepalive);
        session
    }

    /// Populate identity from a decoded CONNECT packet.
    ///
    /// An empty client id gets a generated one. The reader and writer are
    /// tagged with names derived from the id, and the deadline is refreshed
    /// against the new keepalive immediately.
    pub fn identify(
        &self,
        listener: &str,
        connect: &ConnectPacket,
        auth: Arc<dyn AuthController>,
    ) {
        let client_id = if connect.client_id.is_empty() {
            generate_client_id()
        } else {
            connect.client_id.clone()
        };

        {
            let mut identity = self.identity.write();
            identity.client_id.clone_from(&client_id);
            identity.username.clone_from(&connect.username);
            identity.listener = listener.to_string();
            identity.keepalive = connect.keep_alive;
            identity.clean_session = connect.clean_session;
            identity.lwt.clone_from(&connect.will);
        }
        *self.auth.write() = auth;

        self.reader.set_label(format!("{client_id} reader"));
        self.writer.set_label(format!("{client_id} writer"));
        self.refresh_deadline();

        debug!(
            client_id = %client_id,
            listener = %listener,
            keep_alive = connect.keep_alive,
            clean_session = connect.clean_session,
            has_will = connect.will.is_some(),
            "session identified"
        );
    }

    pub fn client_id(&self) -> String {
        self.identity.read().client_id.clone()
    }

    pub fn username(&self) -> Option<String> {
        self.identity.read().username.clone()
    }

    pub fn listener(&self) -> String {
        self.identity.read().listener.clone()
    }

    pub fn keepalive(&self) -> u16 {
        self.identity.read().keepalive
    }

    pub fn clean_session(&self) -> bool {
        self.identity.read().clean_session
    }

    /// The will captured at connect time, if any.
    pub fn lwt(&self) -> Option<LastWill> {
        self.identity.read().lwt.clone()
    }

    /// The auth controller inherited from the listener.
    pub fn auth(&self) -> Arc<dyn AuthController> {
        Arc::clone(&self.auth.read())
    }

    /// Whether the session has fully shut down: both drainers exited and
    /// the shutdown body ran.
    pub fn is_done(&self) -> bool {
        *self.lifecycle.done.borrow()
    }

    /// Resolves once `is_done` becomes true.
    pub async fn wait_done(&self) {
        let mut rx = self.lifecycle.done.subscribe();
        let _ = rx.wait_for(|&done| done).await;
    }

    /// Unread bytes still buffered on the reader.
    pub fn cap_delta(&self) -> usize {
        self.reader.cap_delta()
    }

    /// Re-arm the connection deadline from the current keepalive.
    pub fn refresh_deadline(&self) {
        self.deadline.refresh(self.keepalive());
    }

    /// Next outbound packet id, atomically. Wraps 65535 -> 1; never 0.
    ///
    /// Concurrent callers each receive a distinct value within one wrap
    /// window; the broker is responsible for not outrunning the in-flight
    /// table's capacity within a wrap.
    pub fn next_packet_id(&self) -> u16 {
        loop {
            let current = self.packet_id.load(Ordering::Acquire);
            let next = if current >= 65_535 { 1 } else { current + 1 };
            if self
                .packet_id
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return next as u16;
            }
        }
    }

    /// Note a granted subscription for this client.
    pub fn note_subscription(&self, filter: &str, qos: QoS) {
        self.subscriptions.write().insert(filter.to_string(), qos);
    }

    /// Forget a subscription note. Idempotent.
    pub fn forget_subscription(&self, filter: &str) {
        self.subscriptions.write().remove(filter);
    }

    /// The granted QoS noted for a filter, if subscribed.
    pub fn subscription(&self, filter: &str) -> Option<QoS> {
        self.subscriptions.read().get(filter).copied()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Spawn the reader and writer drainer tasks.
    ///
    /// Returns only after both tasks have registered themselves. Each
    /// drainer signals its ended marker and then invokes [`stop`] when it
    /// exits, whatever the reason, so the lifecycle converges from any
    /// failure. If the config enables it, a periodic in-flight resend tick
    /// is spawned as well.
    ///
    /// [`stop`]: Session::stop
    pub async fn start(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let Some((read_half, write_half)) = self.transport.lock().take() else {
            return;
        };

        self.lifecycle.ended_w.send_replace(false);
        self.lifecycle.ended_r.send_replace(false);

        let started = Arc::new(Barrier::new(3));

        {
            let session = Arc::clone(&me);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                started.wait().await;
                let result = session
                    .writer
                    .write_to(write_half, &session.deadline)
                    .await;
                if let Err(e) = result {
                    debug!(writer = %session.writer.label(), error = %e, "writer drainer exited");
                }
                session.lifecycle.ended_w.send_replace(true);
                session.stop().await;
            });
        }

        {
            let session = Arc::clone(&me);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                started.wait().await;
                let result = session
                    .reader
                    .read_from(read_half, &session.deadline, session.config.read_chunk_size)
                    .await;
                if let Err(e) = result {
                    debug!(reader = %session.reader.label(), error = %e, "reader drainer exited");
                }
                session.lifecycle.ended_r.send_replace(true);
                session.stop().await;
            });
        }

        if !self.config.resend_interval.is_zero() {
            let session = Arc::clone(&me);
            let period = self.config.resend_interval;
            tokio::spawn(async move {
                let mut tick =
                    tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                loop {
                    tick.tick().await;
                    if session.is_done() {
                        break;
                    }
                    if let Err(e) = session.resend_inflight(false) {
                        trace!(client_id = %session.client_id(), error = %e, "resend pass aborted");
                        break;
                    }
                }
            });
        }

        started.wait().await;
    }

    /// Shut both directions down. Idempotent; concurrent callers all wait
    /// for the single shutdown body to finish.
    ///
    /// The connection itself is not closed here: the drainers own the two
    /// halves and drop them as they exit, which closes the socket before
    /// `done` becomes observable.
    pub async fn stop(&self) {
        self.lifecycle
            .end_once
            .get_or_init(|| async {
                self.reader.stop();
                self.writer.stop();

                // Writer first: frames queued from the handler right before
                // shutdown still get flushed while the reader side winds
                // down.
                let mut ended_w = self.lifecycle.ended_w.subscribe();
                let _ = ended_w.wait_for(|&ended| ended).await;
                let mut ended_r = self.lifecycle.ended_r.subscribe();
                let _ = ended_r.wait_for(|&ended| ended).await;

                self.lifecycle.done.send_replace(true);
                debug!(client_id = %self.client_id(), "session stopped");
            })
            .await;
    }

    /// Decode the next packet's fixed header from the reader.
    ///
    /// Peeks one control byte, then one length byte at a time until a byte
    /// without the continuation bit terminates the field; four continuation
    /// bytes with no terminator is a protocol violation. Only on success is
    /// the consumed prefix committed.
    pub async fn read_fixed_header(&self) -> Result<FixedHeader> {
        let prefix = self.reader.read(1).await?;
        let mut header = FixedHeader::from_control_byte(prefix[0])?;

        let mut length_bytes = [0u8; 4];
        let mut filled = 0;
        let mut consumed = 1;
        for n in 2..=5 {
            let peeked = self.reader.read(n).await?;
            let byte = peeked[n - 1];
            length_bytes[filled] = byte;
            filled += 1;
            consumed = n;
            if byte & 0x80 == 0 {
                break;
            }
            if filled == 4 {
                return Err(MqttError::OversizedLengthIndicator);
            }
        }

        header.remaining = crate::protocol::encoding::decode_remaining_length(
            &length_bytes[..filled],
        )?
        .map(|(remaining, _)| remaining)
        .ok_or(MqttError::OversizedLengthIndicator)?;

        self.reader.commit_tail(consumed);
        Ok(header)
    }

    /// Read and decode the packet body named by a fixed header.
    pub async fn read_packet(&self, header: &FixedHeader) -> Result<Packet> {
        if header.remaining > self.config.max_packet_size {
            return Err(MqttError::PacketTooLarge {
                size: header.remaining,
                max: self.config.max_packet_size,
            });
        }
        if header.remaining == 0 {
            return Packet::decode(header, &[]);
        }

        // The reader's storage is reused; read() hands back a detached copy
        // so committing here cannot invalidate the packet.
        let body = self.reader.read(header.remaining).await?;
        let packet = Packet::decode(header, &body);
        self.reader.commit_tail(header.remaining);
        packet
    }

    /// The inbound packet loop, driven on the broker's task.
    ///
    /// Each decoded packet is handed to `handler` in exact wire order.
    /// Runs until the session is done and no buffered bytes remain (clean
    /// return), or an error propagates, the handler's errors included.
    pub async fn read<F, Fut>(&self, mut handler: F) -> Result<()>
    where
        F: FnMut(Arc<Session>, Packet) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some(me) = self.me.upgrade() else {
            return Err(MqttError::ConnectionClosed);
        };

        loop {
            if self.is_done() && self.reader.cap_delta() == 0 {
                return Ok(());
            }

            self.refresh_deadline();

            let header = match self.read_fixed_header().await {
                Ok(header) => header,
                Err(MqttError::ConnectionClosed) => {
                    // The reader only closes on the way into shutdown; once
                    // done, a drained buffer means a clean end of stream.
                    self.wait_done().await;
                    if self.reader.cap_delta() == 0 {
                        return Ok(());
                    }
                    return Err(MqttError::ConnectionClosed);
                }
                Err(e) => return Err(e),
            };

            let packet = self.read_packet(&header).await?;
            trace!(
                client_id = %self.client_id(),
                packet_type = ?packet.packet_type(),
                "inbound packet"
            );
            handler(Arc::clone(&me), packet).await?;
        }
    }

    /// Encode and enqueue a packet for the writer drainer.
    ///
    /// Fails with [`MqttError::ConnectionClosed`] after shutdown, without
    /// touching the writer. The scratch buffer's lock is the write mutex:
    /// two concurrent encoders cannot interleave bytes on the wire.
    pub fn write_packet(&self, packet: &Packet) -> Result<usize> {
        if self.is_done() {
            return Err(MqttError::ConnectionClosed);
        }

        let written = {
            let mut scratch = self.scratch.lock();
            scratch.clear();
            packet.encode(&mut scratch)?;
            self.writer.write(&scratch)?
        };

        self.refresh_deadline();
        Ok(written)
    }

    /// One resend pass over the in-flight table.
    ///
    /// Records past the resend cap are dropped. Eligible records (backoff
    /// elapsed, or `force`) are re-sent with the DUP flag set on publishes;
    /// each record's counters are advanced in the table before the write so
    /// a failed write cannot reissue it without progress. A write error
    /// aborts the pass; remaining records retry on the next one.
    pub fn resend_inflight(&self, force: bool) -> Result<()> {
        if self.inflight.is_empty() {
            return Ok(());
        }

        let now = unix_now();
        debug!(
            client_id = %self.client_id(),
            count = self.inflight.len(),
            force,
            "resending in-flight packets"
        );

        for (id, mut message) in self.inflight.snapshot() {
            if message.resends >= MAX_RESENDS {
                self.inflight.delete(id);
                continue;
            }

            if !force && now - message.sent < backoff_for(message.resends) as i64 {
                continue;
            }

            if let Packet::Publish(publish) = &mut message.packet {
                publish.dup = true;
            }

            message.resends += 1;
            message.sent = now;
            self.inflight.set(id, message.clone());

            trace!(
                client_id = %self.client_id(),
                packet_id = id,
                resends = message.resends,
                "retransmitting"
            );
            self.write_packet(&message.packet)?;
        }

        Ok(())
    }
}

/// Ids handed to clients that connected with an empty client id.
fn generate_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("auto-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PubAckPacket, PublishPacket, PubRelPacket};
    use bytes::Bytes;

    fn test_session() -> Arc<Session> {
        let (stream, _peer) = tokio::io::duplex(256);
        Session::new(stream, EngineConfig::default())
    }

    fn connect_packet(client_id: &str) -> ConnectPacket {
        ConnectPacket {
            protocol_name: "MQTT".into(),
            protocol_version: 4,
            clean_session: true,
            keep_alive: 60,
            client_id: client_id.into(),
            will: None,
            username: Some("alice".into()),
            password: None,
        }
    }

    #[tokio::test]
    async fn packet_ids_wrap_without_ever_yielding_zero() {
        let session = test_session();
        for expected in 1..=65_535u16 {
            assert_eq!(session.next_packet_id(), expected);
        }
        // Wrapped: back to 1, never 0.
        assert_eq!(session.next_packet_id(), 1);
        assert_eq!(session.next_packet_id(), 2);
    }

    #[tokio::test]
    async fn identify_generates_an_id_when_the_peer_sent_none() {
        let session = test_session();
        session.identify("tcp", &connect_packet(""), Arc::new(AllowAll));

        let id = session.client_id();
        assert!(!id.is_empty());
        assert_eq!(session.keepalive(), 60);
        assert!(session.clean_session());
        assert_eq!(session.username().as_deref(), Some("alice"));

        let other = test_session();
        other.identify("tcp", &connect_packet(""), Arc::new(AllowAll));
        assert_ne!(other.client_id(), id);
    }

    #[tokio::test]
    async fn identify_keeps_a_peer_supplied_id() {
        let session = test_session();
        session.identify("tls", &connect_packet("sensor-7"), Arc::new(AllowAll));
        assert_eq!(session.client_id(), "sensor-7");
        assert_eq!(session.listener(), "tls");
    }

    #[tokio::test]
    async fn subscription_notes_are_upserted_and_forgotten() {
        let session = test_session();
        session.note_subscription("a/+", QoS::AtMostOnce);
        session.note_subscription("a/+", QoS::AtLeastOnce);
        assert_eq!(session.subscription("a/+"), Some(QoS::AtLeastOnce));
        assert_eq!(session.subscription_count(), 1);

        session.forget_subscription("a/+");
        session.forget_subscription("a/+");
        assert_eq!(session.subscription("a/+"), None);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_sets_done_once() {
        let session = test_session();
        assert!(!session.is_done());

        session.stop().await;
        assert!(session.is_done());
        // Second and third stops are no-ops.
        session.stop().await;
        session.stop().await;
        assert!(session.is_done());
    }

    #[tokio::test]
    async fn write_after_stop_fails_without_touching_the_writer() {
        let session = test_session();
        session.stop().await;

        let err = session
            .write_packet(&Packet::PubAck(PubAckPacket::new(1)))
            .unwrap_err();
        assert_eq!(err, MqttError::ConnectionClosed);
        assert_eq!(session.writer.pending(), 0);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_interleave_frames() {
        let session = test_session();

        let mut tasks = Vec::new();
        for i in 1..=8u16 {
            let session = Arc::clone(&session);
            tasks.push(tokio::task::spawn_blocking(move || {
                for _ in 0..50 {
                    session
                        .write_packet(&Packet::PubAck(PubAckPacket::new(i)))
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every frame is a 4-byte PUBACK; any interleaving would corrupt
        // the control bytes.
        let buffered = session.writer.pending();
        assert_eq!(buffered % 4, 0);
        assert_eq!(buffered, 8 * 50 * 4);
    }

    #[tokio::test]
    async fn resend_skips_records_inside_their_backoff_window() {
        let session = test_session();
        let now = unix_now();

        let publish = Packet::Publish(PublishPacket {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: "t".into(),
            packet_id: Some(11),
            payload: Bytes::from_static(b"x"),
        });
        session
            .inflight
            .set(11, crate::broker::inflight::InFlightMessage::new(publish, now));

        // backoff[0] == 0: eligible immediately; resend sets DUP and bumps
        // the counter.
        session.resend_inflight(false).unwrap();
        let record = session.inflight.get(11).unwrap();
        assert_eq!(record.resends, 1);
        match &record.packet {
            Packet::Publish(p) => assert!(p.dup),
            other => panic!("unexpected packet: {other:?}"),
        }

        // Pin the record at resends == 3 (backoff 10s) so second-boundary
        // jitter cannot make the skip assertion racy.
        let mut record = session.inflight.get(11).unwrap();
        record.resends = 3;
        record.sent = unix_now();
        session.inflight.set(11, record);
        session.resend_inflight(false).unwrap();
        assert_eq!(session.inflight.get(11).unwrap().resends, 3);

        // Age it past the 10s backoff: eligible again.
        let mut aged = session.inflight.get(11).unwrap();
        aged.sent = unix_now() - 10;
        session.inflight.set(11, aged);
        session.resend_inflight(false).unwrap();
        assert_eq!(session.inflight.get(11).unwrap().resends, 4);
    }

    #[tokio::test]
    async fn resend_force_ignores_backoff() {
        let session = test_session();
        let record = crate::broker::inflight::InFlightMessage::new(
            Packet::PubRel(PubRelPacket::new(3)),
            unix_now(),
        );
        session.inflight.set(3, {
            let mut r = record;
            r.resends = 1;
            r
        });

        session.resend_inflight(true).unwrap();
        assert_eq!(session.inflight.get(3).unwrap().resends, 2);
    }

    #[tokio::test]
    async fn resend_drops_records_past_the_cap() {
        let session = test_session();
        let mut record = crate::broker::inflight::InFlightMessage::new(
            Packet::PubRel(PubRelPacket::new(9)),
            0,
        );
        record.resends = MAX_RESENDS;
        session.inflight.set(9, record);

        session.resend_inflight(false).unwrap();
        assert!(session.inflight.get(9).is_none());
        // Nothing was written for the dropped record.
        assert_eq!(session.writer.pending(), 0);
    }

    #[tokio::test]
    async fn resend_counters_advance_before_the_write_is_attempted() {
        let session = test_session();
        // Poison the writer so the write fails after the table update.
        session.writer.stop();

        let record = crate::broker::inflight::InFlightMessage::new(
            Packet::PubRel(PubRelPacket::new(5)),
            0,
        );
        session.inflight.set(5, record);

        assert!(session.resend_inflight(true).is_err());
        assert_eq!(session.inflight.get(5).unwrap().resends, 1);
    }
}
