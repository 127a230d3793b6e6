//! Packet id allocation and the QoS retransmission policy end to end.

mod common;

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use common::started_session;
use mqtt3::broker::{InFlightMessage, MAX_RESENDS};
use mqtt3::protocol::{PublishPacket, QoS};
use mqtt3::Packet;

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn qos1_publish(packet_id: u16) -> Packet {
    Packet::Publish(PublishPacket {
        dup: false,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: "inflight/t".into(),
        packet_id: Some(packet_id),
        payload: Bytes::from_static(b"payload"),
    })
}

#[tokio::test]
async fn packet_id_wraps_from_65535_back_to_one() {
    let (session, _peer_tx, _peer_rx) = started_session().await;

    for _ in 0..65_534 {
        session.next_packet_id();
    }
    assert_eq!(session.next_packet_id(), 65_535);
    assert_eq!(session.next_packet_id(), 1);
    assert_eq!(session.next_packet_id(), 2);
}

#[tokio::test]
async fn resend_progression_follows_the_backoff_schedule() {
    let (session, _peer_tx, _peer_rx) = started_session().await;
    let t0 = unix_now();

    session
        .inflight
        .set(21, InFlightMessage::new(qos1_publish(21), t0));

    // backoff[0] = 0: the first pass resends immediately, marks the
    // publish as a duplicate, and advances the counter.
    session.resend_inflight(false).unwrap();
    let record = session.inflight.get(21).unwrap();
    assert_eq!(record.resends, 1);
    assert!(matches!(&record.packet, Packet::Publish(p) if p.dup));

    // Pin the record at resends == 3 (backoff 10s) so second-boundary
    // jitter cannot make the skip assertion racy.
    let mut record = session.inflight.get(21).unwrap();
    record.resends = 3;
    record.sent = unix_now();
    session.inflight.set(21, record);
    session.resend_inflight(false).unwrap();
    assert_eq!(session.inflight.get(21).unwrap().resends, 3);

    // Age it past the 10s backoff: eligible again.
    let mut aged = session.inflight.get(21).unwrap();
    aged.sent = unix_now() - 10;
    session.inflight.set(21, aged);
    session.resend_inflight(false).unwrap();
    assert_eq!(session.inflight.get(21).unwrap().resends, 4);
}

#[tokio::test]
async fn record_is_dropped_after_the_resend_cap() {
    let (session, _peer_tx, _peer_rx) = started_session().await;

    session
        .inflight
        .set(33, InFlightMessage::new(qos1_publish(33), unix_now()));

    // Force a pass per allowed attempt.
    for expected in 1..=MAX_RESENDS {
        session.resend_inflight(true).unwrap();
        assert_eq!(session.inflight.get(33).unwrap().resends, expected);
    }

    // The next pass sees resends == MAX_RESENDS and deletes the record
    // instead of transmitting.
    session.resend_inflight(false).unwrap();
    assert!(session.inflight.get(33).is_none());
    assert_eq!(session.inflight.len(), 0);
}

#[tokio::test]
async fn resend_counts_never_decrease_for_surviving_records() {
    let (session, _peer_tx, _peer_rx) = started_session().await;

    session
        .inflight
        .set(1, InFlightMessage::new(qos1_publish(1), unix_now()));
    session
        .inflight
        .set(2, InFlightMessage::new(qos1_publish(2), unix_now() - 3600));

    let mut last = std::collections::HashMap::new();
    for _ in 0..4 {
        session.resend_inflight(false).unwrap();
        for (id, record) in session.inflight.snapshot() {
            let prev = last.insert(id, record.resends).unwrap_or(0);
            assert!(record.resends >= prev, "resend count regressed for {id}");
        }
    }
}
