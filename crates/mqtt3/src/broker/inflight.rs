//! QoS 1/2 in-flight state and the retransmission policy constants.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::protocol::Packet;

/// Backoff schedule in seconds, indexed by resend count: immediate, then
/// 1s, 2s, 10s, 1m, 2m, 10m, 1h, 6h.
pub const RESEND_BACKOFF: [u64; 9] = [0, 1, 2, 10, 60, 120, 600, 3600, 21_600];

/// Resend attempts after which an in-flight record is dropped.
pub const MAX_RESENDS: u32 = 6;

/// Backoff for a given resend count, capped at the schedule's last entry.
pub fn backoff_for(resends: u32) -> u64 {
    RESEND_BACKOFF[(resends as usize).min(RESEND_BACKOFF.len() - 1)]
}

/// An outstanding QoS 1/2 packet awaiting acknowledgement.
#[derive(Debug, Clone)]
pub struct InFlightMessage {
    pub packet: Packet,
    /// Unix seconds of the most recent transmit.
    pub sent: i64,
    /// Transmit attempts beyond the first.
    pub resends: u32,
}

impl InFlightMessage {
    pub fn new(packet: Packet, sent: i64) -> Self {
        Self {
            packet,
            sent,
            resends: 0,
        }
    }
}

/// Thread-safe map from packet id to in-flight record.
#[derive(Debug, Default)]
pub struct InFlight {
    inner: RwLock<HashMap<u16, InFlightMessage>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: u16, message: InFlightMessage) {
        self.inner.write().insert(id, message);
    }

    pub fn get(&self, id: u16) -> Option<InFlightMessage> {
        self.inner.read().get(&id).cloned()
    }

    /// Idempotent.
    pub fn delete(&self, id: u16) {
        self.inner.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// A copy of the table, stable against concurrent mutation for the
    /// duration of the caller's traversal.
    pub fn snapshot(&self) -> HashMap<u16, InFlightMessage> {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PubRelPacket;

    fn record(id: u16) -> InFlightMessage {
        InFlightMessage::new(Packet::PubRel(PubRelPacket::new(id)), 0)
    }

    #[test]
    fn set_get_delete_round_trip() {
        let table = InFlight::new();
        table.set(1, record(1));
        assert_eq!(table.len(), 1);
        assert!(table.get(1).is_some());

        table.delete(1);
        assert!(table.get(1).is_none());
        // Idempotent delete.
        table.delete(1);
        assert!(table.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_the_table() {
        let table = InFlight::new();
        table.set(1, record(1));

        let snapshot = table.snapshot();
        table.delete(1);
        assert!(snapshot.contains_key(&1));
        assert!(table.is_empty());
    }

    #[test]
    fn backoff_lookup_is_capped() {
        assert_eq!(backoff_for(0), 0);
        assert_eq!(backoff_for(3), 10);
        assert_eq!(backoff_for(8), 21_600);
        // Beyond the table: clamp, never index out of bounds.
        assert_eq!(backoff_for(100), 21_600);
    }
}
