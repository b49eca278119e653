//! Router statistics
//!
//! Counters live in atomics behind an `Arc` so diagnostics (a display task,
//! the phone bridge, the host simulator) can snapshot them while the router
//! keeps running. Only the router writes.

use serde::Serialize;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::queue::Inbox;

/// Point-in-time view of the router counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeshStats {
    /// Frames originated here (user frames, heartbeats, acks, phone packets)
    pub messages_sent: u64,
    /// Packets received from the radio, duplicates included
    pub messages_received: u64,
    /// Frames re-transmitted on behalf of other nodes
    pub messages_relayed: u64,
    /// Failed transmissions
    pub tx_errors: u64,
    /// RSSI of the last received packet (dBm)
    pub last_rssi: i32,
    /// SNR of the last received packet (dB)
    pub last_snr: f32,
    /// Known routes
    pub routing_table_size: usize,
    /// Frames waiting in the inbox
    pub inbox_size: usize,
    /// Frames dropped from the inbox head on overflow
    pub inbox_dropped: u64,
    /// Received frames suppressed as duplicates
    pub duplicates_dropped: u64,
    /// Received frames dropped unprocessed because the sight map was full
    pub sight_saturated: u64,
    /// Packets that failed to decode
    pub decode_errors: u64,
    /// Acknowledgements emitted
    pub acks_sent: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub messages_sent: AtomicU64,
    pub messages_received: AtomicU64,
    pub messages_relayed: AtomicU64,
    pub tx_errors: AtomicU64,
    pub last_rssi: AtomicI32,
    pub last_snr_bits: AtomicU32,
    pub routing_table_size: AtomicUsize,
    pub duplicates_dropped: AtomicU64,
    pub sight_saturated: AtomicU64,
    pub decode_errors: AtomicU64,
    pub acks_sent: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal(&self, rssi: i16, snr: f32) {
        self.last_rssi.store(rssi as i32, Ordering::Relaxed);
        self.last_snr_bits.store(snr.to_bits(), Ordering::Relaxed);
    }
}

/// Shared read-only view of a router's counters
#[derive(Debug, Clone)]
pub struct StatsHandle {
    counters: Arc<Counters>,
    inbox: Inbox,
}

impl StatsHandle {
    pub(crate) fn new(counters: Arc<Counters>, inbox: Inbox) -> Self {
        Self { counters, inbox }
    }

    /// Take a snapshot
    pub fn snapshot(&self) -> MeshStats {
        let c = &self.counters;
        MeshStats {
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            messages_received: c.messages_received.load(Ordering::Relaxed),
            messages_relayed: c.messages_relayed.load(Ordering::Relaxed),
            tx_errors: c.tx_errors.load(Ordering::Relaxed),
            last_rssi: c.last_rssi.load(Ordering::Relaxed),
            last_snr: f32::from_bits(c.last_snr_bits.load(Ordering::Relaxed)),
            routing_table_size: c.routing_table_size.load(Ordering::Relaxed),
            inbox_size: self.inbox.len(),
            inbox_dropped: self.inbox.dropped(),
            duplicates_dropped: c.duplicates_dropped.load(Ordering::Relaxed),
            sight_saturated: c.sight_saturated.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            acks_sent: c.acks_sent.load(Ordering::Relaxed),
        }
    }
}
