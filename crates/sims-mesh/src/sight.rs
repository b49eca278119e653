//! Sight map for duplicate suppression
//!
//! Flooding means every node hears most frames several times: once from the
//! originator and again from each neighbour that relays it. The sight map
//! remembers which `(source, sequence)` pairs have already been processed so
//! the router acts on each pair at most once.
//!
//! Records carry the local monotonic time of first sighting and age out after
//! the configured horizon (five minutes by default). A live record is never
//! pushed out: when the map holds its capacity of live records, new frames
//! are refused as [`Sighting::Saturated`] until the sweep frees room.

use lru::LruCache;
use sims_core::{elapsed_ms, NodeId};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Duplicate-suppression key
pub type SightKey = (NodeId, u32);

/// Outcome of [`SightMap::check_and_mark`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// First sighting, now recorded
    New,
    /// Already processed within the horizon
    Duplicate,
    /// Not recorded: the map is full of live records
    Saturated,
}

/// Sight map statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SightStats {
    /// Lookups performed
    pub total_checks: u64,
    /// Lookups that found a live record
    pub duplicates: u64,
    /// Records removed by the age sweep
    pub expired: u64,
    /// New keys refused because every record was still live
    pub saturated: u64,
}

/// Age-bounded set of processed frames
///
/// Records are kept in first-sighting order: a duplicate lookup never
/// refreshes a record, so the least recently inserted entry is also the
/// oldest and the sweep can stop at the first live one.
#[derive(Debug)]
pub struct SightMap {
    records: LruCache<SightKey, u32>,
    capacity: usize,
    horizon_ms: u32,
    stats: SightStats,
}

impl SightMap {
    /// Create a map holding at most `capacity` received records for `horizon`
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            records: LruCache::unbounded(),
            capacity: capacity.max(1),
            horizon_ms: duration_ms(horizon),
            stats: SightStats::default(),
        }
    }

    /// Check a key and record it if new
    pub fn check_and_mark(&mut self, key: SightKey, now: u32) -> Sighting {
        self.stats.total_checks += 1;

        if let Some(&first_seen) = self.records.peek(&key) {
            if elapsed_ms(now, first_seen) < self.horizon_ms {
                self.stats.duplicates += 1;
                trace!(source = key.0, seq = key.1, "Duplicate sighting");
                return Sighting::Duplicate;
            }
            // Stale record the sweep has not reached yet
            self.records.pop(&key);
            self.stats.expired += 1;
        }

        if self.records.len() >= self.capacity {
            self.expire(now);
            if self.records.len() >= self.capacity {
                self.stats.saturated += 1;
                warn!(
                    source = key.0,
                    seq = key.1,
                    live = self.records.len(),
                    "Sight map full of live records, frame refused"
                );
                return Sighting::Saturated;
            }
        }

        self.records.put(key, now);
        Sighting::New
    }

    /// Record a key without checking it (locally originated frames)
    ///
    /// Always recorded, even past capacity, so our own echoes stay suppressed.
    pub fn mark_seen(&mut self, key: SightKey, now: u32) {
        if !self.records.contains(&key) {
            self.records.put(key, now);
        }
    }

    /// Whether a key is currently recorded
    pub fn contains(&self, key: &SightKey) -> bool {
        self.records.contains(key)
    }

    /// Evict records whose age is at least the horizon
    ///
    /// Returns the number of records removed.
    pub fn expire(&mut self, now: u32) -> usize {
        let mut removed = 0;
        while let Some((_, &first_seen)) = self.records.peek_lru() {
            if elapsed_ms(now, first_seen) < self.horizon_ms {
                break;
            }
            self.records.pop_lru();
            removed += 1;
        }
        if removed > 0 {
            self.stats.expired += removed as u64;
            debug!(removed, remaining = self.records.len(), "Expired sight records");
        }
        removed
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SightStats {
        self.stats.clone()
    }

    /// Age horizon in milliseconds
    pub fn horizon_ms(&self) -> u32 {
        self.horizon_ms
    }
}

pub(crate) fn duration_ms(d: Duration) -> u32 {
    d.as_millis().min(u32::MAX as u128) as u32
}
