//! Routing table
//!
//! Every accepted frame refreshes the route to its source. With pure flooding
//! the next hop is always the source itself; the table exists so diagnostics
//! and future directed forwarding can see who is reachable and how far away.

use serde::Serialize;
use sims_core::{elapsed_ms, NodeId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::sight::duration_ms;

/// A known route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    /// Node this route reaches
    pub destination: NodeId,
    /// Neighbour to hand frames to
    pub next_hop: NodeId,
    /// Hop count observed on the last frame from `destination`
    pub hop_count: u8,
    /// Local monotonic time of the last observation
    pub last_seen_ms: u32,
}

/// Bounded table of routes keyed by destination
#[derive(Debug)]
pub struct RoutingTable {
    routes: HashMap<NodeId, RouteEntry>,
    max_routes: usize,
    horizon_ms: u32,
}

impl RoutingTable {
    /// Create a table holding at most `max_routes` entries for `horizon`
    pub fn new(max_routes: usize, horizon: Duration) -> Self {
        Self {
            routes: HashMap::with_capacity(max_routes),
            max_routes: max_routes.max(1),
            horizon_ms: duration_ms(horizon),
        }
    }

    /// Insert or refresh the route to `destination`
    ///
    /// When the table is full the stalest route makes room.
    pub fn upsert(&mut self, destination: NodeId, next_hop: NodeId, hop_count: u8, now: u32) {
        if !self.routes.contains_key(&destination) && self.routes.len() >= self.max_routes {
            if let Some(stalest) = self
                .routes
                .values()
                .max_by_key(|r| elapsed_ms(now, r.last_seen_ms))
                .map(|r| r.destination)
            {
                trace!(evicted = stalest, "Routing table full");
                self.routes.remove(&stalest);
            }
        }

        self.routes.insert(
            destination,
            RouteEntry {
                destination,
                next_hop,
                hop_count,
                last_seen_ms: now,
            },
        );
    }

    /// Route to `destination`, if known
    pub fn get(&self, destination: NodeId) -> Option<&RouteEntry> {
        self.routes.get(&destination)
    }

    /// Drop routes whose age is at least the horizon
    pub fn expire(&mut self, now: u32) -> usize {
        let before = self.routes.len();
        let horizon = self.horizon_ms;
        self.routes
            .retain(|_, r| elapsed_ms(now, r.last_seen_ms) < horizon);
        let removed = before - self.routes.len();
        if removed > 0 {
            debug!(removed, remaining = self.routes.len(), "Expired routes");
        }
        removed
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Iterate over all routes in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.routes.values()
    }

    /// Drop every route
    pub fn clear(&mut self) {
        self.routes.clear();
    }
}
