//! Mesh router
//!
//! The router is the whole per-node mesh: it emits heartbeats, services the
//! radio, suppresses duplicates, learns routes, delivers frames locally,
//! acknowledges directed frames and floods everything else one hop further.
//!
//! # Inbound pipeline
//!
//! For every received packet, in order:
//!
//! 1. Decode (failures are counted and dropped)
//! 2. Duplicate check on `(source, sequence)`
//! 3. Route refresh for the source
//! 4. Local delivery into the inbox when addressed here or broadcast
//! 5. Acknowledgement when delivered, directed, and not itself an ack
//! 6. Relay when [`Router::should_relay`] allows it
//!
//! Routing never fails. Only user-initiated sends surface transmit errors;
//! everything else is counted in [`MeshStats`].

use bytes::Bytes;
use sims_core::{
    elapsed_ms, Clock, DeviceIdentity, MeshFrame, MessageKind, NodeId, Priority, Result,
    RouterConfig, BROADCAST, MAX_HOPS,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::codec::{decode_frame, encode_frame};
use crate::queue::Inbox;
use crate::radio::{RadioLink, RxSignal};
use crate::routing_table::RoutingTable;
use crate::sight::{duration_ms, SightMap, Sighting};
use crate::stats::{Counters, MeshStats, StatsHandle};
use sims_core::config::{ACK_TTL, HEARTBEAT_TTL};

/// Transmit path the phone bridge uses to inject packets into the mesh
pub trait MeshSender {
    /// Transmit `packet` exactly as given
    fn send_raw(&mut self, packet: &[u8]) -> Result<()>;
}

/// What the router did with one received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The packet did not decode
    Malformed,
    /// `(source, sequence)` was already processed
    Duplicate,
    /// The sight map was full of live records; dropped unprocessed
    Saturated,
    /// The frame was processed
    Accepted {
        /// Copied into the inbox
        delivered: bool,
        /// An acknowledgement went out
        acked: bool,
        /// A relay copy went out
        relayed: bool,
    },
}

/// Per-node mesh router
pub struct Router<R: RadioLink> {
    radio: R,
    rx_signal: RxSignal,
    clock: Arc<dyn Clock>,
    identity: DeviceIdentity,
    config: RouterConfig,
    sightings: SightMap,
    routes: RoutingTable,
    inbox: Inbox,
    counters: Arc<Counters>,
    next_sequence: u32,
    last_heartbeat: u32,
    last_cleanup: u32,
}

impl<R: RadioLink> Router<R> {
    /// Create a router owning `radio`
    ///
    /// `rx_signal` is the flag the radio's receive interrupt raises. Timers
    /// start at the clock's current reading.
    pub fn new(
        radio: R,
        rx_signal: RxSignal,
        identity: DeviceIdentity,
        clock: Arc<dyn Clock>,
        config: RouterConfig,
    ) -> Self {
        let now = clock.monotonic_ms();
        info!(
            device_id = format_args!("{:08x}", identity.id()),
            heartbeat = ?config.heartbeat_interval,
            "Mesh router started"
        );
        Self {
            radio,
            rx_signal,
            clock,
            identity,
            sightings: SightMap::new(config.max_sightings, config.sight_horizon),
            routes: RoutingTable::new(config.max_routes, config.sight_horizon),
            inbox: Inbox::new(config.inbox_capacity),
            counters: Arc::new(Counters::default()),
            config,
            next_sequence: 1,
            last_heartbeat: now,
            last_cleanup: now,
        }
    }

    /// Run one main-loop iteration at `now`
    pub fn tick(&mut self, now: u32) {
        if elapsed_ms(now, self.last_heartbeat) >= duration_ms(self.config.heartbeat_interval) {
            if let Err(e) = self.send_heartbeat(now) {
                warn!(code = e.error_code(), "Heartbeat not sent: {}", e);
            }
        }

        if self.rx_signal.take() {
            self.service_radio(now);
        }

        if elapsed_ms(now, self.last_cleanup) >= duration_ms(self.config.cleanup_interval) {
            self.cleanup(now);
        }
    }

    /// [`tick`](Self::tick) at the clock's current reading
    pub fn poll(&mut self) {
        let now = self.clock.monotonic_ms();
        self.tick(now);
    }

    fn service_radio(&mut self, now: u32) {
        loop {
            match self.radio.recv() {
                Ok(Some(packet)) => {
                    self.handle_frame_bytes(&packet.data, packet.rssi, packet.snr, now);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Radio receive failed: {}", e);
                    break;
                }
            }
        }
    }

    /// Run the inbound pipeline on one received packet
    pub fn handle_frame_bytes(
        &mut self,
        data: &[u8],
        rssi: i16,
        snr: f32,
        now: u32,
    ) -> Disposition {
        Counters::incr(&self.counters.messages_received);
        self.counters.record_signal(rssi, snr);

        let frame = match decode_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                Counters::incr(&self.counters.decode_errors);
                debug!(len = data.len(), rssi, "Dropping undecodable packet: {}", e);
                return Disposition::Malformed;
            }
        };

        match self.sightings.check_and_mark(frame.sight_key(), now) {
            Sighting::New => {}
            Sighting::Duplicate => {
                Counters::incr(&self.counters.duplicates_dropped);
                trace!(
                    source = format_args!("{:08x}", frame.source),
                    seq = frame.sequence,
                    "Duplicate frame dropped"
                );
                return Disposition::Duplicate;
            }
            Sighting::Saturated => {
                Counters::incr(&self.counters.sight_saturated);
                return Disposition::Saturated;
            }
        }

        self.routes
            .upsert(frame.source, frame.source, frame.hop_count, now);
        self.update_route_count();

        let me = self.identity.id();
        let delivered = frame.destination == me || frame.is_broadcast();
        if delivered {
            self.inbox.push(frame.clone());
        }

        debug!(
            source = format_args!("{:08x}", frame.source),
            dest = format_args!("{:08x}", frame.destination),
            seq = frame.sequence,
            kind = ?frame.kind,
            hops = frame.hop_count,
            rssi,
            delivered,
            "Frame received"
        );

        let acked = delivered
            && !frame.is_broadcast()
            && !frame.kind.is_ack()
            && self.send_ack(&frame, now);
        let relayed = self.should_relay(&frame, now) && self.relay(&frame);

        Disposition::Accepted {
            delivered,
            acked,
            relayed,
        }
    }

    /// Whether a received frame gets re-transmitted
    pub fn should_relay(&self, frame: &MeshFrame, now: u32) -> bool {
        if frame.hop_count >= MAX_HOPS || frame.hop_count >= frame.ttl {
            return false;
        }

        // A sender clock ahead of ours yields a negative age, read as fresh
        let age_ms = (now.wrapping_sub(frame.origin_timestamp_ms) as i32).max(0) as u32;
        if age_ms / 1000 > frame.ttl as u32 {
            trace!(seq = frame.sequence, age_ms, "Frame too old to relay");
            return false;
        }

        if frame.kind.is_ack() {
            return false;
        }

        frame.is_broadcast() || frame.destination == self.identity.id()
    }

    fn relay(&mut self, frame: &MeshFrame) -> bool {
        let copy = frame.relayed();
        match self.transmit_frame(&copy) {
            Ok(()) => {
                Counters::incr(&self.counters.messages_relayed);
                trace!(
                    source = format_args!("{:08x}", copy.source),
                    seq = copy.sequence,
                    hops = copy.hop_count,
                    "Frame relayed"
                );
                true
            }
            Err(e) => {
                debug!("Relay failed: {}", e);
                false
            }
        }
    }

    fn send_ack(&mut self, frame: &MeshFrame, now: u32) -> bool {
        let ack = match MeshFrame::new(
            self.identity.id(),
            frame.source,
            self.take_sequence(),
            MessageKind::Ack,
            Priority::High,
            ACK_TTL,
            Bytes::copy_from_slice(&frame.sequence.to_le_bytes()),
            now,
        ) {
            Ok(ack) => ack,
            Err(e) => {
                warn!("Failed to build ack: {}", e);
                return false;
            }
        };

        self.sightings.mark_seen(ack.sight_key(), now);
        match self.transmit_frame(&ack) {
            Ok(()) => {
                Counters::incr(&self.counters.messages_sent);
                Counters::incr(&self.counters.acks_sent);
                debug!(
                    dest = format_args!("{:08x}", frame.source),
                    acked_seq = frame.sequence,
                    "Ack sent"
                );
                true
            }
            Err(e) => {
                debug!("Ack not sent: {}", e);
                false
            }
        }
    }

    /// Originate a frame from this node
    ///
    /// Returns the sequence number used.
    pub fn send_user_frame(
        &mut self,
        kind: MessageKind,
        priority: Priority,
        destination: NodeId,
        payload: impl Into<Bytes>,
    ) -> Result<u32> {
        let now = self.clock.monotonic_ms();
        let ttl = self.config.default_ttl;
        self.originate(kind, priority, destination, ttl, payload.into(), now)
    }

    /// Emit a heartbeat now and restart the heartbeat timer
    pub fn send_heartbeat(&mut self, now: u32) -> Result<u32> {
        self.last_heartbeat = now;
        self.originate(
            MessageKind::Heartbeat,
            Priority::Low,
            BROADCAST,
            HEARTBEAT_TTL,
            Bytes::new(),
            now,
        )
    }

    fn originate(
        &mut self,
        kind: MessageKind,
        priority: Priority,
        destination: NodeId,
        ttl: u8,
        payload: Bytes,
        now: u32,
    ) -> Result<u32> {
        let mut frame = MeshFrame::new(
            self.identity.id(),
            destination,
            0,
            kind,
            priority,
            ttl,
            payload,
            now,
        )?;
        frame.sequence = self.take_sequence();

        self.sightings.mark_seen(frame.sight_key(), now);
        self.transmit_frame(&frame)?;
        Counters::incr(&self.counters.messages_sent);

        debug!(
            dest = format_args!("{:08x}", destination),
            seq = frame.sequence,
            kind = ?kind,
            "Frame sent"
        );
        Ok(frame.sequence)
    }

    fn transmit_frame(&mut self, frame: &MeshFrame) -> Result<()> {
        let bytes = encode_frame(frame)?;
        self.radio.send(&bytes).map_err(|e| {
            Counters::incr(&self.counters.tx_errors);
            e.into()
        })
    }

    fn take_sequence(&mut self) -> u32 {
        let seq = self.next_sequence;
        self.next_sequence = match seq.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        seq
    }

    /// Evict aged sight records and routes
    pub fn cleanup(&mut self, now: u32) {
        self.last_cleanup = now;
        let sightings = self.sightings.expire(now);
        let routes = self.routes.expire(now);
        self.update_route_count();
        if sightings + routes > 0 {
            debug!(sightings, routes, "Cleanup");
        }
    }

    fn update_route_count(&self) {
        self.counters
            .routing_table_size
            .store(self.routes.len(), std::sync::atomic::Ordering::Relaxed);
    }

    /// Take the next locally delivered frame
    pub fn try_recv_user_frame(&self) -> Option<MeshFrame> {
        self.inbox.pop()
    }

    /// This node's id
    pub fn device_id(&self) -> NodeId {
        self.identity.id()
    }

    /// Replace and persist this node's id
    pub fn set_device_id(&mut self, id: NodeId) -> Result<()> {
        self.identity.set(id)
    }

    /// Counter snapshot
    pub fn stats(&self) -> MeshStats {
        self.stats_handle().snapshot()
    }

    /// Shared counter reader
    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle::new(Arc::clone(&self.counters), self.inbox.clone())
    }

    /// Shared inbox handle
    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    /// Known routes
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Processed-frame records
    pub fn sightings(&self) -> &SightMap {
        &self.sightings
    }

    /// Receive-interrupt flag
    pub fn rx_signal(&self) -> RxSignal {
        self.rx_signal.clone()
    }

    /// The owned radio
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// The owned radio, mutably
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}

impl<R: RadioLink> MeshSender for Router<R> {
    fn send_raw(&mut self, packet: &[u8]) -> Result<()> {
        // Suppress our own echo when the phone sends a native frame
        if let Ok(frame) = decode_frame(packet) {
            let now = self.clock.monotonic_ms();
            self.sightings.mark_seen(frame.sight_key(), now);
        }
        self.radio.send(packet).map_err(|e| {
            Counters::incr(&self.counters.tx_errors);
            e
        })?;
        Counters::incr(&self.counters.messages_sent);
        debug!(len = packet.len(), "Phone packet forwarded");
        Ok(())
    }
}

impl<R: RadioLink> std::fmt::Debug for Router<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("identity", &self.identity)
            .field("next_sequence", &self.next_sequence)
            .field("routes", &self.routes.len())
            .field("sightings", &self.sightings.len())
            .field("inbox", &self.inbox.len())
            .finish()
    }
}
