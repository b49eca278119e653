//! BLE phone bridge
//!
//! Presents the node to a phone as an open mesh device. The phone writes
//! `ToRadio` records, polls `FromRadio` with reads and subscribes to
//! `FromNum` to learn when new packets are waiting.
//!
//! # Handshake
//!
//! ```text
//! SendNothing --want_config_id--> SendMyInfo --read--> SendOwnNodeInfo --read-->
//! SendChannels --read per channel--> SendConfigComplete --read--> SendPackets
//! ```
//!
//! Every step after `SendNothing` is driven by a phone read and each
//! descriptor is emitted once per handshake. Connect and disconnect return to
//! `SendNothing` and discard anything staged.
//!
//! # Threading
//!
//! BLE host callbacks run on the host's task. They go through
//! [`BridgeCallbacks`], which only appends events to a bounded channel; the
//! main context decodes them in [`BleBridge::poll`]. Reads are the exception:
//! they are answered synchronously from shared state under a lock.

pub mod descriptors;
pub mod gatt;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use sims_core::{BridgeConfig, MeshError, NodeId, Priority};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::queue::{Inbox, Outbox};
use crate::router::MeshSender;
use descriptors::{decode_to_radio, encode_packet, handshake_records, DeviceDescriptor, ToRadio};
pub use gatt::{
    device_name, Advertisement, Characteristic, GapScanner, GattError, GattHost, DEFAULT_MTU,
};

/// Capacity of the host-event ingestion channel
pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BridgeState {
    /// Idle until the phone asks for configuration
    SendNothing,
    /// Next read returns MyNodeInfo
    SendMyInfo,
    /// Next read returns this node's NodeInfo
    SendOwnNodeInfo,
    /// Reads return channel descriptors
    SendChannels,
    /// Next read returns ConfigComplete
    SendConfigComplete,
    /// Steady state: reads return queued packets
    SendPackets,
}

/// Event delivered by the BLE host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// A central connected
    Connected,
    /// The central went away
    Disconnected,
    /// Notifications toggled on a characteristic
    Subscribed {
        /// Characteristic
        characteristic: Characteristic,
        /// Whether notifications are now on
        enabled: bool,
    },
    /// The central wrote a value
    Write {
        /// Characteristic written
        characteristic: Characteristic,
        /// Value
        data: Bytes,
    },
    /// ATT MTU negotiated
    MtuChanged(u16),
}

/// Bridge counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// FromRadio reads answered
    pub reads_served: u64,
    /// Handshake descriptors delivered
    pub descriptors_sent: u64,
    /// Mesh packets handed to the phone
    pub packets_to_phone: u64,
    /// Phone packets handed to the mesh
    pub packets_from_phone: u64,
    /// Phone packets the radio refused
    pub forward_errors: u64,
    /// ToRadio writes that did not decode
    pub decode_errors: u64,
    /// Packets written before the handshake completed
    pub not_ready_writes: u64,
    /// Writes carrying only unhandled fields
    pub unknown_writes: u64,
    /// FromNum notifications sent
    pub notifications: u64,
    /// Host events lost because the ingestion channel was full
    pub events_dropped: u64,
    /// Completed or restarted handshakes
    pub handshakes: u64,
}

#[derive(Debug)]
struct Shared {
    state: BridgeState,
    nonce: Option<u32>,
    outbox: Outbox,
    channel_index: usize,
    channel_count: usize,
    connected: bool,
    subscribed: bool,
    mtu: u16,
    from_num: u32,
    stats: BridgeStats,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: BridgeState::SendNothing,
            nonce: None,
            outbox: Outbox::new(),
            channel_index: 0,
            channel_count: 0,
            connected: false,
            subscribed: false,
            mtu: DEFAULT_MTU,
            from_num: 0,
            stats: BridgeStats::default(),
        }
    }

    fn reset(&mut self) {
        self.state = BridgeState::SendNothing;
        self.nonce = None;
        self.outbox.clear();
        self.channel_index = 0;
        self.channel_count = 0;
    }

    /// Answer one FromRadio read
    fn serve_read(&mut self, inbox: &Inbox) -> Bytes {
        self.stats.reads_served += 1;

        let next = match self.state {
            BridgeState::SendNothing => return Bytes::new(),
            BridgeState::SendMyInfo => BridgeState::SendOwnNodeInfo,
            BridgeState::SendOwnNodeInfo => BridgeState::SendChannels,
            BridgeState::SendChannels => {
                self.channel_index += 1;
                if self.channel_index >= self.channel_count {
                    BridgeState::SendConfigComplete
                } else {
                    BridgeState::SendChannels
                }
            }
            BridgeState::SendConfigComplete => BridgeState::SendPackets,
            BridgeState::SendPackets => return self.next_packet(inbox),
        };

        match self.outbox.pop() {
            Some(record) => {
                trace!(state = ?self.state, next = ?next, len = record.len(), "Descriptor read");
                self.stats.descriptors_sent += 1;
                self.state = next;
                if next == BridgeState::SendPackets {
                    info!(nonce = ?self.nonce, "Phone configuration complete");
                }
                record
            }
            None => {
                warn!(state = ?self.state, "Handshake record missing, resetting");
                self.reset();
                Bytes::new()
            }
        }
    }

    fn next_packet(&mut self, inbox: &Inbox) -> Bytes {
        if self.outbox.is_empty() {
            if let Some(frame) = inbox.pop() {
                match encode_packet(&frame) {
                    Ok(record) => {
                        if let Err(e) = self.outbox.push(frame.priority, record) {
                            warn!("Failed to stage packet for phone: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to wrap packet for phone: {}", e),
                }
            }
        }

        match self.outbox.pop() {
            Some(record) => {
                self.stats.packets_to_phone += 1;
                record
            }
            None => Bytes::new(),
        }
    }
}

/// Entry points for the BLE host's callbacks
///
/// Cheap to clone; every clone feeds the same bridge.
#[derive(Debug, Clone)]
pub struct BridgeCallbacks {
    shared: Arc<Mutex<Shared>>,
    inbox: Inbox,
    events: mpsc::Sender<HostEvent>,
}

impl BridgeCallbacks {
    fn push(&self, event: HostEvent) {
        if let Err(e) = self.events.try_send(event) {
            self.shared.lock().stats.events_dropped += 1;
            warn!("Bridge event dropped: {}", e);
        }
    }

    /// A central connected
    pub fn on_connect(&self) {
        self.push(HostEvent::Connected);
    }

    /// The central disconnected
    pub fn on_disconnect(&self) {
        self.push(HostEvent::Disconnected);
    }

    /// Notifications toggled
    pub fn on_subscribe(&self, characteristic: Characteristic, enabled: bool) {
        self.push(HostEvent::Subscribed {
            characteristic,
            enabled,
        });
    }

    /// The central wrote `data`
    pub fn on_write(&self, characteristic: Characteristic, data: &[u8]) {
        self.push(HostEvent::Write {
            characteristic,
            data: Bytes::copy_from_slice(data),
        });
    }

    /// ATT MTU negotiated
    pub fn on_mtu(&self, mtu: u16) {
        self.push(HostEvent::MtuChanged(mtu));
    }

    /// Produce the value for a read, synchronously
    pub fn on_read(&self, characteristic: Characteristic) -> Bytes {
        match characteristic {
            Characteristic::FromRadio => self.shared.lock().serve_read(&self.inbox),
            Characteristic::FromNum => {
                Bytes::copy_from_slice(&self.shared.lock().from_num.to_le_bytes())
            }
            Characteristic::ToRadio => Bytes::new(),
        }
    }
}

/// Phone bridge state machine
pub struct BleBridge<H: GattHost + GapScanner> {
    host: H,
    config: BridgeConfig,
    device: DeviceDescriptor,
    advertisement: Advertisement,
    shared: Arc<Mutex<Shared>>,
    inbox: Inbox,
    events_tx: mpsc::Sender<HostEvent>,
    events: mpsc::Receiver<HostEvent>,
}

impl<H: GattHost + GapScanner> BleBridge<H> {
    /// Create a bridge for node `node_num` serving frames from `inbox`
    pub fn new(host: H, config: BridgeConfig, node_num: NodeId, inbox: Inbox) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let device = DeviceDescriptor::from_config(node_num, &config);
        let advertisement = Advertisement::new(
            &device_name(&config.name_prefix, node_num),
            config.adv_interval_min,
            config.adv_interval_max,
        );
        Self {
            host,
            config,
            device,
            advertisement,
            shared: Arc::new(Mutex::new(Shared::new())),
            inbox,
            events_tx,
            events,
        }
    }

    /// Handle for the host stack's callbacks
    pub fn callbacks(&self) -> BridgeCallbacks {
        BridgeCallbacks {
            shared: Arc::clone(&self.shared),
            inbox: self.inbox.clone(),
            events: self.events_tx.clone(),
        }
    }

    /// Begin advertising
    pub fn start(&mut self) -> Result<(), GattError> {
        self.advertisement.validate()?;
        self.host.start_advertising(&self.advertisement)?;
        info!(name = %self.advertisement.name, "Advertising");
        Ok(())
    }

    /// Update the node number after an identity change
    ///
    /// Takes effect at the next handshake and the next advertising restart.
    pub fn set_node_num(&mut self, node_num: NodeId) {
        self.device = DeviceDescriptor::from_config(node_num, &self.config);
        self.advertisement = Advertisement::new(
            &device_name(&self.config.name_prefix, node_num),
            self.config.adv_interval_min,
            self.config.adv_interval_max,
        );
    }

    /// Process pending host events and signal new inbox data
    ///
    /// Runs on the main context. Phone packets are handed to `sender`.
    pub fn poll(&mut self, sender: &mut dyn MeshSender) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event, sender);
        }
        self.signal_new_data();
    }

    fn handle_event(&mut self, event: HostEvent, sender: &mut dyn MeshSender) {
        match event {
            HostEvent::Connected => {
                let mut shared = self.shared.lock();
                shared.reset();
                shared.connected = true;
                shared.subscribed = false;
                shared.mtu = DEFAULT_MTU;
                info!("Phone connected");
            }
            HostEvent::Disconnected => {
                {
                    let mut shared = self.shared.lock();
                    shared.reset();
                    shared.connected = false;
                    shared.subscribed = false;
                    shared.mtu = DEFAULT_MTU;
                }
                info!("Phone disconnected, restarting advertising");
                if let Err(e) = self.host.start_advertising(&self.advertisement) {
                    warn!("Failed to restart advertising: {}", e);
                }
            }
            HostEvent::Subscribed {
                characteristic: Characteristic::FromNum,
                enabled,
            } => {
                self.shared.lock().subscribed = enabled;
                debug!(enabled, "FromNum subscription changed");
            }
            HostEvent::Subscribed { characteristic, .. } => {
                debug!(?characteristic, "Ignoring subscription");
            }
            HostEvent::MtuChanged(mtu) => {
                self.shared.lock().mtu = mtu;
                debug!(mtu, "MTU negotiated");
            }
            HostEvent::Write {
                characteristic: Characteristic::ToRadio,
                data,
            } => self.handle_write(&data, sender),
            HostEvent::Write { characteristic, .. } => {
                debug!(?characteristic, "Ignoring write to read-only characteristic");
            }
        }
    }

    fn handle_write(&mut self, data: &[u8], sender: &mut dyn MeshSender) {
        let record = match decode_to_radio(data) {
            Ok(record) => record,
            Err(e) => {
                self.shared.lock().stats.decode_errors += 1;
                debug!(len = data.len(), "Bad ToRadio write: {}", e);
                return;
            }
        };

        match record {
            ToRadio::WantConfig(nonce) => self.start_handshake(nonce),
            ToRadio::Packet(packet) => {
                if self.state() != BridgeState::SendPackets {
                    let err = MeshError::NotInReadyState;
                    self.shared.lock().stats.not_ready_writes += 1;
                    warn!(code = err.error_code(), len = packet.len(), "Phone packet ignored");
                    return;
                }
                match sender.send_raw(&packet) {
                    Ok(()) => self.shared.lock().stats.packets_from_phone += 1,
                    Err(e) => {
                        self.shared.lock().stats.forward_errors += 1;
                        warn!(code = e.error_code(), "Phone packet not transmitted: {}", e);
                    }
                }
            }
            ToRadio::Unknown(fields) => {
                self.shared.lock().stats.unknown_writes += 1;
                debug!(?fields, "Ignoring ToRadio fields");
            }
        }
    }

    fn start_handshake(&mut self, nonce: u32) {
        let complete_id = if self.config.echo_config_nonce { nonce } else { 1 };
        let records = match handshake_records(&self.device, complete_id) {
            Ok(records) => records,
            Err(e) => {
                warn!("Failed to encode handshake: {}", e);
                self.shared.lock().reset();
                return;
            }
        };

        let mut shared = self.shared.lock();
        shared.reset();
        for record in records {
            if let Err(e) = shared.outbox.push(Priority::Normal, record) {
                warn!("Failed to stage handshake: {}", e);
                shared.reset();
                return;
            }
        }
        shared.nonce = Some(nonce);
        shared.channel_count = self.device.channels.len();
        shared.state = BridgeState::SendMyInfo;
        shared.stats.handshakes += 1;
        info!(nonce, channels = shared.channel_count, "Phone requested configuration");
    }

    fn signal_new_data(&mut self) {
        if !self.inbox.take_became_ready() {
            return;
        }

        let value = {
            let mut shared = self.shared.lock();
            if shared.state != BridgeState::SendPackets || !shared.connected || !shared.subscribed {
                return;
            }
            shared.from_num = shared.from_num.wrapping_add(1);
            shared.from_num
        };

        match self.host.notify(Characteristic::FromNum, &value.to_le_bytes()) {
            Ok(()) => {
                self.shared.lock().stats.notifications += 1;
                trace!(from_num = value, "FromNum notified");
            }
            Err(e) => debug!("FromNum notify failed: {}", e),
        }
    }

    /// Current handshake state
    pub fn state(&self) -> BridgeState {
        self.shared.lock().state
    }

    /// Nonce of the handshake in progress
    pub fn nonce(&self) -> Option<u32> {
        self.shared.lock().nonce
    }

    /// Negotiated MTU
    pub fn mtu(&self) -> u16 {
        self.shared.lock().mtu
    }

    /// Whether a phone is connected
    pub fn is_connected(&self) -> bool {
        self.shared.lock().connected
    }

    /// Current FromNum counter
    pub fn from_num(&self) -> u32 {
        self.shared.lock().from_num
    }

    /// Counter snapshot
    pub fn stats(&self) -> BridgeStats {
        self.shared.lock().stats.clone()
    }

    /// Current advertisement
    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }

    /// The BLE host
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The BLE host, mutably
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

impl<H: GattHost + GapScanner> std::fmt::Debug for BleBridge<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleBridge")
            .field("node_num", &format_args!("{:08x}", self.device.node_num))
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::descriptors::{
        encode_to_radio_packet, encode_want_config, from_radio_kind, FromRadioKind,
    };
    use super::*;
    use crate::test_utils::{MockGattHost, RecordingSender};
    use bytes::Bytes;
    use sims_core::{MeshFrame, MessageKind, BROADCAST};

    fn bridge() -> (BleBridge<MockGattHost>, BridgeCallbacks, Inbox) {
        let inbox = Inbox::new(10);
        let bridge = BleBridge::new(MockGattHost::new(), BridgeConfig::default(), 1, inbox.clone());
        let callbacks = bridge.callbacks();
        (bridge, callbacks, inbox)
    }

    fn frame(seq: u32) -> MeshFrame {
        MeshFrame::new(
            2,
            BROADCAST,
            seq,
            MessageKind::Incident,
            Priority::Normal,
            60,
            Bytes::new(),
            0,
        )
        .unwrap()
    }

    fn handshake(
        bridge: &mut BleBridge<MockGattHost>,
        cb: &BridgeCallbacks,
        sender: &mut RecordingSender,
    ) {
        cb.on_connect();
        cb.on_subscribe(Characteristic::FromNum, true);
        cb.on_write(Characteristic::ToRadio, &encode_want_config(42).unwrap());
        bridge.poll(sender);
        for _ in 0..4 {
            assert!(!cb.on_read(Characteristic::FromRadio).is_empty());
        }
        assert_eq!(bridge.state(), BridgeState::SendPackets);
    }

    #[test]
    fn test_start_advertises() {
        let (mut bridge, _, _) = bridge();
        bridge.start().unwrap();
        assert_eq!(bridge.host().advertising_starts(), 1);
        assert_eq!(bridge.advertisement().name, "SIMS-0001");
    }

    #[test]
    fn test_reads_before_handshake_are_empty() {
        let (mut bridge, cb, inbox) = bridge();
        let mut sender = RecordingSender::default();
        cb.on_connect();
        bridge.poll(&mut sender);
        inbox.push(frame(1));
        assert!(cb.on_read(Characteristic::FromRadio).is_empty());
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_handshake_sequence() {
        let (mut bridge, cb, _) = bridge();
        let mut sender = RecordingSender::default();
        cb.on_connect();
        cb.on_write(Characteristic::ToRadio, &encode_want_config(42).unwrap());
        bridge.poll(&mut sender);
        assert_eq!(bridge.state(), BridgeState::SendMyInfo);
        assert_eq!(bridge.nonce(), Some(42));

        let kinds: Vec<_> = (0..4)
            .map(|_| from_radio_kind(&cb.on_read(Characteristic::FromRadio)))
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(FromRadioKind::MyInfo),
                Some(FromRadioKind::NodeInfo),
                Some(FromRadioKind::Channel),
                Some(FromRadioKind::ConfigComplete)
            ]
        );
        assert!(cb.on_read(Characteristic::FromRadio).is_empty());
        assert_eq!(bridge.stats().descriptors_sent, 4);
    }

    #[test]
    fn test_handshake_restart_mid_stream() {
        let (mut bridge, cb, _) = bridge();
        let mut sender = RecordingSender::default();
        cb.on_connect();
        cb.on_write(Characteristic::ToRadio, &encode_want_config(1).unwrap());
        bridge.poll(&mut sender);
        cb.on_read(Characteristic::FromRadio);
        cb.on_read(Characteristic::FromRadio);

        cb.on_write(Characteristic::ToRadio, &encode_want_config(2).unwrap());
        bridge.poll(&mut sender);
        assert_eq!(bridge.state(), BridgeState::SendMyInfo);
        assert_eq!(
            from_radio_kind(&cb.on_read(Characteristic::FromRadio)),
            Some(FromRadioKind::MyInfo)
        );
    }

    #[test]
    fn test_echo_nonce() {
        let inbox = Inbox::new(10);
        let config = sims_core::MeshConfigBuilder::new()
            .echo_config_nonce(true)
            .build()
            .bridge;
        let mut bridge = BleBridge::new(MockGattHost::new(), config, 1, inbox);
        let cb = bridge.callbacks();
        let mut sender = RecordingSender::default();
        cb.on_connect();
        cb.on_write(Characteristic::ToRadio, &encode_want_config(42).unwrap());
        bridge.poll(&mut sender);
        let last = (0..4).map(|_| cb.on_read(Characteristic::FromRadio)).last().unwrap();
        assert_eq!(crate::codec::extract_varint(&last, 7), Some(42));
    }

    #[test]
    fn test_packet_before_ready_is_ignored() {
        let (mut bridge, cb, _) = bridge();
        let mut sender = RecordingSender::default();
        cb.on_connect();
        cb.on_write(Characteristic::ToRadio, &encode_to_radio_packet(&[1, 2, 3]).unwrap());
        bridge.poll(&mut sender);
        assert!(sender.sent.is_empty());
        assert_eq!(bridge.stats().not_ready_writes, 1);
    }

    #[test]
    fn test_packet_forwarded_verbatim() {
        let (mut bridge, cb, _) = bridge();
        let mut sender = RecordingSender::default();
        handshake(&mut bridge, &cb, &mut sender);

        let blob: Vec<u8> = (0..42).collect();
        cb.on_write(Characteristic::ToRadio, &encode_to_radio_packet(&blob).unwrap());
        bridge.poll(&mut sender);
        assert_eq!(sender.sent, vec![blob]);
        assert_eq!(bridge.stats().packets_from_phone, 1);
    }

    #[test]
    fn test_bad_writes_counted() {
        let (mut bridge, cb, _) = bridge();
        let mut sender = RecordingSender::default();
        cb.on_connect();
        cb.on_write(Characteristic::ToRadio, &[0xFF]);
        cb.on_write(Characteristic::ToRadio, &[0x10, 0x01]);
        cb.on_write(Characteristic::FromNum, &[0x00]);
        bridge.poll(&mut sender);
        let stats = bridge.stats();
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.unknown_writes, 1);
        assert_eq!(bridge.state(), BridgeState::SendNothing);
    }

    #[test]
    fn test_packets_served_and_notified() {
        let (mut bridge, cb, inbox) = bridge();
        let mut sender = RecordingSender::default();
        handshake(&mut bridge, &cb, &mut sender);

        inbox.push(frame(1));
        inbox.push(frame(2));
        bridge.poll(&mut sender);
        assert_eq!(bridge.host().notifications(), vec![1u32.to_le_bytes().to_vec()]);
        assert_eq!(
            cb.on_read(Characteristic::FromNum),
            Bytes::copy_from_slice(&1u32.to_le_bytes())
        );

        let first = cb.on_read(Characteristic::FromRadio);
        assert_eq!(from_radio_kind(&first), Some(FromRadioKind::Packet));
        let second = cb.on_read(Characteristic::FromRadio);
        assert_eq!(from_radio_kind(&second), Some(FromRadioKind::Packet));
        assert!(cb.on_read(Characteristic::FromRadio).is_empty());
        assert_eq!(bridge.stats().packets_to_phone, 2);

        inbox.push(frame(3));
        bridge.poll(&mut sender);
        assert_eq!(bridge.host().notifications().len(), 2);
        assert_eq!(bridge.from_num(), 2);
    }

    #[test]
    fn test_no_notify_without_subscriber() {
        let (mut bridge, cb, inbox) = bridge();
        let mut sender = RecordingSender::default();
        handshake(&mut bridge, &cb, &mut sender);
        cb.on_subscribe(Characteristic::FromNum, false);
        bridge.poll(&mut sender);

        inbox.push(frame(1));
        bridge.poll(&mut sender);
        assert!(bridge.host().notifications().is_empty());
    }

    #[test]
    fn test_disconnect_resets_and_readvertises() {
        let (mut bridge, cb, _) = bridge();
        let mut sender = RecordingSender::default();
        bridge.start().unwrap();
        cb.on_connect();
        cb.on_mtu(185);
        cb.on_write(Characteristic::ToRadio, &encode_want_config(42).unwrap());
        bridge.poll(&mut sender);
        assert_eq!(bridge.mtu(), 185);

        cb.on_disconnect();
        bridge.poll(&mut sender);
        assert_eq!(bridge.state(), BridgeState::SendNothing);
        assert_eq!(bridge.nonce(), None);
        assert_eq!(bridge.mtu(), DEFAULT_MTU);
        assert!(!bridge.is_connected());
        assert_eq!(bridge.host().advertising_starts(), 2);

        cb.on_connect();
        bridge.poll(&mut sender);
        for _ in 0..5 {
            assert!(cb.on_read(Characteristic::FromRadio).is_empty());
        }
    }

    #[test]
    fn test_event_overflow_counted() {
        let (bridge, cb, _) = bridge();
        for _ in 0..EVENT_QUEUE_CAPACITY + 3 {
            cb.on_mtu(23);
        }
        assert_eq!(bridge.stats().events_dropped, 3);
    }
}
