//! Test utilities for the router and bridge
//!
//! Nothing here needs hardware:
//!
//! - [`MockRadio`]: a radio whose traffic is injected and inspected directly
//! - [`VirtualAir`]: an in-memory medium joining several routers by explicit links
//! - [`MockGattHost`]: a BLE host that records notifications and advertising
//! - [`RecordingSender`]: a [`MeshSender`] that keeps what the bridge forwards
//!
//! # Example
//!
//! ```rust
//! use sims_mesh::test_utils::VirtualAir;
//!
//! let air = VirtualAir::new();
//! let (a, _) = air.add_node();
//! let (b, b_signal) = air.add_node();
//! air.link(a.index(), b.index());
//! # let _ = (b, b_signal);
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use sims_core::identity::{NVS_KEY_DEVICE_ID, NVS_NAMESPACE};
use sims_core::{
    DeviceIdentity, ManualClock, MemoryStore, MeshFrame, MessageKind, NodeId, ParamStore, Priority,
    RadioError, Result, RouterConfig,
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::bridge::{Advertisement, Characteristic, GapScanner, GattError, GattHost};
use crate::codec::encode_frame;
use crate::radio::{RadioLink, RxPacket, RxSignal};
use crate::router::{MeshSender, Router};

/// RSSI reported for packets delivered by the mocks
pub const MOCK_RSSI: i16 = -60;

/// SNR reported for packets delivered by the mocks
pub const MOCK_SNR: f32 = 9.5;

#[derive(Debug, Default)]
struct MockRadioState {
    incoming: VecDeque<RxPacket>,
    sent: Vec<Vec<u8>>,
    fail_with: Option<RadioError>,
}

/// Radio for single-router tests
///
/// Clones share state, so a test keeps one handle while the router owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<MockRadioState>>,
    signal: RxSignal,
}

impl MockRadio {
    /// Create an idle radio
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag this radio raises on receive
    pub fn signal(&self) -> RxSignal {
        self.signal.clone()
    }

    /// Queue a received packet and raise the receive flag
    pub fn inject(&self, data: impl Into<Bytes>) {
        self.inject_with_signal(data, MOCK_RSSI, MOCK_SNR);
    }

    /// Queue a received packet with explicit signal quality
    pub fn inject_with_signal(&self, data: impl Into<Bytes>, rssi: i16, snr: f32) {
        self.state.lock().incoming.push_back(RxPacket {
            data: data.into(),
            rssi,
            snr,
        });
        self.signal.raise();
    }

    /// Packets transmitted so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// Take and clear the transmitted packets
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().sent)
    }

    /// Make every send fail with `error` (or succeed again with `None`)
    pub fn fail_sends(&self, error: Option<RadioError>) {
        self.state.lock().fail_with = error;
    }
}

impl RadioLink for MockRadio {
    fn send(&mut self, packet: &[u8]) -> std::result::Result<(), RadioError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_with.clone() {
            return Err(err);
        }
        state.sent.push(packet.to_vec());
        Ok(())
    }

    fn recv(&mut self) -> std::result::Result<Option<RxPacket>, RadioError> {
        Ok(self.state.lock().incoming.pop_front())
    }
}

/// One packet put on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Index of the transmitting node
    pub from: usize,
    /// Packet bytes
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct AirNode {
    incoming: VecDeque<RxPacket>,
    signal: RxSignal,
}

#[derive(Debug, Default)]
struct AirState {
    nodes: Vec<AirNode>,
    links: HashSet<(usize, usize)>,
    loss: f64,
    log: Vec<Transmission>,
}

/// Shared in-memory radio medium
///
/// A transmission reaches exactly the nodes linked to the sender, each
/// independently lost with the configured probability.
#[derive(Debug, Clone, Default)]
pub struct VirtualAir {
    state: Arc<Mutex<AirState>>,
}

impl VirtualAir {
    /// Create an empty medium
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node, returning its radio and receive flag
    pub fn add_node(&self) -> (AirRadio, RxSignal) {
        let signal = RxSignal::new();
        let mut state = self.state.lock();
        state.nodes.push(AirNode {
            incoming: VecDeque::new(),
            signal: signal.clone(),
        });
        let radio = AirRadio {
            air: self.clone(),
            index: state.nodes.len() - 1,
        };
        (radio, signal)
    }

    /// Put nodes `a` and `b` in range of each other
    pub fn link(&self, a: usize, b: usize) {
        let mut state = self.state.lock();
        state.links.insert((a, b));
        state.links.insert((b, a));
    }

    /// Take nodes `a` and `b` out of range
    pub fn unlink(&self, a: usize, b: usize) {
        let mut state = self.state.lock();
        state.links.remove(&(a, b));
        state.links.remove(&(b, a));
    }

    /// Probability that any single delivery is lost
    pub fn set_loss(&self, probability: f64) {
        self.state.lock().loss = probability.clamp(0.0, 1.0);
    }

    /// Everything transmitted so far
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.state.lock().log.clone()
    }

    /// Transmissions by node `from`
    pub fn transmissions_from(&self, from: usize) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|t| t.from == from)
            .map(|t| t.data.clone())
            .collect()
    }

    /// Forget the transmission log
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Deliver `data` to node `to` as if heard over the air
    pub fn deliver(&self, to: usize, data: &[u8]) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(to) {
            node.incoming.push_back(RxPacket {
                data: Bytes::copy_from_slice(data),
                rssi: MOCK_RSSI,
                snr: MOCK_SNR,
            });
            node.signal.raise();
        }
    }

    fn transmit(&self, from: usize, data: &[u8]) {
        let mut state = self.state.lock();
        state.log.push(Transmission {
            from,
            data: data.to_vec(),
        });

        let loss = state.loss;
        let mut rng = rand::thread_rng();
        let receivers: Vec<usize> = (0..state.nodes.len())
            .filter(|&to| state.links.contains(&(from, to)))
            .filter(|_| loss == 0.0 || !rng.gen_bool(loss))
            .collect();

        let packet = Bytes::copy_from_slice(data);
        for to in receivers {
            let node = &mut state.nodes[to];
            node.incoming.push_back(RxPacket {
                data: packet.clone(),
                rssi: MOCK_RSSI,
                snr: MOCK_SNR,
            });
            node.signal.raise();
        }
    }

    fn receive(&self, index: usize) -> Option<RxPacket> {
        self.state
            .lock()
            .nodes
            .get_mut(index)
            .and_then(|node| node.incoming.pop_front())
    }
}

/// A node's radio on a [`VirtualAir`]
#[derive(Debug, Clone)]
pub struct AirRadio {
    air: VirtualAir,
    index: usize,
}

impl AirRadio {
    /// Position of this node on the medium
    pub fn index(&self) -> usize {
        self.index
    }
}

impl RadioLink for AirRadio {
    fn send(&mut self, packet: &[u8]) -> std::result::Result<(), RadioError> {
        self.air.transmit(self.index, packet);
        Ok(())
    }

    fn recv(&mut self) -> std::result::Result<Option<RxPacket>, RadioError> {
        Ok(self.air.receive(self.index))
    }
}

/// BLE host that records what the bridge asks of it
#[derive(Debug, Default)]
pub struct MockGattHost {
    notifications: Vec<Vec<u8>>,
    advertising: Option<Advertisement>,
    advertising_starts: usize,
    fail_notify: bool,
}

impl MockGattHost {
    /// Create a host with nothing recorded
    pub fn new() -> Self {
        Self::default()
    }

    /// FromNum values notified so far
    pub fn notifications(&self) -> Vec<Vec<u8>> {
        self.notifications.clone()
    }

    /// Times advertising was (re)started
    pub fn advertising_starts(&self) -> usize {
        self.advertising_starts
    }

    /// Advertisement currently on air
    pub fn advertising(&self) -> Option<&Advertisement> {
        self.advertising.as_ref()
    }

    /// Make notifications fail
    pub fn fail_notify(&mut self, fail: bool) {
        self.fail_notify = fail;
    }
}

impl GattHost for MockGattHost {
    fn notify(
        &mut self,
        characteristic: Characteristic,
        value: &[u8],
    ) -> std::result::Result<(), GattError> {
        if self.fail_notify {
            return Err(GattError::Host("notify rejected".into()));
        }
        if characteristic == Characteristic::FromNum {
            self.notifications.push(value.to_vec());
        }
        Ok(())
    }
}

impl GapScanner for MockGattHost {
    fn start_advertising(
        &mut self,
        advertisement: &Advertisement,
    ) -> std::result::Result<(), GattError> {
        self.advertising = Some(advertisement.clone());
        self.advertising_starts += 1;
        Ok(())
    }

    fn stop_advertising(&mut self) -> std::result::Result<(), GattError> {
        self.advertising = None;
        Ok(())
    }
}

/// [`MeshSender`] that keeps every packet
#[derive(Debug, Default)]
pub struct RecordingSender {
    /// Packets forwarded, in order
    pub sent: Vec<Vec<u8>>,
}

impl MeshSender for RecordingSender {
    fn send_raw(&mut self, packet: &[u8]) -> Result<()> {
        self.sent.push(packet.to_vec());
        Ok(())
    }
}

/// Identity pinned to `id` in a fresh in-memory store
pub fn identity(id: NodeId) -> DeviceIdentity {
    let mut store = MemoryStore::new();
    // MemoryStore never fails
    let _ = store.set_u32(NVS_NAMESPACE, NVS_KEY_DEVICE_ID, id);
    DeviceIdentity::load_or_create(Box::new(store), [0; 6])
}

/// Router `id` on a [`MockRadio`] with a manual clock at zero
pub fn test_router(id: NodeId) -> (Router<MockRadio>, MockRadio, Arc<ManualClock>) {
    test_router_with(id, RouterConfig::default())
}

/// [`test_router`] with an explicit configuration
pub fn test_router_with(
    id: NodeId,
    config: RouterConfig,
) -> (Router<MockRadio>, MockRadio, Arc<ManualClock>) {
    let radio = MockRadio::new();
    let clock = Arc::new(ManualClock::new(0));
    let router = Router::new(
        radio.clone(),
        radio.signal(),
        identity(id),
        clock.clone(),
        config,
    );
    (router, radio, clock)
}

/// Encoded native frame with ttl 60, normal priority and no payload
pub fn frame_bytes(
    source: NodeId,
    destination: NodeId,
    sequence: u32,
    kind: MessageKind,
    hop_count: u8,
    origin_ms: u32,
) -> Vec<u8> {
    let mut frame = MeshFrame::new(
        source,
        destination,
        sequence,
        kind,
        Priority::Normal,
        60,
        Bytes::new(),
        origin_ms,
    )
    .unwrap_or_else(|e| panic!("test frame rejected: {e}"));
    frame.hop_count = hop_count;
    encode_frame(&frame)
        .unwrap_or_else(|e| panic!("test frame rejected: {e}"))
        .to_vec()
}
