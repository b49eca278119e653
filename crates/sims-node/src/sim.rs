//! Simulated mesh
//!
//! A line of routers on an in-memory air medium. Node 0 carries the phone
//! bridge with a scripted phone attached; the last node reports an incident
//! every [`INCIDENT_INTERVAL_MS`].

use serde::Serialize;
use sims_core::{
    elapsed_ms, node_id_string, Clock, DeviceIdentity, MeshConfig, MessageKind, ParamStore,
    Priority, BROADCAST,
};
use sims_mesh::bridge::descriptors::{encode_want_config, from_radio_kind, FromRadioKind};
use sims_mesh::codec::extract_length_delimited;
use sims_mesh::test_utils::{AirRadio, VirtualAir};
use sims_mesh::{
    decode_frame, Advertisement, BleBridge, BridgeCallbacks, BridgeStats, Characteristic,
    GapScanner, GattError, GattHost, MeshStats, Router,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Time between incident reports from the last node
pub const INCIDENT_INTERVAL_MS: u32 = 10_000;

/// MTU the scripted phone negotiates
const PHONE_MTU: u16 = 247;

/// MAC assigned to simulated node `index`
pub fn node_mac(index: usize) -> [u8; 6] {
    let n = index as u16 + 1;
    let [hi, lo] = n.to_be_bytes();
    [0x24, 0x6f, 0x28, 0x00, hi, lo]
}

/// BLE host that logs instead of touching a radio
#[derive(Debug, Default)]
pub struct SimHost {
    from_num: Arc<AtomicU32>,
    advertising: bool,
}

impl GattHost for SimHost {
    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) -> Result<(), GattError> {
        if characteristic == Characteristic::FromNum {
            if let Ok(bytes) = <[u8; 4]>::try_from(value) {
                self.from_num.store(u32::from_le_bytes(bytes), Ordering::SeqCst);
            }
        }
        trace!(?characteristic, len = value.len(), "Notify");
        Ok(())
    }
}

impl GapScanner for SimHost {
    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), GattError> {
        self.advertising = true;
        debug!(
            name = %advertisement.name,
            interval_min = advertisement.interval_min,
            interval_max = advertisement.interval_max,
            "Advertising started"
        );
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), GattError> {
        self.advertising = false;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhoneState {
    Idle,
    Configuring,
    Ready,
}

/// What the scripted phone has seen
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhoneStats {
    /// Handshake descriptors read
    pub descriptors: u64,
    /// Mesh packets read
    pub packets: u64,
    /// Of which incidents
    pub incidents: u64,
    /// Payload of the latest incident
    pub last_incident: Option<String>,
}

/// Phone that connects, configures and then drains on every FromNum change
#[derive(Debug)]
pub struct ScriptedPhone {
    callbacks: BridgeCallbacks,
    from_num: Arc<AtomicU32>,
    seen_from_num: u32,
    state: PhoneState,
    nonce: u32,
    stats: PhoneStats,
}

impl ScriptedPhone {
    fn new(callbacks: BridgeCallbacks, from_num: Arc<AtomicU32>) -> Self {
        Self {
            callbacks,
            from_num,
            seen_from_num: 0,
            state: PhoneState::Idle,
            nonce: rand::random(),
            stats: PhoneStats::default(),
        }
    }

    fn step(&mut self) {
        match self.state {
            PhoneState::Idle => self.connect(),
            PhoneState::Configuring => self.drain(),
            PhoneState::Ready => {
                let from_num = self.from_num.load(Ordering::SeqCst);
                if from_num != self.seen_from_num {
                    self.seen_from_num = from_num;
                    self.drain();
                }
            }
        }
    }

    fn connect(&mut self) {
        let want_config = match encode_want_config(self.nonce) {
            Ok(record) => record,
            Err(e) => {
                warn!("Phone could not build want_config: {}", e);
                return;
            }
        };
        self.callbacks.on_connect();
        self.callbacks.on_mtu(PHONE_MTU);
        self.callbacks.on_subscribe(Characteristic::FromNum, true);
        self.callbacks.on_write(Characteristic::ToRadio, &want_config);
        self.state = PhoneState::Configuring;
        info!(nonce = self.nonce, "Phone connected, requesting configuration");
    }

    fn drain(&mut self) {
        loop {
            let record = self.callbacks.on_read(Characteristic::FromRadio);
            if record.is_empty() {
                return;
            }
            match from_radio_kind(&record) {
                Some(FromRadioKind::Packet) => self.packet(&record),
                Some(FromRadioKind::ConfigComplete) => {
                    self.stats.descriptors += 1;
                    self.state = PhoneState::Ready;
                    info!(descriptors = self.stats.descriptors, "Phone configured");
                }
                Some(_) => self.stats.descriptors += 1,
                None => warn!(len = record.len(), "Phone read an unknown record"),
            }
        }
    }

    fn packet(&mut self, record: &[u8]) {
        self.stats.packets += 1;
        let Some(native) = extract_length_delimited(record, 2) else {
            return;
        };
        match decode_frame(native) {
            Ok(frame) if frame.kind == MessageKind::Incident => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                info!(
                    source = %node_id_string(frame.source),
                    hops = frame.hop_count,
                    "Phone received incident: {}",
                    text
                );
                self.stats.incidents += 1;
                self.stats.last_incident = Some(text);
            }
            Ok(frame) => trace!(kind = ?frame.kind, "Phone received packet"),
            Err(e) => warn!("Phone received undecodable packet: {}", e),
        }
    }

    /// Counters
    pub fn stats(&self) -> &PhoneStats {
        &self.stats
    }

    /// Whether the handshake has completed
    pub fn is_ready(&self) -> bool {
        self.state == PhoneState::Ready
    }
}

/// Per-node section of the report
#[derive(Debug, Serialize)]
pub struct NodeReport {
    /// Node id as `!xxxxxxxx`
    pub id: String,
    /// Router counters
    pub stats: MeshStats,
}

/// Final simulation summary
#[derive(Debug, Serialize)]
pub struct Report {
    /// Simulated time covered
    pub elapsed_ms: u32,
    /// Incidents originated by the last node
    pub incidents_sent: u64,
    /// Router counters, node 0 first
    pub nodes: Vec<NodeReport>,
    /// Bridge counters of node 0
    pub bridge: BridgeStats,
    /// Scripted phone counters
    pub phone: PhoneStats,
}

/// The simulated mesh
pub struct Simulation {
    air: VirtualAir,
    routers: Vec<Router<AirRadio>>,
    bridge: BleBridge<SimHost>,
    phone: ScriptedPhone,
    started: u32,
    last_incident: u32,
    incidents_sent: u64,
}

impl Simulation {
    /// Build one node per store, linked in a line
    pub fn new(
        config: &MeshConfig,
        stores: Vec<Box<dyn ParamStore>>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!stores.is_empty(), "at least one node is required");
        config.validate()?;

        let air = VirtualAir::new();
        let routers: Vec<_> = stores
            .into_iter()
            .enumerate()
            .map(|(index, store)| {
                let (radio, signal) = air.add_node();
                let identity = DeviceIdentity::load_or_create_at(
                    store,
                    node_mac(index),
                    config.identity.clone(),
                );
                Router::new(radio, signal, identity, Arc::clone(&clock), config.router.clone())
            })
            .collect();
        for index in 1..routers.len() {
            air.link(index - 1, index);
        }

        let host = SimHost::default();
        let from_num = Arc::clone(&host.from_num);
        let mut bridge = BleBridge::new(
            host,
            config.bridge.clone(),
            routers[0].device_id(),
            routers[0].inbox(),
        );
        bridge.start()?;
        let phone = ScriptedPhone::new(bridge.callbacks(), from_num);

        let now = clock.monotonic_ms();
        info!(
            nodes = routers.len(),
            gateway = %node_id_string(routers[0].device_id()),
            "Simulation ready"
        );
        Ok(Self {
            air,
            routers,
            bridge,
            phone,
            started: now,
            last_incident: now,
            incidents_sent: 0,
        })
    }

    /// Probability that a single delivery is lost
    pub fn set_loss(&self, probability: f64) {
        self.air.set_loss(probability);
    }

    /// Advance every node by one main-loop iteration at `now`
    pub fn step(&mut self, now: u32) {
        if elapsed_ms(now, self.last_incident) >= INCIDENT_INTERVAL_MS {
            self.last_incident = now;
            self.report_incident();
        }

        for router in &mut self.routers {
            router.tick(now);
        }

        // Nodes without a phone consume their own deliveries
        for router in self.routers.iter().skip(1) {
            while let Some(frame) = router.try_recv_user_frame() {
                trace!(
                    node = %node_id_string(router.device_id()),
                    source = %node_id_string(frame.source),
                    kind = ?frame.kind,
                    "Delivered"
                );
            }
        }

        self.bridge.poll(&mut self.routers[0]);
        self.phone.step();
    }

    fn report_incident(&mut self) {
        let Some(reporter) = self.routers.last_mut() else {
            return;
        };
        let text = format!(
            "incident #{} at {}",
            self.incidents_sent + 1,
            node_id_string(reporter.device_id())
        );
        match reporter.send_user_frame(
            MessageKind::Incident,
            Priority::High,
            BROADCAST,
            text.into_bytes(),
        ) {
            Ok(seq) => {
                self.incidents_sent += 1;
                debug!(seq, "Incident reported");
            }
            Err(e) => warn!(code = e.error_code(), "Incident not sent: {}", e),
        }
    }

    /// The scripted phone
    pub fn phone(&self) -> &ScriptedPhone {
        &self.phone
    }

    /// Routers, node 0 first
    pub fn routers(&self) -> &[Router<AirRadio>] {
        &self.routers
    }

    /// Summary at `now`
    pub fn report(&self, now: u32) -> Report {
        Report {
            elapsed_ms: elapsed_ms(now, self.started),
            incidents_sent: self.incidents_sent,
            nodes: self
                .routers
                .iter()
                .map(|r| NodeReport {
                    id: node_id_string(r.device_id()),
                    stats: r.stats(),
                })
                .collect(),
            bridge: self.bridge.stats(),
            phone: self.phone.stats.clone(),
        }
    }
}
