//! Integration tests for the SIMS mesh router and phone bridge
//!
//! These tests exercise several routers over a shared virtual air medium and
//! a bridge driven through its host callbacks:
//! - Broadcast, relay and route learning across a line of nodes
//! - Duplicate suppression and idempotent processing
//! - Directed acknowledgements
//! - The phone configuration handshake, forwarding and FromNum signalling
//! - Inbox overflow and table cleanup

use bytes::Bytes;
use sims_core::{
    BridgeConfig, ChannelConfig, ManualClock, MeshFrame, MessageKind, NodeId, Priority,
    RouterConfig, BROADCAST, MAX_HOPS,
};
use sims_mesh::bridge::descriptors::{
    encode_to_radio_packet, encode_want_config, from_radio_kind, FromRadioKind,
};
use sims_mesh::codec::{decode_frame, encode_frame, extract_length_delimited, extract_varint};
use sims_mesh::test_utils::{
    frame_bytes, identity, test_router, test_router_with, AirRadio, MockGattHost, VirtualAir,
};
use sims_mesh::{BleBridge, BridgeCallbacks, BridgeState, Characteristic, RouteEntry, Router};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Infrastructure
// ============================================================================

/// Routers on a shared medium, linked in a line
struct Mesh {
    air: VirtualAir,
    nodes: Vec<Router<AirRadio>>,
}

impl Mesh {
    fn line(ids: &[NodeId]) -> Self {
        let air = VirtualAir::new();
        let clock = Arc::new(ManualClock::new(0));
        let nodes: Vec<_> = ids
            .iter()
            .map(|&id| {
                let (radio, signal) = air.add_node();
                Router::new(radio, signal, identity(id), clock.clone(), RouterConfig::default())
            })
            .collect();
        for i in 1..ids.len() {
            air.link(i - 1, i);
        }
        Self { air, nodes }
    }

    /// Tick every node until nothing is left on the air
    fn settle(&mut self, now: u32) {
        for _ in 0..32 {
            let pending = self.nodes.iter().any(|n| n.rx_signal().is_raised());
            if !pending {
                return;
            }
            for node in &mut self.nodes {
                node.tick(now);
            }
        }
        panic!("mesh did not settle");
    }

    fn sent_by(&self, index: usize) -> Vec<MeshFrame> {
        self.air
            .transmissions_from(index)
            .iter()
            .map(|bytes| decode_frame(bytes).unwrap())
            .collect()
    }
}

fn connected_bridge(
    node_num: NodeId,
    config: BridgeConfig,
    inbox: sims_mesh::Inbox,
) -> (BleBridge<MockGattHost>, BridgeCallbacks) {
    let mut bridge = BleBridge::new(MockGattHost::new(), config, node_num, inbox);
    bridge.start().unwrap();
    let callbacks = bridge.callbacks();
    (bridge, callbacks)
}

fn read(cb: &BridgeCallbacks) -> Bytes {
    cb.on_read(Characteristic::FromRadio)
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_broadcast_and_relay() {
    let mut mesh = Mesh::line(&[0x0000_0001, 0x0000_0002, 0x0000_0003]);

    mesh.nodes[0].send_heartbeat(0).unwrap();
    mesh.settle(0);

    // B delivered once and relayed with hop_count 1
    assert_eq!(mesh.nodes[1].inbox().len(), 1);
    let hb = mesh.nodes[1].try_recv_user_frame().unwrap();
    assert_eq!((hb.source, hb.sequence, hb.hop_count, hb.ttl), (1, 1, 0, 60));

    let relays = mesh.sent_by(1);
    assert_eq!(relays.len(), 1);
    assert_eq!(relays[0].hop_count, 1);
    assert_eq!(relays[0].sight_key(), (1, 1));

    // C heard only the relay
    assert_eq!(mesh.nodes[2].stats().messages_received, 1);
    assert_eq!(mesh.nodes[2].inbox().len(), 1);
    let route = *mesh.nodes[2].routes().get(1).unwrap();
    assert_eq!(
        route,
        RouteEntry {
            destination: 1,
            next_hop: 1,
            hop_count: 1,
            last_seen_ms: 0
        }
    );
}

#[test]
fn test_duplicate_from_third_relay() {
    let mut mesh = Mesh::line(&[1, 2, 3]);
    mesh.nodes[0].send_heartbeat(0).unwrap();
    mesh.settle(0);

    let received = mesh.nodes[1].stats().messages_received;
    let inbox = mesh.nodes[1].inbox().len();
    let relayed = mesh.sent_by(1).len();

    // Same (source=1, sequence=1) again, further along
    mesh.air
        .deliver(1, &frame_bytes(1, BROADCAST, 1, MessageKind::Heartbeat, 3, 0));
    mesh.settle(100);

    let stats = mesh.nodes[1].stats();
    assert_eq!(stats.messages_received, received + 1);
    assert!(stats.duplicates_dropped >= 1);
    assert_eq!(mesh.nodes[1].inbox().len(), inbox);
    assert_eq!(mesh.sent_by(1).len(), relayed);
}

#[test]
fn test_directed_ack() {
    let mut mesh = Mesh::line(&[1, 2, 3]);

    let incident = MeshFrame::new(
        1,
        2,
        7,
        MessageKind::Incident,
        Priority::High,
        60,
        &b"fire at gate 3"[..],
        0,
    )
    .unwrap();
    mesh.air.deliver(1, &encode_frame(&incident).unwrap());
    mesh.settle(0);

    assert_eq!(mesh.nodes[1].try_recv_user_frame().unwrap(), incident);

    let acks: Vec<_> = mesh
        .sent_by(1)
        .into_iter()
        .filter(|f| f.kind == MessageKind::Ack)
        .collect();
    assert_eq!(acks.len(), 1);
    let ack = &acks[0];
    assert_eq!(ack.source, 2);
    assert_eq!(ack.destination, 1);
    assert_eq!(ack.priority, Priority::High);
    assert_eq!((ack.hop_count, ack.ttl), (0, 30));
    assert_eq!(&ack.payload[..], &[0x07, 0x00, 0x00, 0x00]);
    assert_eq!(mesh.nodes[1].stats().acks_sent, 1);

    // C neither acknowledges nor relays anything it heard
    assert!(mesh.sent_by(2).is_empty());

    // A receives the ack and does not acknowledge it
    let at_a = mesh.nodes[0].try_recv_user_frame().unwrap();
    assert_eq!(at_a.kind, MessageKind::Ack);
    assert!(mesh.sent_by(0).is_empty());
}

#[test]
fn test_ble_handshake() {
    let (mut router, _, _) = test_router(1);
    let (mut bridge, cb) = connected_bridge(1, BridgeConfig::default(), router.inbox());

    cb.on_connect();
    cb.on_subscribe(Characteristic::FromNum, true);
    cb.on_write(Characteristic::ToRadio, &encode_want_config(42).unwrap());
    bridge.poll(&mut router);

    let my_info = read(&cb);
    assert_eq!(from_radio_kind(&my_info), Some(FromRadioKind::MyInfo));
    let info = extract_length_delimited(&my_info, 3).unwrap();
    assert_eq!(extract_varint(info, 1), Some(1));

    let node_info = read(&cb);
    let node = extract_length_delimited(&node_info, 4).unwrap();
    assert_eq!(extract_varint(node, 1), Some(1));

    let channel = read(&cb);
    let ch = extract_length_delimited(&channel, 8).unwrap();
    assert_eq!(extract_varint(ch, 1), Some(0));
    assert_eq!(extract_varint(ch, 3), Some(1));

    let complete = read(&cb);
    assert_eq!(extract_varint(&complete, 7), Some(1));

    assert!(read(&cb).is_empty());
    assert_eq!(bridge.state(), BridgeState::SendPackets);

    cb.on_disconnect();
    bridge.poll(&mut router);
    assert_eq!(bridge.host().advertising_starts(), 2);

    cb.on_connect();
    cb.on_subscribe(Characteristic::FromNum, true);
    bridge.poll(&mut router);
    for _ in 0..5 {
        assert!(read(&cb).is_empty());
    }
    assert_eq!(bridge.state(), BridgeState::SendNothing);
}

#[test]
fn test_phone_to_mesh_forwarding() {
    let (mut router, radio, _) = test_router(1);
    let (mut bridge, cb) = connected_bridge(1, BridgeConfig::default(), router.inbox());

    cb.on_connect();
    cb.on_write(Characteristic::ToRadio, &encode_want_config(7).unwrap());
    bridge.poll(&mut router);
    for _ in 0..4 {
        read(&cb);
    }
    assert_eq!(bridge.state(), BridgeState::SendPackets);

    let blob: Vec<u8> = (0u8..42).map(|b| b.wrapping_mul(7)).collect();
    cb.on_write(Characteristic::ToRadio, &encode_to_radio_packet(&blob).unwrap());
    bridge.poll(&mut router);

    assert_eq!(radio.sent(), vec![blob]);
    assert_eq!(router.stats().messages_sent, 1);
    assert_eq!(router.stats().acks_sent, 0);
}

#[test]
fn test_inbox_overflow_and_from_num() {
    let (mut router, radio, _) = test_router(2);
    let (mut bridge, cb) = connected_bridge(2, BridgeConfig::default(), router.inbox());

    cb.on_connect();
    cb.on_subscribe(Characteristic::FromNum, true);
    cb.on_write(Characteristic::ToRadio, &encode_want_config(42).unwrap());
    bridge.poll(&mut router);
    for _ in 0..4 {
        read(&cb);
    }

    for seq in 1..=15 {
        radio.inject(frame_bytes(1, BROADCAST, seq, MessageKind::Incident, 0, 0));
        router.tick(0);
        bridge.poll(&mut router);
    }

    let stats = router.stats();
    assert_eq!(stats.inbox_size, 10);
    assert_eq!(stats.inbox_dropped, 5);
    // one empty -> non-empty transition so far
    assert_eq!(bridge.host().notifications(), vec![1u32.to_le_bytes().to_vec()]);

    let sequences: Vec<u32> = (0..10)
        .map(|_| {
            let record = read(&cb);
            let native = extract_length_delimited(&record, 2).unwrap();
            decode_frame(native).unwrap().sequence
        })
        .collect();
    assert_eq!(sequences, (6..=15).collect::<Vec<_>>());
    assert!(read(&cb).is_empty());

    radio.inject(frame_bytes(1, BROADCAST, 16, MessageKind::Incident, 0, 0));
    router.tick(0);
    bridge.poll(&mut router);
    assert_eq!(bridge.host().notifications().len(), 2);
    assert_eq!(
        cb.on_read(Characteristic::FromNum),
        Bytes::copy_from_slice(&2u32.to_le_bytes())
    );
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_each_pair_delivered_at_most_once() {
    let config = RouterConfig {
        inbox_capacity: 128,
        ..RouterConfig::default()
    };
    let (mut router, _, _) = test_router_with(9, config);

    for round in 0..3u8 {
        for source in 1..=4 {
            for seq in 1..=5 {
                let hop = (round + seq as u8) % 3;
                router.handle_frame_bytes(
                    &frame_bytes(source, BROADCAST, seq, MessageKind::Location, hop, 0),
                    -70,
                    5.0,
                    0,
                );
            }
        }
    }

    let mut seen = HashSet::new();
    while let Some(frame) = router.try_recv_user_frame() {
        assert!(seen.insert(frame.sight_key()), "delivered twice: {:?}", frame.sight_key());
    }
    assert_eq!(seen.len(), 20);
    assert_eq!(router.stats().duplicates_dropped, 40);
}

#[test]
fn test_no_relay_at_hop_limit() {
    let (mut router, radio, _) = test_router(2);
    for (seq, hop) in (MAX_HOPS..=60).enumerate() {
        router.handle_frame_bytes(
            &frame_bytes(1, BROADCAST, seq as u32 + 1, MessageKind::Incident, hop, 0),
            -80,
            1.0,
            0,
        );
    }
    assert!(radio.sent().is_empty());
    assert_eq!(router.stats().messages_relayed, 0);

    router.handle_frame_bytes(
        &frame_bytes(1, BROADCAST, 999, MessageKind::Incident, MAX_HOPS - 1, 0),
        -80,
        1.0,
        0,
    );
    let relay = decode_frame(&radio.sent()[0]).unwrap();
    assert_eq!(relay.hop_count, MAX_HOPS);
}

#[test]
fn test_originated_frames_carry_own_id_and_zero_hops() {
    let (mut router, radio, clock) = test_router(0x0000_00AA);
    router
        .send_user_frame(MessageKind::Incident, Priority::Critical, BROADCAST, &b"x"[..])
        .unwrap();
    clock.set(60_000);
    router.tick(60_000);
    router.handle_frame_bytes(
        &frame_bytes(5, 0xAA, 3, MessageKind::Incident, 2, 60_000),
        -50,
        8.0,
        60_000,
    );
    router
        .send_user_frame(MessageKind::Location, Priority::Normal, 5, Bytes::new())
        .unwrap();

    let frames: Vec<_> = radio
        .sent()
        .iter()
        .map(|b| decode_frame(b).unwrap())
        .collect();
    let own: Vec<_> = frames.iter().filter(|f| f.source == 0xAA).collect();
    assert_eq!(own.len(), 4);
    assert!(own.iter().all(|f| f.hop_count == 0));

    let kinds: Vec<_> = own.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::Incident,
            MessageKind::Heartbeat,
            MessageKind::Ack,
            MessageKind::Location
        ]
    );

    // sequences are distinct and never zero
    let seqs: HashSet<u32> = own.iter().map(|f| f.sequence).collect();
    assert_eq!(seqs.len(), 4);
    assert!(!seqs.contains(&0));
}

#[test]
fn test_frame_round_trip() {
    let kinds = [
        MessageKind::Heartbeat,
        MessageKind::Incident,
        MessageKind::Location,
        MessageKind::Ack,
        MessageKind::Nack,
        MessageKind::RouteRequest,
        MessageKind::RouteReply,
        MessageKind::DataChunk,
    ];
    for (i, kind) in kinds.into_iter().enumerate() {
        let mut frame = MeshFrame::new(
            i as u32,
            BROADCAST - i as u32,
            u32::MAX - i as u32,
            kind,
            Priority::ALL[i % 4],
            (i * 30) as u8,
            vec![i as u8; i * 25],
            (i as u32) << 28,
        )
        .unwrap();
        frame.hop_count = i as u8;
        assert_eq!(decode_frame(&encode_frame(&frame).unwrap()).unwrap(), frame);
    }
}

#[test]
fn test_same_bytes_twice_is_idempotent() {
    let (mut router, radio, _) = test_router(2);
    let bytes = frame_bytes(1, BROADCAST, 1, MessageKind::Incident, 0, 0);

    radio.inject(bytes.clone());
    radio.inject(bytes);
    router.tick(0);

    assert_eq!(router.inbox().len(), 1);
    assert_eq!(radio.sent().len(), 1);
    assert_eq!(router.stats().messages_relayed, 1);
    assert_eq!(router.stats().messages_received, 2);
}

#[test]
fn test_bridge_descriptor_order() {
    let mut config = BridgeConfig::default();
    config.channels.push(ChannelConfig {
        name: "ops".into(),
        psk: vec![0x01],
    });
    config.channels.push(ChannelConfig {
        name: "medics".into(),
        psk: vec![0x02; 16],
    });

    let (mut router, _, _) = test_router(1);
    let (mut bridge, cb) = connected_bridge(1, config, router.inbox());
    cb.on_connect();
    cb.on_write(Characteristic::ToRadio, &encode_want_config(5).unwrap());
    bridge.poll(&mut router);

    let mut kinds = Vec::new();
    let mut channel_indices = Vec::new();
    loop {
        let record = read(&cb);
        if record.is_empty() {
            break;
        }
        let kind = from_radio_kind(&record).unwrap();
        if kind == FromRadioKind::Channel {
            let ch = extract_length_delimited(&record, 8).unwrap();
            channel_indices.push(extract_varint(ch, 1).unwrap());
        }
        kinds.push(kind);
        assert!(kinds.len() <= 10, "handshake never ended");
    }

    assert_eq!(
        kinds,
        vec![
            FromRadioKind::MyInfo,
            FromRadioKind::NodeInfo,
            FromRadioKind::Channel,
            FromRadioKind::Channel,
            FromRadioKind::Channel,
            FromRadioKind::ConfigComplete,
        ]
    );
    assert_eq!(channel_indices, vec![0, 1, 2]);
}

#[test]
fn test_tables_empty_after_horizon() {
    let config = RouterConfig {
        heartbeat_interval: Duration::from_secs(3600),
        ..RouterConfig::default()
    };
    let (mut router, radio, _) = test_router_with(2, config);

    radio.inject(frame_bytes(1, BROADCAST, 1, MessageKind::Incident, 0, 0));
    radio.inject(frame_bytes(3, 2, 1, MessageKind::Incident, 0, 0));
    router.tick(0);
    assert_eq!(router.routes().len(), 2);
    assert!(!router.sightings().is_empty());

    let mut now = 0;
    while now < 5 * 60 * 1000 {
        now += 60_000;
        router.tick(now);
    }
    assert!(router.routes().is_empty());
    assert!(router.sightings().is_empty());
    assert_eq!(router.stats().routing_table_size, 0);
}
