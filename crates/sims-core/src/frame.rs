//! Mesh frame data model
//!
//! A [`MeshFrame`] is the single record every node exchanges over the air:
//! heartbeats, incident reports, acknowledgements and the rest all share the
//! same fixed shape. The byte layout lives in the codec; this module only
//! defines the values and their invariants.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, Result};

/// 32-bit device identifier
pub type NodeId = u32;

/// Destination meaning "any node in range"
pub const BROADCAST: NodeId = 0xFFFF_FFFF;

/// Maximum inline payload carried by a frame
pub const MAX_PAYLOAD: usize = 200;

/// Radio packet size limit
pub const MAX_PACKET_SIZE: usize = 255;

/// A frame with `hop_count >= MAX_HOPS` is never re-transmitted
pub const MAX_HOPS: u8 = 5;

/// Message kind carried in every frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Periodic liveness beacon
    Heartbeat = 1,
    /// Incident report
    Incident = 2,
    /// Position update
    Location = 3,
    /// Positive acknowledgement of a directed frame
    Ack = 4,
    /// Negative acknowledgement
    Nack = 5,
    /// Route discovery request
    RouteRequest = 6,
    /// Route discovery reply
    RouteReply = 7,
    /// Fragment of a larger transfer
    DataChunk = 8,
}

impl MessageKind {
    /// Acknowledgement kinds never trigger acks or relays
    pub fn is_ack(&self) -> bool {
        matches!(self, MessageKind::Ack | MessageKind::Nack)
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = MeshError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Incident),
            3 => Ok(Self::Location),
            4 => Ok(Self::Ack),
            5 => Ok(Self::Nack),
            6 => Ok(Self::RouteRequest),
            7 => Ok(Self::RouteReply),
            8 => Ok(Self::DataChunk),
            other => Err(MeshError::MalformedFrame(format!(
                "unknown message kind {other}"
            ))),
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

/// Frame priority, 0 is most urgent
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Life-safety traffic
    Critical = 0,
    /// Acknowledgements and urgent reports
    High = 1,
    /// Ordinary traffic
    Normal = 2,
    /// Heartbeats and background chatter
    Low = 3,
}

impl Priority {
    /// All classes, most urgent first
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Index of this class into per-priority tables
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl TryFrom<u8> for Priority {
    type Error = MeshError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Critical),
            1 => Ok(Self::High),
            2 => Ok(Self::Normal),
            3 => Ok(Self::Low),
            other => Err(MeshError::MalformedFrame(format!(
                "unknown priority {other}"
            ))),
        }
    }
}

/// A single mesh record as exchanged over the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshFrame {
    /// Originating node
    pub source: NodeId,
    /// Addressed node, or [`BROADCAST`]
    pub destination: NodeId,
    /// Per-source sequence number
    pub sequence: u32,
    /// What the payload means
    pub kind: MessageKind,
    /// Urgency class
    pub priority: Priority,
    /// Relays traversed so far
    pub hop_count: u8,
    /// Hop budget (also read as an age cap in seconds by the relay check)
    pub ttl: u8,
    /// Inline payload, at most [`MAX_PAYLOAD`] bytes
    pub payload: Bytes,
    /// Origin time in milliseconds of the source's monotonic clock
    pub origin_timestamp_ms: u32,
}

impl MeshFrame {
    /// Build a frame, rejecting oversized payloads
    pub fn new(
        source: NodeId,
        destination: NodeId,
        sequence: u32,
        kind: MessageKind,
        priority: Priority,
        ttl: u8,
        payload: impl Into<Bytes>,
        origin_timestamp_ms: u32,
    ) -> Result<Self> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(MeshError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Self {
            source,
            destination,
            sequence,
            kind,
            priority,
            hop_count: 0,
            ttl,
            payload,
            origin_timestamp_ms,
        })
    }

    /// Whether the frame is addressed to every node
    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }

    /// Declared payload length as carried on the wire
    pub fn payload_size(&self) -> u16 {
        self.payload.len() as u16
    }

    /// Duplicate-suppression key
    pub fn sight_key(&self) -> (NodeId, u32) {
        (self.source, self.sequence)
    }

    /// Copy of this frame one hop further along
    pub fn relayed(&self) -> Self {
        let mut copy = self.clone();
        copy.hop_count = copy.hop_count.saturating_add(1);
        copy
    }
}

/// Format a node id the way phone applications display it (`!0000002a`)
pub fn node_id_string(id: NodeId) -> String {
    format!("!{:08x}", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_conversion() {
        assert_eq!(MessageKind::try_from(4).unwrap(), MessageKind::Ack);
        assert_eq!(u8::from(MessageKind::DataChunk), 8);
        assert!(MessageKind::try_from(0).is_err());
        assert!(MessageKind::try_from(9).is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::Low);
        assert_eq!(Priority::try_from(3).unwrap(), Priority::Low);
        assert!(Priority::try_from(4).is_err());
        assert_eq!(Priority::High.index(), 1);
    }

    #[test]
    fn test_frame_rejects_large_payload() {
        let err = MeshFrame::new(
            1,
            BROADCAST,
            1,
            MessageKind::Incident,
            Priority::Normal,
            60,
            vec![0u8; MAX_PAYLOAD + 1],
            0,
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::PayloadTooLarge { size: 201, max: 200 }));
    }

    #[test]
    fn test_relayed_increments_hop() {
        let frame = MeshFrame::new(
            1,
            BROADCAST,
            1,
            MessageKind::Heartbeat,
            Priority::Low,
            60,
            Bytes::new(),
            0,
        )
        .unwrap();
        let relay = frame.relayed();
        assert_eq!(relay.hop_count, 1);
        assert_eq!(relay.sight_key(), frame.sight_key());
        assert!(relay.is_broadcast());
    }

    #[test]
    fn test_node_id_string() {
        assert_eq!(node_id_string(0x2a), "!0000002a");
        assert_eq!(node_id_string(0xDEADBEEF), "!deadbeef");
    }
}
