//! Phone-app records
//!
//! `FromRadio` records the device hands out during the configuration
//! handshake and in steady state, plus decoding of the `ToRadio` records the
//! phone writes. Field numbers:
//!
//! | Record | Field | Number |
//! |--------|-------|--------|
//! | ToRadio | packet | 1 |
//! | ToRadio | want_config_id | 8 |
//! | FromRadio | packet | 2 |
//! | FromRadio | my_info | 3 |
//! | FromRadio | node_info | 4 |
//! | FromRadio | config_complete_id | 7 |
//! | FromRadio | channel | 8 |

use bytes::Bytes;
use sims_core::{node_id_string, BridgeConfig, ChannelConfig, MeshError, MeshFrame, NodeId, Result};
use tracing::debug;

use crate::bridge::gatt::device_name;
use crate::codec::wire::{FieldIter, FieldValue, TagWriter};
use crate::codec::encode_frame;

mod to_radio {
    pub const PACKET: u32 = 1;
    pub const WANT_CONFIG_ID: u32 = 8;
}

mod from_radio {
    pub const PACKET: u32 = 2;
    pub const MY_INFO: u32 = 3;
    pub const NODE_INFO: u32 = 4;
    pub const CONFIG_COMPLETE_ID: u32 = 7;
    pub const CHANNEL: u32 = 8;
}

/// Channel role as reported to the phone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// First channel
    Primary = 1,
    /// Any other channel
    Secondary = 2,
}

/// Decoded phone write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToRadio {
    /// Raw mesh packet to transmit verbatim
    Packet(Bytes),
    /// Start or restart the configuration handshake
    WantConfig(u32),
    /// Only fields the bridge does not handle
    Unknown(Vec<u32>),
}

/// Decode a `ToRadio` write
///
/// The first recognised field decides the meaning.
pub fn decode_to_radio(data: &[u8]) -> Result<ToRadio> {
    if data.is_empty() {
        return Err(MeshError::MalformedFrame("empty ToRadio write".into()));
    }

    let mut fields = FieldIter::new(data);
    let mut unknown = Vec::new();
    for (number, value) in fields.by_ref() {
        match (number, value) {
            (to_radio::PACKET, FieldValue::Bytes(packet)) => {
                return Ok(ToRadio::Packet(Bytes::copy_from_slice(packet)));
            }
            (to_radio::WANT_CONFIG_ID, FieldValue::Varint(nonce)) => {
                return Ok(ToRadio::WantConfig(nonce as u32));
            }
            (other, _) => unknown.push(other),
        }
    }

    if fields.is_aborted() {
        return Err(MeshError::MalformedFrame(format!(
            "undecodable ToRadio write ({} bytes)",
            data.len()
        )));
    }
    Ok(ToRadio::Unknown(unknown))
}

/// Everything the handshake describes about this device
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Node number
    pub node_num: NodeId,
    /// Long name
    pub long_name: String,
    /// Four-character short name
    pub short_name: String,
    /// Hardware model code
    pub hw_model: u32,
    /// Device role code
    pub role: u32,
    /// Lowest supported phone application version
    pub min_app_version: u32,
    /// Firmware edition code
    pub firmware_edition: u32,
    /// Channels, primary first
    pub channels: Vec<ChannelConfig>,
}

impl DeviceDescriptor {
    /// Describe node `node_num` configured by `config`
    pub fn from_config(node_num: NodeId, config: &BridgeConfig) -> Self {
        Self {
            node_num,
            long_name: config
                .long_name
                .clone()
                .unwrap_or_else(|| device_name(&config.name_prefix, node_num)),
            short_name: format!("{:04x}", node_num & 0xFFFF),
            hw_model: config.hw_model,
            role: config.role,
            min_app_version: config.min_app_version,
            firmware_edition: config.firmware_edition,
            channels: config.channels.clone(),
        }
    }
}

fn wrap(field: u32, nested: TagWriter) -> Result<Bytes> {
    let mut record = TagWriter::new();
    record.write_message(field, nested)?;
    Ok(record.finish())
}

/// `FromRadio{my_info}`
pub fn encode_my_info(device: &DeviceDescriptor) -> Result<Bytes> {
    let mut info = TagWriter::new();
    info.write_varint(1, device.node_num as u64)?;
    info.write_varint(11, device.min_app_version as u64)?;
    info.write_varint(14, device.firmware_edition as u64)?;
    wrap(from_radio::MY_INFO, info)
}

/// `FromRadio{node_info}` for this device
pub fn encode_node_info(device: &DeviceDescriptor) -> Result<Bytes> {
    let mut user = TagWriter::new();
    user.write_str(1, &node_id_string(device.node_num))?;
    user.write_str(2, &device.long_name)?;
    user.write_str(3, &device.short_name)?;
    user.write_varint(5, device.hw_model as u64)?;
    user.write_varint(7, device.role as u64)?;

    let mut node = TagWriter::new();
    node.write_varint(1, device.node_num as u64)?;
    node.write_message(2, user)?;
    wrap(from_radio::NODE_INFO, node)
}

/// `FromRadio{channel}`
pub fn encode_channel(index: usize, channel: &ChannelConfig) -> Result<Bytes> {
    let role = if index == 0 {
        ChannelRole::Primary
    } else {
        ChannelRole::Secondary
    };

    let mut settings = TagWriter::new();
    settings.write_length_delimited(2, &channel.psk)?;
    settings.write_str(3, &channel.name)?;

    let mut record = TagWriter::new();
    record.write_varint(1, index as u64)?;
    record.write_message(2, settings)?;
    record.write_varint(3, role as u64)?;
    wrap(from_radio::CHANNEL, record)
}

/// `FromRadio{config_complete_id}`
pub fn encode_config_complete(id: u32) -> Result<Bytes> {
    let mut record = TagWriter::new();
    record.write_varint(from_radio::CONFIG_COMPLETE_ID, id as u64)?;
    Ok(record.finish())
}

/// `FromRadio{packet}` carrying a native frame
pub fn encode_packet(frame: &MeshFrame) -> Result<Bytes> {
    let native = encode_frame(frame)?;
    let mut record = TagWriter::new();
    record.write_length_delimited(from_radio::PACKET, &native)?;
    Ok(record.finish())
}

/// The full descriptor stream for one handshake, in emission order
pub fn handshake_records(device: &DeviceDescriptor, config_complete_id: u32) -> Result<Vec<Bytes>> {
    let mut records = Vec::with_capacity(device.channels.len() + 3);
    records.push(encode_my_info(device)?);
    records.push(encode_node_info(device)?);
    for (index, channel) in device.channels.iter().enumerate() {
        records.push(encode_channel(index, channel)?);
    }
    records.push(encode_config_complete(config_complete_id)?);
    debug!(
        count = records.len(),
        bytes = records.iter().map(Bytes::len).sum::<usize>(),
        "Handshake records encoded"
    );
    Ok(records)
}

/// Which `FromRadio` variant a record carries, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromRadioKind {
    /// Mesh packet
    Packet,
    /// MyNodeInfo
    MyInfo,
    /// NodeInfo
    NodeInfo,
    /// ConfigComplete
    ConfigComplete,
    /// Channel
    Channel,
}

/// Classify a `FromRadio` record by its first field
pub fn from_radio_kind(record: &[u8]) -> Option<FromRadioKind> {
    let (number, _) = FieldIter::new(record).next()?;
    match number {
        from_radio::PACKET => Some(FromRadioKind::Packet),
        from_radio::MY_INFO => Some(FromRadioKind::MyInfo),
        from_radio::NODE_INFO => Some(FromRadioKind::NodeInfo),
        from_radio::CONFIG_COMPLETE_ID => Some(FromRadioKind::ConfigComplete),
        from_radio::CHANNEL => Some(FromRadioKind::Channel),
        _ => None,
    }
}

/// Build a `ToRadio{want_config_id}` write (phone side)
pub fn encode_want_config(nonce: u32) -> Result<Bytes> {
    let mut record = TagWriter::new();
    record.write_varint(to_radio::WANT_CONFIG_ID, nonce as u64)?;
    Ok(record.finish())
}

/// Build a `ToRadio{packet}` write (phone side)
pub fn encode_to_radio_packet(packet: &[u8]) -> Result<Bytes> {
    let mut record = TagWriter::new();
    record.write_length_delimited(to_radio::PACKET, packet)?;
    Ok(record.finish())
}
