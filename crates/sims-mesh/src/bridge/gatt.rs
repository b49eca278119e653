//! GATT surface and advertising
//!
//! The service and characteristic identifiers are those phone applications
//! look for when scanning for an open mesh device. They are kept as canonical
//! 128-bit values and emitted least significant octet first, the order BLE
//! carries them on air.

use std::time::Duration;
use thiserror::Error;

/// Primary service
pub const SERVICE_UUID: u128 = 0x6ba1b218_15a8_461f_9fa8_5dcae273eafd;

/// Phone to device writes
pub const TO_RADIO_UUID: u128 = 0xf75c76d2_129e_4dad_a1dd_7866124401e7;

/// Device to phone reads
pub const FROM_RADIO_UUID: u128 = 0x2c55e69e_4993_11ed_b878_0242ac120002;

/// New-data counter (read + notify)
pub const FROM_NUM_UUID: u128 = 0xed9da18c_a800_4f66_a670_aa7547e34453;

/// Default ATT MTU before negotiation
pub const DEFAULT_MTU: u16 = 23;

/// Advertising interval unit
const ADV_UNIT_US: u128 = 625;

/// Largest legacy advertising payload
const MAX_ADV_LEN: usize = 31;

// AD types
const AD_FLAGS: u8 = 0x01;
const AD_COMPLETE_UUID128: u8 = 0x07;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;

/// LE general discoverable, BR/EDR not supported
pub const ADV_FLAGS: u8 = 0x06;

/// A UUID in on-air octet order
pub fn uuid_on_air(uuid: u128) -> [u8; 16] {
    uuid.to_le_bytes()
}

/// Characteristic property bits
pub mod props {
    /// Readable
    pub const READ: u8 = 0x02;
    /// Write without response
    pub const WRITE_NO_RSP: u8 = 0x04;
    /// Write with response
    pub const WRITE: u8 = 0x08;
    /// Notify
    pub const NOTIFY: u8 = 0x10;
}

/// The three characteristics of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Phone writes ToRadio records here
    ToRadio,
    /// Phone polls FromRadio records here
    FromRadio,
    /// Counter the device notifies when new packets wait
    FromNum,
}

impl Characteristic {
    /// All characteristics in registration order
    pub const ALL: [Characteristic; 3] = [
        Characteristic::ToRadio,
        Characteristic::FromRadio,
        Characteristic::FromNum,
    ];

    /// 128-bit identifier
    pub fn uuid(&self) -> u128 {
        match self {
            Characteristic::ToRadio => TO_RADIO_UUID,
            Characteristic::FromRadio => FROM_RADIO_UUID,
            Characteristic::FromNum => FROM_NUM_UUID,
        }
    }

    /// Property bits to register
    pub fn properties(&self) -> u8 {
        match self {
            Characteristic::ToRadio => props::WRITE | props::WRITE_NO_RSP,
            Characteristic::FromRadio => props::READ,
            Characteristic::FromNum => props::READ | props::NOTIFY,
        }
    }

    /// Look a characteristic up by identifier
    pub fn from_uuid(uuid: u128) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == uuid)
    }
}

/// Errors reported by the BLE host
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GattError {
    /// No central connected
    #[error("No connection")]
    NotConnected,

    /// The advertised payload does not fit a legacy advertisement
    #[error("Advertising payload too large: {0} bytes")]
    AdvertisementTooLarge(usize),

    /// The host stack rejected the operation
    #[error("Host error: {0}")]
    Host(String),
}

/// Server side of the GATT connection
pub trait GattHost: Send {
    /// Send a notification on `characteristic`
    fn notify(&mut self, characteristic: Characteristic, value: &[u8]) -> Result<(), GattError>;
}

/// Advertising control
pub trait GapScanner: Send {
    /// Start (or restart) advertising
    fn start_advertising(&mut self, advertisement: &Advertisement) -> Result<(), GattError>;

    /// Stop advertising
    fn stop_advertising(&mut self) -> Result<(), GattError>;
}

/// Prepared advertising and scan-response payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Device name carried in the scan response
    pub name: String,
    /// Primary advertising payload
    pub adv_data: Vec<u8>,
    /// Scan-response payload
    pub scan_response: Vec<u8>,
    /// Minimum interval in 0.625 ms units
    pub interval_min: u16,
    /// Maximum interval in 0.625 ms units
    pub interval_max: u16,
}

impl Advertisement {
    /// Build the payloads for `name` advertised every `interval_min..=interval_max`
    ///
    /// Names longer than the scan response can hold are sent shortened.
    pub fn new(name: &str, interval_min: Duration, interval_max: Duration) -> Self {
        let mut adv_data = Vec::with_capacity(MAX_ADV_LEN);
        adv_data.extend_from_slice(&[2, AD_FLAGS, ADV_FLAGS]);
        adv_data.extend_from_slice(&[17, AD_COMPLETE_UUID128]);
        adv_data.extend_from_slice(&uuid_on_air(SERVICE_UUID));

        let room = MAX_ADV_LEN - 2;
        let (ad_type, name_bytes) = if name.len() > room {
            (AD_SHORT_NAME, truncate_utf8(name, room))
        } else {
            (AD_COMPLETE_NAME, name)
        };
        let mut scan_response = Vec::with_capacity(MAX_ADV_LEN);
        scan_response.push(name_bytes.len() as u8 + 1);
        scan_response.push(ad_type);
        scan_response.extend_from_slice(name_bytes.as_bytes());

        Self {
            name: name.to_string(),
            adv_data,
            scan_response,
            interval_min: to_adv_units(interval_min),
            interval_max: to_adv_units(interval_max),
        }
    }

    /// Check both payloads fit a legacy advertisement
    pub fn validate(&self) -> Result<(), GattError> {
        let longest = self.adv_data.len().max(self.scan_response.len());
        if longest > MAX_ADV_LEN {
            return Err(GattError::AdvertisementTooLarge(longest));
        }
        Ok(())
    }
}

fn to_adv_units(interval: Duration) -> u16 {
    (interval.as_micros() / ADV_UNIT_US).min(u16::MAX as u128) as u16
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Advertised name: prefix plus the low 16 bits of the id in upper-case hex
pub fn device_name(prefix: &str, node_num: u32) -> String {
    format!("{}-{:04X}", prefix, node_num & 0xFFFF)
}
