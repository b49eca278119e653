//! Configuration types for SIMS mesh nodes
//!
//! This module provides configuration structures for the router timers,
//! the LoRa radio profile, the phone bridge descriptors and the identity
//! store. Every field has a default so a partial JSON document is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MeshError, Result};
use crate::identity::{NVS_KEY_DEVICE_ID, NVS_NAMESPACE};

/// Default heartbeat interval
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Default cleanup interval for the sight map and routing table
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Age horizon for sight records and routes
pub const SIGHT_HORIZON: Duration = Duration::from_secs(5 * 60);

/// TTL stamped on user frames
pub const DEFAULT_TTL: u8 = 60;

/// TTL stamped on acknowledgements
pub const ACK_TTL: u8 = 30;

/// TTL stamped on heartbeats, independent of the configured default
pub const HEARTBEAT_TTL: u8 = 60;

/// Inbox capacity
pub const DEFAULT_INBOX_CAPACITY: usize = 10;

/// Outbox capacity
pub const OUTBOX_CAPACITY: usize = 10;

/// Largest pre-encoded blob the outbox accepts
pub const MAX_BLOB_SIZE: usize = 256;

/// Channels the handshake can describe
///
/// MyInfo, NodeInfo and ConfigComplete take the rest of the outbox.
pub const MAX_CHANNELS: usize = OUTBOX_CAPACITY - 3;

/// Lowest phone application version the bridge announces
pub const MIN_APP_VERSION: u32 = 30200;

/// Main configuration for a mesh node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Router timers and limits
    #[serde(default)]
    pub router: RouterConfig,

    /// LoRa radio profile
    #[serde(default)]
    pub radio: RadioConfig,

    /// Phone bridge settings
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Identity storage location
    #[serde(default)]
    pub identity: IdentityConfig,
}

impl MeshConfig {
    /// Check the configuration for values the firmware cannot run with
    pub fn validate(&self) -> Result<()> {
        self.router.validate()?;
        self.bridge.validate()?;
        Ok(())
    }
}

/// Router timers and table limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Interval between heartbeats
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Interval between sight map / routing table sweeps
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,

    /// Age after which sight records and routes are evicted
    #[serde(with = "humantime_serde", default = "default_sight_horizon")]
    pub sight_horizon: Duration,

    /// TTL for locally originated user frames
    #[serde(default = "default_ttl")]
    pub default_ttl: u8,

    /// Inbox capacity
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// Maximum routing table entries
    #[serde(default = "default_max_routes")]
    pub max_routes: usize,

    /// Live sight records held; received frames past this are dropped unprocessed
    #[serde(default = "default_max_sightings")]
    pub max_sightings: usize,
}

fn default_heartbeat_interval() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

fn default_cleanup_interval() -> Duration {
    DEFAULT_CLEANUP_INTERVAL
}

fn default_sight_horizon() -> Duration {
    SIGHT_HORIZON
}

fn default_ttl() -> u8 {
    DEFAULT_TTL
}

fn default_inbox_capacity() -> usize {
    DEFAULT_INBOX_CAPACITY
}

fn default_max_routes() -> usize {
    64
}

fn default_max_sightings() -> usize {
    512
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            sight_horizon: SIGHT_HORIZON,
            default_ttl: DEFAULT_TTL,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            max_routes: default_max_routes(),
            max_sightings: default_max_sightings(),
        }
    }
}

impl RouterConfig {
    fn validate(&self) -> Result<()> {
        if self.inbox_capacity == 0 {
            return Err(MeshError::InvalidConfig("inbox_capacity must be > 0".into()));
        }
        if self.max_routes == 0 || self.max_sightings == 0 {
            return Err(MeshError::InvalidConfig(
                "routing table and sight map need room for at least one entry".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() || self.cleanup_interval.is_zero() {
            return Err(MeshError::InvalidConfig("timer intervals must be non-zero".into()));
        }
        Ok(())
    }
}

/// Regional frequency plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// 868 MHz (EU)
    Eu868,
    /// 915 MHz (US)
    Us915,
}

impl Region {
    /// Center frequency in Hz
    pub fn frequency_hz(&self) -> u32 {
        match self {
            Region::Eu868 => 868_000_000,
            Region::Us915 => 915_000_000,
        }
    }
}

/// LoRa sync word selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncWord {
    /// Shared with the open mesh ecosystem
    Compatible,
    /// Private network
    Private,
}

impl SyncWord {
    /// Register value
    pub fn value(&self) -> u8 {
        match self {
            SyncWord::Compatible => 0x2B,
            SyncWord::Private => 0x12,
        }
    }
}

/// LoRa modulation profile, fixed for on-air compatibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Frequency plan
    #[serde(default = "default_region")]
    pub region: Region,
    /// Bandwidth in kHz
    #[serde(default = "default_bandwidth")]
    pub bandwidth_khz: u32,
    /// Spreading factor
    #[serde(default = "default_spreading_factor")]
    pub spreading_factor: u8,
    /// Coding rate denominator (4/x)
    #[serde(default = "default_coding_rate")]
    pub coding_rate: u8,
    /// Preamble length in symbols
    #[serde(default = "default_preamble")]
    pub preamble_symbols: u16,
    /// Sync word
    #[serde(default = "default_sync_word")]
    pub sync_word: SyncWord,
    /// Hardware CRC
    #[serde(default = "default_crc")]
    pub crc: bool,
}

fn default_region() -> Region {
    Region::Eu868
}

fn default_bandwidth() -> u32 {
    125
}

fn default_spreading_factor() -> u8 {
    7
}

fn default_coding_rate() -> u8 {
    5
}

fn default_preamble() -> u16 {
    8
}

fn default_sync_word() -> SyncWord {
    SyncWord::Compatible
}

fn default_crc() -> bool {
    true
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            bandwidth_khz: default_bandwidth(),
            spreading_factor: default_spreading_factor(),
            coding_rate: default_coding_rate(),
            preamble_symbols: default_preamble(),
            sync_word: default_sync_word(),
            crc: default_crc(),
        }
    }
}

/// Channel announced to the phone during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel name (empty means the default channel name)
    #[serde(default)]
    pub name: String,
    /// Pre-shared key; `[0x01]` selects the well-known default key
    #[serde(default = "default_psk")]
    pub psk: Vec<u8>,
}

fn default_psk() -> Vec<u8> {
    vec![0x01]
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            psk: default_psk(),
        }
    }
}

/// Phone bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Advertised name prefix, completed with four hex digits of the id
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,
    /// Long name reported in NodeInfo (defaults to the advertised name)
    #[serde(default)]
    pub long_name: Option<String>,
    /// Hardware model reported in NodeInfo
    #[serde(default)]
    pub hw_model: u32,
    /// Device role reported in NodeInfo
    #[serde(default)]
    pub role: u32,
    /// Minimum phone application version
    #[serde(default = "default_min_app_version")]
    pub min_app_version: u32,
    /// Firmware edition reported in MyNodeInfo
    #[serde(default)]
    pub firmware_edition: u32,
    /// Channels, the first is primary
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelConfig>,
    /// Minimum advertising interval
    #[serde(with = "humantime_serde", default = "default_adv_min")]
    pub adv_interval_min: Duration,
    /// Maximum advertising interval
    #[serde(with = "humantime_serde", default = "default_adv_max")]
    pub adv_interval_max: Duration,
    /// Echo the phone's nonce in `config_complete_id` instead of `1`
    #[serde(default)]
    pub echo_config_nonce: bool,
}

fn default_name_prefix() -> String {
    "SIMS".to_string()
}

fn default_min_app_version() -> u32 {
    MIN_APP_VERSION
}

fn default_channels() -> Vec<ChannelConfig> {
    vec![ChannelConfig::default()]
}

fn default_adv_min() -> Duration {
    Duration::from_millis(20)
}

fn default_adv_max() -> Duration {
    Duration::from_millis(40)
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name_prefix: default_name_prefix(),
            long_name: None,
            hw_model: 0,
            role: 0,
            min_app_version: MIN_APP_VERSION,
            firmware_edition: 0,
            channels: default_channels(),
            adv_interval_min: default_adv_min(),
            adv_interval_max: default_adv_max(),
            echo_config_nonce: false,
        }
    }
}

impl BridgeConfig {
    fn validate(&self) -> Result<()> {
        if self.channels.is_empty() || self.channels.len() > MAX_CHANNELS {
            return Err(MeshError::InvalidConfig(format!(
                "between 1 and {} channels required, got {}",
                MAX_CHANNELS,
                self.channels.len()
            )));
        }
        if self.adv_interval_min > self.adv_interval_max {
            return Err(MeshError::InvalidConfig(
                "adv_interval_min exceeds adv_interval_max".into(),
            ));
        }
        if self.min_app_version < MIN_APP_VERSION {
            return Err(MeshError::InvalidConfig(format!(
                "min_app_version must be at least {}",
                MIN_APP_VERSION
            )));
        }
        Ok(())
    }
}

/// Where the device id is persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Storage namespace
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Storage key
    #[serde(default = "default_key")]
    pub key: String,
}

fn default_namespace() -> String {
    NVS_NAMESPACE.to_string()
}

fn default_key() -> String {
    NVS_KEY_DEVICE_ID.to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            key: default_key(),
        }
    }
}

/// Builder for MeshConfig
#[derive(Debug, Default)]
pub struct MeshConfigBuilder {
    config: MeshConfig,
}

impl MeshConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.router.heartbeat_interval = interval;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.router.cleanup_interval = interval;
        self
    }

    /// Set the inbox capacity
    pub fn inbox_capacity(mut self, capacity: usize) -> Self {
        self.config.router.inbox_capacity = capacity;
        self
    }

    /// Select the frequency plan
    pub fn region(mut self, region: Region) -> Self {
        self.config.radio.region = region;
        self
    }

    /// Select the sync word
    pub fn sync_word(mut self, sync_word: SyncWord) -> Self {
        self.config.radio.sync_word = sync_word;
        self
    }

    /// Add a secondary channel
    pub fn add_channel(mut self, name: impl Into<String>, psk: Vec<u8>) -> Self {
        self.config.bridge.channels.push(ChannelConfig {
            name: name.into(),
            psk,
        });
        self
    }

    /// Echo the handshake nonce in `config_complete_id`
    pub fn echo_config_nonce(mut self, enabled: bool) -> Self {
        self.config.bridge.echo_config_nonce = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> MeshConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
