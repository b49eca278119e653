//! Device identity persistence
//!
//! Every node is known on the mesh by a 32-bit id. The id is generated once,
//! stored in non-volatile parameter storage and never migrated. On first boot
//! it is derived from the station MAC address.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;
use crate::error::Result;
use crate::frame::{NodeId, BROADCAST};

/// Storage namespace for mesh parameters
pub const NVS_NAMESPACE: &str = "sims-mesh";

/// Key holding the device id
pub const NVS_KEY_DEVICE_ID: &str = "deviceId";

/// Non-volatile key/value parameter storage
///
/// Implemented by the platform (flash NVS on hardware, a JSON file on the host).
pub trait ParamStore: Send {
    /// Read a stored 32-bit value
    fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>>;

    /// Write and commit a 32-bit value
    fn set_u32(&mut self, namespace: &str, key: &str, value: u32) -> Result<()>;
}

/// Volatile in-memory store
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: HashMap<(String, String), u32>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl ParamStore for MemoryStore {
    fn get_u32(&self, namespace: &str, key: &str) -> Result<Option<u32>> {
        Ok(self
            .values
            .get(&(namespace.to_string(), key.to_string()))
            .copied())
    }

    fn set_u32(&mut self, namespace: &str, key: &str, value: u32) -> Result<()> {
        self.values
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }
}

/// Derive an id from bytes 2..=5 of the MAC, most significant first
pub fn id_from_mac(mac: &[u8; 6]) -> NodeId {
    u32::from_be_bytes([mac[2], mac[3], mac[4], mac[5]])
}

/// The persisted identity of this device
pub struct DeviceIdentity {
    id: NodeId,
    store: Box<dyn ParamStore>,
    location: IdentityConfig,
}

impl DeviceIdentity {
    /// Load the stored id, or derive one from the MAC and persist it
    ///
    /// A failing store does not prevent boot: the MAC-derived id is used for
    /// this session and the failure is logged.
    pub fn load_or_create(store: Box<dyn ParamStore>, mac: [u8; 6]) -> Self {
        Self::load_or_create_at(store, mac, IdentityConfig::default())
    }

    /// Same as [`load_or_create`](Self::load_or_create) with an explicit storage location
    pub fn load_or_create_at(
        store: Box<dyn ParamStore>,
        mac: [u8; 6],
        location: IdentityConfig,
    ) -> Self {
        let mut store = store;

        match store.get_u32(&location.namespace, &location.key) {
            Ok(Some(id)) => {
                info!(device_id = format_args!("{:08x}", id), "Loaded device id");
                return Self {
                    id,
                    store,
                    location,
                };
            }
            Ok(None) => debug!("No stored device id"),
            Err(e) => warn!("Parameter store unavailable: {}", e),
        }

        let mut id = id_from_mac(&mac);
        if id == BROADCAST {
            // The broadcast address cannot name a device
            id = 0xFFFF_FFFE;
        }

        match store.set_u32(&location.namespace, &location.key, id) {
            Ok(()) => info!(device_id = format_args!("{:08x}", id), "Stored new device id"),
            Err(e) => warn!("Failed to persist device id, using ephemeral: {}", e),
        }

        Self {
            id,
            store,
            location,
        }
    }

    /// Current device id
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Replace and persist the device id
    pub fn set(&mut self, id: NodeId) -> Result<()> {
        self.store
            .set_u32(&self.location.namespace, &self.location.key, id)?;
        self.id = id;
        info!(device_id = format_args!("{:08x}", id), "Device id updated");
        Ok(())
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &format_args!("{:08x}", self.id))
            .finish()
    }
}
