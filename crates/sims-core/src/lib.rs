//! SIMS Core - Foundational types for the SIMS incident mesh
//!
//! This crate provides the pieces every other SIMS crate builds on:
//!
//! - [`frame`] - The `MeshFrame` record, message kinds, priorities and node ids
//! - [`error`] - The error taxonomy shared by codec, router and bridge
//! - [`config`] - Router, radio, bridge and identity configuration
//! - [`clock`] - 32-bit monotonic millisecond clocks
//! - [`identity`] - Device id persistence with MAC-derived fallback
//! - [`audio`] - PCM capture buffer and software gain for the voice device
//!
//! # Example
//!
//! ```rust
//! use sims_core::{MeshFrame, MessageKind, Priority, BROADCAST};
//!
//! let frame = MeshFrame::new(
//!     0x0000_0001,
//!     BROADCAST,
//!     1,
//!     MessageKind::Incident,
//!     Priority::High,
//!     60,
//!     &b"smoke at gate 3"[..],
//!     0,
//! )
//! .unwrap();
//! assert!(frame.is_broadcast());
//! ```

#![warn(missing_docs)]

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod identity;

pub use clock::{elapsed_ms, Clock, ManualClock, SystemClock};
pub use config::{
    BridgeConfig, ChannelConfig, IdentityConfig, MeshConfig, MeshConfigBuilder, RadioConfig,
    Region, RouterConfig, SyncWord,
};
pub use error::{MeshError, RadioError, Result};
pub use frame::{
    node_id_string, MeshFrame, MessageKind, NodeId, Priority, BROADCAST, MAX_HOPS,
    MAX_PACKET_SIZE, MAX_PAYLOAD,
};
pub use identity::{DeviceIdentity, MemoryStore, ParamStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
