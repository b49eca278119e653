//! SIMS Mesh - LoRa mesh router and BLE phone bridge
//!
//! This crate implements the per-node logic of a SIMS incident device:
//! flood routing over a sub-GHz radio and a BLE bridge that lets standard
//! open-mesh phone applications talk to the node.
//!
//! # Architecture
//!
//! ```text
//! [ RadioLink ] <-bytes-> [ codec::frame ] <-MeshFrame-> [ Router ]
//!                                                            |
//!                                                         [ Inbox ]
//!                                                            |
//! [ GattHost / GapScanner ] <-bytes-> [ BleBridge ] <--------+
//! ```
//!
//! - [`codec`] - Native 222-byte frames and tag-value phone records
//! - [`router`] - Duplicate suppression, relaying, acks, heartbeats
//! - [`sight`] / [`routing_table`] - Age-bounded router tables
//! - [`queue`] - Inbox shared with the bridge, priority outbox for the phone
//! - [`bridge`] - Configuration handshake and steady-state packet exchange
//! - [`radio`] - Radio abstraction and the receive-interrupt flag
//! - [`stats`] - Shared counters
//! - [`test_utils`] - Mock radio, virtual air, mock BLE host
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sims_core::{MessageKind, Priority, RouterConfig, ManualClock, BROADCAST};
//! use sims_mesh::{test_utils::{identity, MockRadio}, Router};
//!
//! let radio = MockRadio::new();
//! let clock = Arc::new(ManualClock::new(0));
//! let mut router = Router::new(
//!     radio.clone(),
//!     radio.signal(),
//!     identity(0x0000_0001),
//!     clock,
//!     RouterConfig::default(),
//! );
//!
//! let seq = router
//!     .send_user_frame(MessageKind::Incident, Priority::High, BROADCAST, &b"fire"[..])
//!     .unwrap();
//! assert_eq!(seq, 1);
//! assert_eq!(radio.sent().len(), 1);
//! ```

#![warn(missing_docs)]

pub mod bridge;
pub mod codec;
pub mod queue;
pub mod radio;
pub mod router;
pub mod routing_table;
pub mod sight;
pub mod stats;

// Testing utilities
pub mod test_utils;

pub use bridge::{
    Advertisement, BleBridge, BridgeCallbacks, BridgeState, BridgeStats, Characteristic,
    GapScanner, GattError, GattHost, HostEvent,
};
pub use codec::{decode_frame, encode_frame, NATIVE_FRAME_LEN};
pub use queue::{Inbox, Outbox};
pub use radio::{RadioLink, RxPacket, RxSignal};
pub use router::{Disposition, MeshSender, Router};
pub use routing_table::{RouteEntry, RoutingTable};
pub use sight::{SightMap, SightStats, Sighting};
pub use stats::{MeshStats, StatsHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_native_frame_fits_outbox_blob() {
        // packet record = key + 2-byte length + frame
        assert!(NATIVE_FRAME_LEN + 3 <= sims_core::config::MAX_BLOB_SIZE);
    }
}
