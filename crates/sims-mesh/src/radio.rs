//! Radio abstraction
//!
//! The router owns exactly one [`RadioLink`]. The platform's receive interrupt
//! does nothing but raise an [`RxSignal`]; the router observes it on its next
//! tick and drains the radio from the main context.

use bytes::Bytes;
use sims_core::RadioError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A packet as delivered by the radio
#[derive(Debug, Clone, PartialEq)]
pub struct RxPacket {
    /// Raw packet bytes
    pub data: Bytes,
    /// Received signal strength (dBm)
    pub rssi: i16,
    /// Signal-to-noise ratio (dB)
    pub snr: f32,
}

/// Half-duplex packet radio
///
/// `send` may block for the packet's on-air time. `recv` never blocks: it
/// returns `Ok(None)` when nothing is waiting.
pub trait RadioLink: Send {
    /// Transmit one packet (at most 255 bytes)
    fn send(&mut self, packet: &[u8]) -> Result<(), RadioError>;

    /// Take the next received packet, if any
    fn recv(&mut self) -> Result<Option<RxPacket>, RadioError>;
}

impl<R: RadioLink + ?Sized> RadioLink for Box<R> {
    fn send(&mut self, packet: &[u8]) -> Result<(), RadioError> {
        (**self).send(packet)
    }

    fn recv(&mut self) -> Result<Option<RxPacket>, RadioError> {
        (**self).recv()
    }
}

/// Interrupt-safe "frame ready" flag
///
/// Raised from the receive interrupt, swapped clear by the main context.
#[derive(Debug, Clone, Default)]
pub struct RxSignal(Arc<AtomicBool>);

impl RxSignal {
    /// Create a lowered flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag (interrupt context)
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Clear the flag, returning whether it was raised
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Peek without clearing
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
