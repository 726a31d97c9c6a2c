//! LuxLink USB - DMX512 output over USB-attached adapters
//!
//! This crate drives lighting fixtures over DMX512 through USB serial
//! adapters. It provides:
//! - **Driver contract**: one trait for all adapter drivers, with typed
//!   lifecycle events and vendor/product match filters
//! - **Serial-bridge driver**: raw DMX over generic USB-serial chips, with
//!   the BREAK condition synthesized via baud-rate switching
//! - **USB Pro driver**: length-prefixed framed protocol for adapters with
//!   on-board DMX timing
//! - **Output scheduler**: per-driver periodic task pushing the current
//!   universe at the adapter's native refresh rate
//! - **Circuit breaker**: consecutive-failure counter that halts output and
//!   raises a single error event once a threshold is crossed
//!
//! The crate interprets no channel semantics: callers own a 512-byte
//! universe and mutate it in place; drivers read it at send time and put it
//! on the wire byte-exactly.
//!
//! ## Feature Flags
//!
//! - `nusb` (default): real USB access via the `nusb` stack. Without it the
//!   crate builds with only the transport trait and the mock, for hosts
//!   that bring their own transport.
//!
//! ## Modules
//!
//! - [`dmx`] - drivers, scheduler, events, universe buffer
//! - [`transport`] - the USB transport abstraction and its implementations
//! - [`error`] - error types

// Core modules
/// USB DMX drivers
pub mod dmx;
/// Error types
pub mod error;
/// USB transport abstraction
pub mod transport;

// Re-exports
pub use dmx::{
    DmxDriver, DriverEvent, ErrorReason, EventKind, HandlerId, SendOutcome, SerialBridgeDriver,
    SharedUniverse, Universe, UsbProDriver, VendorFilter, DMX_START_CODE, UNIVERSE_SIZE,
};
pub use error::{DriverError, Result};
pub use transport::{DeviceDescriptor, MockTransport, TransferStatus, UsbTransport};

#[cfg(feature = "nusb")]
pub use transport::{list_transports, NusbTransport};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universe_roundtrip_through_public_api() {
        let mut universe = Universe::new();
        universe.set(1, 128);
        assert_eq!(universe.get(1), 128);
    }

    #[test]
    fn test_filter_construction() {
        let exact = VendorFilter::product(0x0403, 0x6001);
        let wide = VendorFilter::vendor(0x0403);
        assert_eq!(exact.product_id, Some(0x6001));
        assert_eq!(wide.product_id, None);
    }
}
