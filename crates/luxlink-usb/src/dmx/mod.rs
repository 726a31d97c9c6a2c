//! USB DMX output drivers
//!
//! This module pushes a 512-channel DMX universe to USB-attached adapters
//! at a fixed refresh rate. Two incompatible device classes are supported:
//!
//! ## Serial bridge (bit-banged BREAK)
//!
//! Generic USB-serial chips expose a raw asynchronous serial endpoint and
//! no DMX framing. The per-frame BREAK is synthesized by dropping the baud
//! divisor, writing one zero byte, and switching back to 250,000 baud for
//! the start code and channel data. See [`SerialBridgeDriver`].
//!
//! ## USB Pro framing
//!
//! USB-Pro-compatible adapters handle BREAK/MAB in firmware and accept
//! `0x7E`-framed, length-prefixed messages on a bulk endpoint. See
//! [`UsbProDriver`].
//!
//! Both drivers implement [`DmxDriver`]: connect/disconnect lifecycle with
//! typed events, one-shot sends, and a periodic output scheduler that reads
//! a [`SharedUniverse`] each tick. A consecutive-failure circuit breaker
//! stops output and emits a single `Error` event once a driver-specific
//! threshold is crossed; output stays stopped until `start_output` is
//! called again.
//!
//! ## Example
//!
//! ```rust,no_run
//! use luxlink_usb::dmx::{DmxDriver, SerialBridgeDriver, Universe};
//! use luxlink_usb::transport::MockTransport;
//!
//! # async fn demo(transport: MockTransport) -> luxlink_usb::Result<()> {
//! let mut driver = SerialBridgeDriver::new();
//! driver.connect(transport).await?;
//!
//! let universe = Universe::new().into_shared();
//! driver.start_output(universe.clone()).await?;
//!
//! // In-place mutations drive the next frame.
//! universe.write().set(1, 255);
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod events;
pub(crate) mod output;
pub mod serial_bridge;
pub mod universe;
pub mod usb_pro;

pub use driver::{DmxDriver, SendOutcome, VendorFilter};
pub use events::{DriverEvent, ErrorReason, EventBus, EventKind, HandlerId};
pub use serial_bridge::SerialBridgeDriver;
pub use universe::{SharedUniverse, Universe, DMX_START_CODE, UNIVERSE_SIZE};
pub use usb_pro::UsbProDriver;
