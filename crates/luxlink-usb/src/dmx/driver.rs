//! The adapter driver contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::{DriverEvent, EventKind, HandlerId};
use super::universe::{SharedUniverse, Universe};
use crate::error::Result;
use crate::transport::{DeviceDescriptor, UsbTransport};

/// A (vendor id, optional product id) match rule.
///
/// A filter matches a device when the vendor ids are equal and either no
/// product constraint is present or the product ids are equal. Drivers
/// declare a set of filters; a device is supported if *any* filter matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorFilter {
    pub vendor_id: u16,
    pub product_id: Option<u16>,
}

impl VendorFilter {
    /// Filter matching one exact vendor/product pair.
    pub const fn product(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: Some(product_id),
        }
    }

    /// Vendor-wide filter matching every product of one vendor.
    pub const fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: None,
        }
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id.map_or(true, |p| p == product_id)
    }
}

/// Result of one send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame reached the adapter.
    Sent,
    /// A previous send was still in flight; this frame was dropped.
    Skipped,
    /// The transfer failed; the failure was counted and logged.
    Failed,
}

/// Capability set every USB DMX adapter driver implements.
///
/// A driver is constructed without a transport, becomes connected through
/// [`connect`](DmxDriver::connect), and pushes universes either one-shot
/// via [`send_universe`](DmxDriver::send_universe) or continuously via
/// [`start_output`](DmxDriver::start_output).
#[async_trait]
pub trait DmxDriver: Send + Sync {
    type Transport: UsbTransport;

    /// Human-readable adapter name.
    fn name(&self) -> &str;

    /// Vendor/product rules this driver can claim.
    fn filters(&self) -> &[VendorFilter];

    fn is_connected(&self) -> bool;

    /// Current consecutive transfer-error count.
    fn consecutive_errors(&self) -> u32;

    /// Override the continuous-output refresh rate.
    fn set_update_rate(&mut self, hz: u32);

    /// Whether this driver can claim the described device. Pure filter
    /// matching, no side effects.
    fn supports_device(&self, device: &DeviceDescriptor) -> bool {
        self.filters()
            .iter()
            .any(|f| f.matches(device.vendor_id, device.product_id))
    }

    /// Take ownership of a discovered, not-yet-opened transport and run the
    /// adapter-specific setup sequence. Emits `Connected` on success; on
    /// failure emits `Error`, propagates the cause, and leaves the driver
    /// disconnected.
    async fn connect(&mut self, transport: Self::Transport) -> Result<()>;

    /// Stop output, release the transport (best-effort; close failures are
    /// logged, not propagated), clear error bookkeeping, and emit
    /// `Disconnected`. Idempotent: a no-op when not connected.
    async fn disconnect(&mut self);

    /// Push one universe through a full protocol cycle. Transfer failures
    /// are caught, counted against the circuit breaker, and reported as
    /// [`SendOutcome::Failed`]; `Err` is reserved for caller errors such as
    /// sending while disconnected.
    async fn send_universe(&self, universe: &Universe) -> Result<SendOutcome>;

    /// Start the periodic output scheduler against a shared universe. The
    /// scheduler reads the live buffer each tick, so in-place mutations by
    /// the owner are what drive visual changes. Restarting cancels the
    /// previous scheduler first (never two timers) and resets the
    /// consecutive-error count.
    async fn start_output(&mut self, universe: SharedUniverse) -> Result<()>;

    /// Stop the periodic output scheduler. Any send already in flight
    /// completes or fails normally and still updates the error counter.
    async fn stop_output(&mut self);

    /// Subscribe to a driver event kind. Handlers run synchronously in
    /// registration order.
    fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&DriverEvent) + Send + Sync + 'static,
    ) -> HandlerId;

    /// Unsubscribe a handler. Returns whether it was registered.
    fn off(&self, kind: EventKind, id: HandlerId) -> bool;
}
