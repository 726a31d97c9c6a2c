//! USB transport abstraction
//!
//! Drivers never talk to a USB stack directly; they operate on the
//! [`UsbTransport`] trait, a fixed set of host-side primitives (open, select
//! configuration, claim interface, control-out, bulk-out) plus a descriptor
//! exposing vendor/product ids and endpoint metadata.
//!
//! Two implementations ship with the crate: [`NusbTransport`] wraps a real
//! device via `nusb` (feature `nusb`, enabled by default), and
//! [`MockTransport`] is an in-memory scripted transport for tests and
//! simulation.

pub mod mock;
#[cfg(feature = "nusb")]
mod nusb_transport;

pub use mock::{FailureMode, MockCall, MockTransport};
#[cfg(feature = "nusb")]
pub use nusb_transport::{list_transports, NusbTransport};

use async_trait::async_trait;
use thiserror::Error;

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying USB stack error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation requires an open device
    #[error("device is not open")]
    NotOpen,

    /// Operation targets an interface that was never claimed
    #[error("interface {0} is not claimed")]
    InterfaceNotClaimed(u8),

    /// A submitted transfer failed outright
    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Completion status reported by the device for a finished transfer.
///
/// A non-[`Ok`](TransferStatus::Ok) status counts as a send failure just
/// like a hard [`TransportError`], but the two are logged distinguishably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    Stall,
    Babble,
}

/// Outcome of one bulk OUT transfer
#[derive(Debug, Clone, Copy)]
pub struct TransferOutResult {
    pub status: TransferStatus,
    pub bytes_written: usize,
}

/// Control transfer request type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Standard,
    Class,
    Vendor,
}

/// Control transfer recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
}

/// Setup fields of a control OUT transfer
#[derive(Debug, Clone, Copy)]
pub struct ControlRequest {
    pub control_type: ControlType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// Endpoint direction, host point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDirection {
    In,
    Out,
}

/// USB transfer kind of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of an interface
#[derive(Debug, Clone, Copy)]
pub struct EndpointDescriptor {
    /// Raw endpoint address (direction bit included)
    pub address: u8,
    pub direction: EndpointDirection,
    pub transfer_kind: TransferKind,
}

/// One interface of the device's active configuration
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

/// Identity and topology of an attached device.
///
/// Vendor and product ids are available before the device is opened;
/// interface/endpoint metadata may only be populated once it is.
#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl DeviceDescriptor {
    /// Address of the first bulk OUT endpoint on the given interface, if any.
    pub fn first_bulk_out(&self, interface: u8) -> Option<u8> {
        self.interfaces
            .iter()
            .find(|i| i.number == interface)?
            .endpoints
            .iter()
            .find(|e| {
                e.direction == EndpointDirection::Out && e.transfer_kind == TransferKind::Bulk
            })
            .map(|e| e.address)
    }
}

/// Host-side USB primitives the drivers are written against.
///
/// Implementations are handed to a driver's `connect` in a discovered but
/// not-yet-opened state; the driver performs all further setup through this
/// trait.
#[async_trait]
pub trait UsbTransport: Send + Sync + 'static {
    /// Device identity and (once open) interface/endpoint metadata.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Whether the device handle is currently open.
    fn is_open(&self) -> bool;

    /// The active configuration value, if one is selected.
    fn active_configuration(&self) -> Option<u8>;

    async fn open(&mut self) -> std::result::Result<(), TransportError>;

    async fn close(&mut self) -> std::result::Result<(), TransportError>;

    async fn select_configuration(
        &mut self,
        configuration: u8,
    ) -> std::result::Result<(), TransportError>;

    async fn claim_interface(&mut self, interface: u8)
        -> std::result::Result<(), TransportError>;

    /// Issue a control OUT transfer and return the completion status.
    async fn control_transfer_out(
        &self,
        request: ControlRequest,
        data: &[u8],
    ) -> std::result::Result<TransferStatus, TransportError>;

    /// Write bytes to a bulk OUT endpoint.
    async fn transfer_out(
        &self,
        endpoint: u8,
        data: &[u8],
    ) -> std::result::Result<TransferOutResult, TransportError>;
}
