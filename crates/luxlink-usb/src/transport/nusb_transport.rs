//! `nusb`-backed transport
//!
//! Wraps one enumerated USB device. Vendor/product ids are known up front;
//! interface and endpoint metadata are read from the active configuration
//! when the device is opened. Control transfers are submitted through a
//! claimed interface, which is the shape the underlying stack requires on
//! every platform.

use std::collections::BTreeMap;

use async_trait::async_trait;
use nusb::transfer::{ControlOut, Direction, EndpointType, TransferError};

use super::{
    ControlRequest, ControlType, DeviceDescriptor, EndpointDescriptor, EndpointDirection,
    InterfaceDescriptor, Recipient, TransferKind, TransferOutResult, TransferStatus,
    TransportError, UsbTransport,
};

/// Enumerate all attached USB devices as transports.
pub fn list_transports() -> Result<Vec<NusbTransport>, TransportError> {
    let devices = nusb::list_devices().map_err(std::io::Error::from)?;
    Ok(devices.map(NusbTransport::new).collect())
}

/// [`UsbTransport`] implementation over a real device via `nusb`
pub struct NusbTransport {
    info: nusb::DeviceInfo,
    descriptor: DeviceDescriptor,
    device: Option<nusb::Device>,
    interfaces: BTreeMap<u8, nusb::Interface>,
    configuration: Option<u8>,
}

impl NusbTransport {
    pub fn new(info: nusb::DeviceInfo) -> Self {
        let descriptor = DeviceDescriptor {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            interfaces: Vec::new(),
        };
        Self {
            info,
            descriptor,
            device: None,
            interfaces: BTreeMap::new(),
            configuration: None,
        }
    }

    fn device(&self) -> Result<&nusb::Device, TransportError> {
        self.device.as_ref().ok_or(TransportError::NotOpen)
    }

    /// Interface used to submit a control transfer. Interface-scoped
    /// requests address the interface in the low byte of `index`; everything
    /// else goes through the first claimed interface.
    fn control_interface(
        &self,
        request: &ControlRequest,
    ) -> Result<&nusb::Interface, TransportError> {
        if request.recipient == Recipient::Interface {
            let number = (request.index & 0xff) as u8;
            if let Some(interface) = self.interfaces.get(&number) {
                return Ok(interface);
            }
        }
        self.interfaces
            .values()
            .next()
            .ok_or(TransportError::InterfaceNotClaimed(0))
    }

    /// Interface owning the given OUT endpoint, falling back to the first
    /// claimed interface.
    fn endpoint_interface(&self, endpoint: u8) -> Result<&nusb::Interface, TransportError> {
        let owner = self
            .descriptor
            .interfaces
            .iter()
            .find(|i| i.endpoints.iter().any(|e| e.address == endpoint))
            .and_then(|i| self.interfaces.get(&i.number));
        match owner {
            Some(interface) => Ok(interface),
            None => self
                .interfaces
                .values()
                .next()
                .ok_or(TransportError::InterfaceNotClaimed(0)),
        }
    }

    fn read_topology(device: &nusb::Device) -> Option<(u8, Vec<InterfaceDescriptor>)> {
        let configuration = device.active_configuration().ok()?;
        let interfaces = configuration
            .interfaces()
            .map(|group| {
                let endpoints = group
                    .alt_settings()
                    .next()
                    .map(|alt| {
                        alt.endpoints()
                            .map(|ep| EndpointDescriptor {
                                address: ep.address(),
                                direction: match ep.direction() {
                                    Direction::In => EndpointDirection::In,
                                    Direction::Out => EndpointDirection::Out,
                                },
                                transfer_kind: match ep.transfer_type() {
                                    EndpointType::Control => TransferKind::Control,
                                    EndpointType::Isochronous => TransferKind::Isochronous,
                                    EndpointType::Bulk => TransferKind::Bulk,
                                    EndpointType::Interrupt => TransferKind::Interrupt,
                                },
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                InterfaceDescriptor {
                    number: group.interface_number(),
                    endpoints,
                }
            })
            .collect();
        Some((configuration.configuration_value(), interfaces))
    }

    fn refresh_topology(&mut self) {
        if let Some(device) = &self.device {
            if let Some((value, interfaces)) = Self::read_topology(device) {
                self.configuration = Some(value);
                self.descriptor.interfaces = interfaces;
            }
        }
    }
}

fn control_type(value: ControlType) -> nusb::transfer::ControlType {
    match value {
        ControlType::Standard => nusb::transfer::ControlType::Standard,
        ControlType::Class => nusb::transfer::ControlType::Class,
        ControlType::Vendor => nusb::transfer::ControlType::Vendor,
    }
}

fn recipient(value: Recipient) -> nusb::transfer::Recipient {
    match value {
        Recipient::Device => nusb::transfer::Recipient::Device,
        Recipient::Interface => nusb::transfer::Recipient::Interface,
        Recipient::Endpoint => nusb::transfer::Recipient::Endpoint,
    }
}

fn completion_status(status: Result<(), TransferError>) -> Result<TransferStatus, TransportError> {
    match status {
        Ok(()) => Ok(TransferStatus::Ok),
        Err(TransferError::Stall) => Ok(TransferStatus::Stall),
        Err(error) => Err(TransportError::Transfer(error.to_string())),
    }
}

#[async_trait]
impl UsbTransport for NusbTransport {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn active_configuration(&self) -> Option<u8> {
        self.configuration
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        if self.device.is_some() {
            return Ok(());
        }
        let device = self.info.open().map_err(std::io::Error::from)?;
        self.device = Some(device);
        self.refresh_topology();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Handles close on drop.
        self.interfaces.clear();
        self.device = None;
        self.configuration = None;
        Ok(())
    }

    async fn select_configuration(&mut self, configuration: u8) -> Result<(), TransportError> {
        self.device()?
            .set_configuration(configuration)
            .map_err(std::io::Error::from)?;
        self.configuration = Some(configuration);
        self.refresh_topology();
        Ok(())
    }

    async fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        if self.interfaces.contains_key(&interface) {
            return Ok(());
        }
        let handle = self
            .device()?
            .claim_interface(interface)
            .map_err(std::io::Error::from)?;
        self.interfaces.insert(interface, handle);
        Ok(())
    }

    async fn control_transfer_out(
        &self,
        request: ControlRequest,
        data: &[u8],
    ) -> Result<TransferStatus, TransportError> {
        let interface = self.control_interface(&request)?;
        let completion = interface
            .control_out(ControlOut {
                control_type: control_type(request.control_type),
                recipient: recipient(request.recipient),
                request: request.request,
                value: request.value,
                index: request.index,
                data,
            })
            .await;
        completion_status(completion.status)
    }

    async fn transfer_out(
        &self,
        endpoint: u8,
        data: &[u8],
    ) -> Result<TransferOutResult, TransportError> {
        let interface = self.endpoint_interface(endpoint)?;
        let completion = interface.bulk_out(endpoint, data.to_vec()).await;
        let bytes_written = completion.data.actual_length();
        let status = completion_status(completion.status)?;
        Ok(TransferOutResult {
            status,
            bytes_written,
        })
    }
}
