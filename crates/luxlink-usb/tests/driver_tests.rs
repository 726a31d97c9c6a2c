//! Driver lifecycle and wire-format tests against the mock transport

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use luxlink_usb::transport::{
    DeviceDescriptor, EndpointDescriptor, EndpointDirection, InterfaceDescriptor, MockCall,
    MockTransport, TransferKind,
};
use luxlink_usb::{
    DmxDriver, DriverError, DriverEvent, ErrorReason, EventKind, SendOutcome, SerialBridgeDriver,
    Universe, UsbProDriver, VendorFilter,
};

fn bulk_out_device(vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        vendor_id,
        product_id,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![
                EndpointDescriptor {
                    address: 0x81,
                    direction: EndpointDirection::In,
                    transfer_kind: TransferKind::Bulk,
                },
                EndpointDescriptor {
                    address: 0x02,
                    direction: EndpointDirection::Out,
                    transfer_kind: TransferKind::Bulk,
                },
            ],
        }],
    }
}

fn serial_mock() -> MockTransport {
    MockTransport::new(bulk_out_device(0x0403, 0x6001))
}

fn pro_mock() -> MockTransport {
    MockTransport::new(bulk_out_device(0x2341, 0x8036))
}

fn capture_events<D: DmxDriver>(driver: &D, kind: EventKind) -> Arc<Mutex<Vec<DriverEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    driver.on(kind, move |event| sink.lock().push(event.clone()));
    events
}

/// The buffer pattern from the round-trip scenario: 0, 10, 255, 0 repeating.
fn pattern_universe() -> Universe {
    let data: Vec<u8> = (0..512)
        .map(|i| match i % 4 {
            1 => 10,
            2 => 255,
            _ => 0,
        })
        .collect();
    Universe::try_from(&data[..]).unwrap()
}

#[tokio::test]
async fn serial_bridge_connect_runs_full_setup_sequence() {
    let mock = serial_mock();
    let mut driver = SerialBridgeDriver::new();
    let connected = capture_events(&driver, EventKind::Connected);

    driver.connect(mock.clone()).await.unwrap();

    assert!(driver.is_connected());
    assert_eq!(connected.lock().len(), 1);
    assert_eq!(
        mock.calls(),
        vec![
            MockCall::Open,
            MockCall::SelectConfiguration(1),
            MockCall::ClaimInterface(0),
            // Chip reset, 250k baud, 8N2, no flow control.
            MockCall::ControlOut {
                request: 0x00,
                value: 0x0000,
                index: 0
            },
            MockCall::ControlOut {
                request: 0x03,
                value: 12,
                index: 0
            },
            MockCall::ControlOut {
                request: 0x04,
                value: 0x1008,
                index: 0
            },
            MockCall::ControlOut {
                request: 0x02,
                value: 0x0000,
                index: 0
            },
        ]
    );
}

#[tokio::test]
async fn serial_bridge_connect_fails_without_bulk_out_endpoint() {
    let descriptor = DeviceDescriptor {
        vendor_id: 0x0403,
        product_id: 0x6001,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            endpoints: vec![EndpointDescriptor {
                address: 0x81,
                direction: EndpointDirection::In,
                transfer_kind: TransferKind::Bulk,
            }],
        }],
    };
    let mock = MockTransport::new(descriptor);
    let mut driver = SerialBridgeDriver::new();
    let errors = capture_events(&driver, EventKind::Error);

    let result = driver.connect(mock).await;

    assert!(matches!(result, Err(DriverError::Setup(_))));
    assert!(!driver.is_connected());
    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(matches!(
        &errors[0],
        DriverEvent::Error {
            reason: ErrorReason::ConnectFailed(_),
            ..
        }
    ));
}

#[tokio::test]
async fn usb_pro_connect_claims_interface_and_enables_output() {
    let mock = pro_mock();
    let mut driver = UsbProDriver::new();

    driver.connect(mock.clone()).await.unwrap();

    assert!(driver.is_connected());
    assert_eq!(
        mock.calls(),
        vec![
            MockCall::Open,
            MockCall::ClaimInterface(0),
            MockCall::ControlOut {
                request: 0x22,
                value: 0x0001,
                index: 0
            },
        ]
    );
}

#[tokio::test]
async fn serial_bridge_send_writes_break_then_frame() {
    let mock = serial_mock();
    let mut driver = SerialBridgeDriver::new();
    driver.connect(mock.clone()).await.unwrap();
    mock.clear_calls();

    let universe = pattern_universe();
    let outcome = driver.send_universe(&universe).await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent);

    let calls = mock.calls();
    assert_eq!(calls.len(), 4);
    // Divisor drop for the BREAK, the single zero byte, divisor restore.
    assert_eq!(
        calls[0],
        MockCall::ControlOut {
            request: 0x03,
            value: 33,
            index: 0
        }
    );
    assert_eq!(
        calls[1],
        MockCall::TransferOut {
            endpoint: 0x02,
            data: vec![0x00]
        }
    );
    assert_eq!(
        calls[2],
        MockCall::ControlOut {
            request: 0x03,
            value: 12,
            index: 0
        }
    );

    // The data frame: start code plus all channels, verbatim.
    let MockCall::TransferOut { endpoint, data } = &calls[3] else {
        panic!("expected a bulk transfer, got {:?}", calls[3]);
    };
    assert_eq!(*endpoint, 0x02);
    assert_eq!(data.len(), 513);
    assert_eq!(data[0], 0x00);
    assert_eq!(&data[1..], &universe.channels()[..]);
}

#[tokio::test]
async fn serial_bridge_frame_round_trips() {
    let mock = serial_mock();
    let mut driver = SerialBridgeDriver::new();
    driver.connect(mock.clone()).await.unwrap();
    mock.clear_calls();

    let universe = pattern_universe();
    driver.send_universe(&universe).await.unwrap();

    let frames = mock.written_frames(0x02);
    let frame = frames.last().unwrap();
    let decoded = Universe::try_from(&frame[1..]).unwrap();
    assert_eq!(decoded.channels(), universe.channels());
}

#[tokio::test]
async fn usb_pro_frame_round_trips() {
    let mock = pro_mock();
    let mut driver = UsbProDriver::new();
    driver.connect(mock.clone()).await.unwrap();
    mock.clear_calls();

    let universe = pattern_universe();
    let outcome = driver.send_universe(&universe).await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent);

    let frames = mock.written_frames(0x02);
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];

    assert_eq!(frame.len(), 518);
    assert_eq!(frame[0], 0x7E);
    assert_eq!(frame[1], 0x06);
    assert_eq!(u16::from_le_bytes([frame[2], frame[3]]), 513);
    assert_eq!(frame[4], 0x00);
    assert_eq!(frame[517], 0xE7);

    let decoded = Universe::try_from(&frame[5..517]).unwrap();
    assert_eq!(decoded.channels(), universe.channels());
}

#[tokio::test]
async fn send_universe_requires_connection() {
    let driver: SerialBridgeDriver<MockTransport> = SerialBridgeDriver::new();
    let result = driver.send_universe(&Universe::new()).await;
    assert!(matches!(result, Err(DriverError::NotConnected)));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let mock = pro_mock();
    let mut driver = UsbProDriver::new();
    let disconnected = capture_events(&driver, EventKind::Disconnected);

    // Never connected: a pure no-op.
    driver.disconnect().await;
    assert_eq!(disconnected.lock().len(), 0);

    driver.connect(mock.clone()).await.unwrap();
    driver.disconnect().await;
    driver.disconnect().await;

    assert!(!driver.is_connected());
    assert_eq!(disconnected.lock().len(), 1);
    assert_eq!(
        mock.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Close))
            .count(),
        1
    );
}

#[tokio::test]
async fn disconnect_swallows_close_failures() {
    let mock = pro_mock();
    mock.fail_close();
    let mut driver = UsbProDriver::new();
    driver.connect(mock).await.unwrap();

    // Close fails inside; disconnect must still complete and emit.
    let disconnected = capture_events(&driver, EventKind::Disconnected);
    driver.disconnect().await;
    assert!(!driver.is_connected());
    assert_eq!(disconnected.lock().len(), 1);
}

#[tokio::test]
async fn connect_failure_leaves_driver_usable() {
    let mock = serial_mock();
    mock.fail_open();
    let mut driver = SerialBridgeDriver::new();

    assert!(driver.connect(mock).await.is_err());
    assert!(!driver.is_connected());

    // A fresh transport connects fine afterwards.
    let mock = serial_mock();
    driver.connect(mock).await.unwrap();
    assert!(driver.is_connected());
}

#[test]
fn supports_device_uses_any_filter() {
    let driver: SerialBridgeDriver<MockTransport> = SerialBridgeDriver::new();

    assert!(driver.supports_device(&bulk_out_device(0x0403, 0x6001)));
    assert!(driver.supports_device(&bulk_out_device(0x0403, 0x9999)));
    assert!(!driver.supports_device(&bulk_out_device(0x0999, 0x6001)));
}

proptest! {
    #[test]
    fn vendor_wide_filter_matches_every_product(vendor in any::<u16>(), product in any::<u16>()) {
        let filter = VendorFilter::vendor(vendor);
        prop_assert!(filter.matches(vendor, product));
    }

    #[test]
    fn exact_filter_matches_only_its_pair(
        vendor in any::<u16>(),
        product in any::<u16>(),
        other_vendor in any::<u16>(),
        other_product in any::<u16>(),
    ) {
        let filter = VendorFilter::product(vendor, product);
        prop_assert!(filter.matches(vendor, product));
        prop_assert_eq!(
            filter.matches(other_vendor, other_product),
            other_vendor == vendor && other_product == product
        );
    }
}
