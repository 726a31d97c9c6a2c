//! Generic serial-bridge driver (FT232-class adapters)
//!
//! The cheapest DMX adapters expose a raw USB-serial endpoint and no DMX
//! framing of their own. The BREAK that starts every DMX frame has to be
//! synthesized: the baud divisor is dropped to ~90,909 baud, a single zero
//! byte is written (its stretched bit time holds the line low for well over
//! the 88 µs minimum), and after a settle delay the divisor is switched
//! back to the DMX rate of 250,000 baud for the start code and channel
//! data. Two divisor switches per frame make this driver slower than the
//! framed adapters, hence the conservative 25 Hz refresh.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use super::driver::{DmxDriver, SendOutcome, VendorFilter};
use super::events::{DriverEvent, ErrorReason, EventBus, EventKind, HandlerId};
use super::output::{run_output_loop, OutputState, SendReporter};
use super::universe::{SharedUniverse, Universe, DMX_START_CODE, UNIVERSE_SIZE};
use crate::error::{DriverError, Result};
use crate::transport::{ControlRequest, ControlType, Recipient, TransferStatus, UsbTransport};

const DRIVER_NAME: &str = "Generic serial-bridge DMX adapter";

const FILTERS: &[VendorFilter] = &[
    VendorFilter::product(0x0403, 0x6001),
    // Vendor-wide fallback for rebadged bridges with custom product ids.
    VendorFilter::vendor(0x0403),
];

// FT232-style vendor requests.
const REQUEST_RESET: u8 = 0x00;
const REQUEST_SET_FLOW_CTRL: u8 = 0x02;
const REQUEST_SET_BAUD_RATE: u8 = 0x03;
const REQUEST_SET_DATA: u8 = 0x04;

/// 3 MHz reference clock / 12 = 250,000 baud, the DMX512 rate.
const DIVISOR_DMX: u16 = 12;
/// 3 MHz / 33 ≈ 90,909 baud; one zero byte at this rate holds the line low
/// for ~110 µs, producing the BREAK.
const DIVISOR_BREAK: u16 = 33;
/// 8 data bits, no parity, 2 stop bits.
const DATA_FORMAT_8N2: u16 = 0x1008;
const FLOW_CTRL_NONE: u16 = 0x0000;

/// Line settle time after the BREAK byte before resuming the DMX rate.
const BREAK_SETTLE: Duration = Duration::from_millis(1);

const DEFAULT_RATE_HZ: u32 = 25;
const ERROR_THRESHOLD: u32 = 5;

struct Link<T> {
    transport: T,
    bulk_out: u8,
}

struct Shared<T> {
    link: tokio::sync::Mutex<Option<Link<T>>>,
    connected: AtomicBool,
    events: EventBus,
    output: Arc<OutputState>,
}

/// Driver for generic USB-serial bridges with a bit-banged BREAK
pub struct SerialBridgeDriver<T: UsbTransport> {
    shared: Arc<Shared<T>>,
    scheduler: Option<JoinHandle<()>>,
    period: Duration,
}

impl<T: UsbTransport> SerialBridgeDriver<T> {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                link: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                events: EventBus::new(),
                output: Arc::new(OutputState::new(ERROR_THRESHOLD)),
            }),
            scheduler: None,
            period: Duration::from_millis(1000 / DEFAULT_RATE_HZ as u64),
        }
    }

    /// Full connect sequence; returns the bulk OUT endpoint address.
    /// Every step is fatal to the attempt.
    async fn setup(transport: &mut T) -> Result<u8> {
        if !transport.is_open() {
            transport.open().await?;
        }
        if transport.active_configuration().is_none() {
            transport.select_configuration(1).await?;
        }

        let interface = transport
            .descriptor()
            .interfaces
            .first()
            .ok_or_else(|| DriverError::Setup("device exposes no interfaces".into()))?
            .number;
        transport.claim_interface(interface).await?;

        let bulk_out = transport
            .descriptor()
            .first_bulk_out(interface)
            .ok_or_else(|| {
                DriverError::Setup(format!("no bulk OUT endpoint on interface {interface}"))
            })?;

        let steps: [(u8, u16, &str); 4] = [
            (REQUEST_RESET, 0x0000, "chip reset"),
            (REQUEST_SET_BAUD_RATE, DIVISOR_DMX, "baud rate"),
            (REQUEST_SET_DATA, DATA_FORMAT_8N2, "data format"),
            (REQUEST_SET_FLOW_CTRL, FLOW_CTRL_NONE, "flow control"),
        ];
        for (request, value, step) in steps {
            let status = Self::vendor_request(transport, request, value).await?;
            if status != TransferStatus::Ok {
                return Err(DriverError::Setup(format!(
                    "{step} request rejected with status {status:?}"
                )));
            }
        }

        Ok(bulk_out)
    }

    async fn vendor_request(transport: &T, request: u8, value: u16) -> Result<TransferStatus> {
        let status = transport
            .control_transfer_out(
                ControlRequest {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: 0,
                },
                &[],
            )
            .await?;
        Ok(status)
    }

    async fn switch_baud(transport: &T, divisor: u16) -> Result<()> {
        let status = Self::vendor_request(transport, REQUEST_SET_BAUD_RATE, divisor).await?;
        check_status(status)
    }

    /// One full DMX frame: synthesized BREAK, settle delay, then the
    /// 513-byte start-code-prefixed packet at the DMX rate.
    async fn write_frame(link: &Link<T>, channels: &[u8; UNIVERSE_SIZE]) -> Result<()> {
        let transport = &link.transport;

        Self::switch_baud(transport, DIVISOR_BREAK).await?;
        let brk = transport.transfer_out(link.bulk_out, &[0x00]).await?;
        check_status(brk.status)?;
        tokio::time::sleep(BREAK_SETTLE).await;
        Self::switch_baud(transport, DIVISOR_DMX).await?;

        let frame = build_frame(channels);
        let result = transport.transfer_out(link.bulk_out, &frame).await?;
        check_status(result.status)
    }

    /// In-flight-guarded send path shared by the scheduler and one-shot
    /// sends. Failures are counted, never propagated.
    async fn send_frame(shared: &Shared<T>, channels: &[u8; UNIVERSE_SIZE]) -> SendOutcome {
        let Some(_permit) = shared.output.begin_send() else {
            trace!("{DRIVER_NAME}: previous send still in flight, dropping frame");
            return SendOutcome::Skipped;
        };
        let reporter = SendReporter {
            state: &shared.output,
            events: &shared.events,
            driver: DRIVER_NAME,
        };

        let link = shared.link.lock().await;
        match link.as_ref() {
            Some(link) => match Self::write_frame(link, channels).await {
                Ok(()) => {
                    reporter.success();
                    SendOutcome::Sent
                }
                Err(error) => {
                    reporter.failure(error);
                    SendOutcome::Failed
                }
            },
            // Disconnected while this send was queued behind the permit.
            None => {
                reporter.failure(DriverError::NotConnected);
                SendOutcome::Failed
            }
        }
    }
}

impl<T: UsbTransport> Default for SerialBridgeDriver<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_status(status: TransferStatus) -> Result<()> {
    if status == TransferStatus::Ok {
        Ok(())
    } else {
        Err(DriverError::TransferStatus(status))
    }
}

/// Build the wire frame: start code followed by all 512 channels.
fn build_frame(channels: &[u8; UNIVERSE_SIZE]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(1 + UNIVERSE_SIZE);
    frame.push(DMX_START_CODE);
    frame.extend_from_slice(channels);
    frame
}

#[async_trait]
impl<T: UsbTransport> DmxDriver for SerialBridgeDriver<T> {
    type Transport = T;

    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn filters(&self) -> &[VendorFilter] {
        FILTERS
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn consecutive_errors(&self) -> u32 {
        self.shared.output.consecutive_errors()
    }

    fn set_update_rate(&mut self, hz: u32) {
        self.period = Duration::from_millis(1000 / hz.max(1) as u64);
    }

    async fn connect(&mut self, mut transport: T) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        match Self::setup(&mut transport).await {
            Ok(bulk_out) => {
                *self.shared.link.lock().await = Some(Link {
                    transport,
                    bulk_out,
                });
                self.shared.connected.store(true, Ordering::Release);
                info!("{DRIVER_NAME}: connected, bulk OUT endpoint {bulk_out:#04x}");
                self.shared.events.emit(&DriverEvent::Connected {
                    driver: DRIVER_NAME.to_string(),
                });
                Ok(())
            }
            Err(error) => {
                error!("{DRIVER_NAME}: connect failed: {error}");
                self.shared.events.emit(&DriverEvent::Error {
                    driver: DRIVER_NAME.to_string(),
                    reason: ErrorReason::ConnectFailed(error.to_string()),
                });
                Err(error)
            }
        }
    }

    async fn disconnect(&mut self) {
        self.stop_output().await;

        let link = self.shared.link.lock().await.take();
        if let Some(mut link) = link {
            if let Err(error) = link.transport.close().await {
                warn!("{DRIVER_NAME}: failed to close transport: {error}");
            }
        }
        self.shared.output.reset_errors();

        if self.shared.connected.swap(false, Ordering::AcqRel) {
            info!("{DRIVER_NAME}: disconnected");
            self.shared.events.emit(&DriverEvent::Disconnected {
                driver: DRIVER_NAME.to_string(),
            });
        }
    }

    async fn send_universe(&self, universe: &Universe) -> Result<SendOutcome> {
        if !self.is_connected() {
            return Err(DriverError::NotConnected);
        }
        Ok(Self::send_frame(&self.shared, universe.channels()).await)
    }

    async fn start_output(&mut self, universe: SharedUniverse) -> Result<()> {
        if !self.is_connected() {
            return Err(DriverError::NotConnected);
        }
        // Never two timers: cancel any previous scheduler first.
        self.stop_output().await;

        self.shared.output.reset_errors();
        self.shared.output.activate();

        let shared = self.shared.clone();
        let state = self.shared.output.clone();
        self.scheduler = Some(tokio::spawn(run_output_loop(
            universe,
            state,
            self.period,
            move |frame: Universe| {
                let shared = shared.clone();
                async move {
                    Self::send_frame(&shared, frame.channels()).await;
                }
            },
        )));
        info!("{DRIVER_NAME}: output started, one frame every {:?}", self.period);
        Ok(())
    }

    async fn stop_output(&mut self) {
        self.shared.output.deactivate();
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.await;
        }
    }

    fn on(
        &self,
        kind: EventKind,
        handler: impl Fn(&DriverEvent) + Send + Sync + 'static,
    ) -> HandlerId {
        self.shared.events.on(kind, handler)
    }

    fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        self.shared.events.off(kind, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_is_start_code_plus_channels() {
        let mut channels = [0u8; UNIVERSE_SIZE];
        channels[0] = 10;
        channels[2] = 255;
        channels[511] = 42;

        let frame = build_frame(&channels);

        assert_eq!(frame.len(), 513);
        assert_eq!(frame[0], 0x00);
        assert_eq!(frame[1], 10);
        assert_eq!(frame[3], 255);
        assert_eq!(frame[512], 42);
        assert_eq!(&frame[1..], &channels[..]);
    }

    #[test]
    fn test_divisors_match_target_bauds() {
        // 3 MHz reference clock.
        assert_eq!(3_000_000 / DIVISOR_DMX as u32, 250_000);
        let break_baud = 3_000_000 / DIVISOR_BREAK as u32;
        assert!((90_000..92_000).contains(&break_baud));
    }

    #[test]
    fn test_filters_cover_exact_and_vendor_wide_matches() {
        let driver: SerialBridgeDriver<crate::transport::MockTransport> =
            SerialBridgeDriver::new();

        let device = |vendor_id, product_id| crate::transport::DeviceDescriptor {
            vendor_id,
            product_id,
            interfaces: Vec::new(),
        };

        assert!(driver.supports_device(&device(0x0403, 0x6001)));
        assert!(driver.supports_device(&device(0x0403, 0x9999)));
        assert!(!driver.supports_device(&device(0x0999, 0x6001)));
    }
}
