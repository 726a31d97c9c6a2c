//! USB-Pro-compatible framed-protocol driver
//!
//! These adapters generate BREAK/MAB timing in firmware; the host only
//! sends length-prefixed frames:
//!
//! ```text
//! [0x7E] [label] [len lo] [len hi] [payload ...] [0xE7]
//! ```
//!
//! For DMX output the label is 6 and the payload is the start code followed
//! by all 512 channels. With no BREAK synthesis on the host side these
//! adapters sustain a full 60 Hz refresh and tolerate more transient
//! transfer noise, hence the higher error threshold.

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

const DRIVER_NAME: &str = "USB Pro framed DMX adapter";

const FILTERS: &[VendorFilter] = &[
    VendorFilter::product(0x2341, 0x8036),
    // Vendor-wide fallback for compatible boards with other product ids.
    VendorFilter::vendor(0x2341),
];

const FRAME_START: u8 = 0x7E;
const FRAME_END: u8 = 0xE7;
/// "Output Only Send DMX" message label.
const LABEL_OUTPUT_DMX: u8 = 0x06;

const INTERFACE: u8 = 0;
const ENDPOINT_OUT: u8 = 0x02;

/// Class request switching the adapter into DMX output mode.
const REQUEST_ENABLE_OUTPUT: u8 = 0x22;
const ENABLE_OUTPUT_ON: u16 = 0x0001;

const DEFAULT_RATE_HZ: u32 = 60;
const ERROR_THRESHOLD: u32 = 10;

struct Link<T> {
    transport: T,
}

struct Shared<T> {
    link: tokio::sync::Mutex<Option<Link<T>>>,
    connected: AtomicBool,
    events: EventBus,
    output: Arc<OutputState>,
}

/// Driver for USB-Pro-compatible framed adapters
pub struct UsbProDriver<T: UsbTransport> {
    shared: Arc<Shared<T>>,
    scheduler: Option<JoinHandle<()>>,
    period: Duration,
}

impl<T: UsbTransport> UsbProDriver<T> {
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

    /// Connect sequence: open, claim interface 0, enable DMX output mode.
    async fn setup(transport: &mut T) -> Result<()> {
        if !transport.is_open() {
            transport.open().await?;
        }
        transport.claim_interface(INTERFACE).await?;

        let status = transport
            .control_transfer_out(
                ControlRequest {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: REQUEST_ENABLE_OUTPUT,
                    value: ENABLE_OUTPUT_ON,
                    index: INTERFACE as u16,
                },
                &[],
            )
            .await?;
        if status != TransferStatus::Ok {
            return Err(DriverError::Setup(format!(
                "enable-output request rejected with status {status:?}"
            )));
        }
        Ok(())
    }

    async fn write_frame(link: &Link<T>, channels: &[u8; UNIVERSE_SIZE]) -> Result<()> {
        let frame = build_frame(channels);
        let result = link.transport.transfer_out(ENDPOINT_OUT, &frame).await?;
        if result.status == TransferStatus::Ok {
            Ok(())
        } else {
            Err(DriverError::TransferStatus(result.status))
        }
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
            None => {
                reporter.failure(DriverError::NotConnected);
                SendOutcome::Failed
            }
        }
    }
}

impl<T: UsbTransport> Default for UsbProDriver<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Build one framed message: start marker, label, little-endian payload
/// length, start-code-prefixed channel data, end marker.
fn build_frame(channels: &[u8; UNIVERSE_SIZE]) -> Vec<u8> {
    let payload_len = (1 + UNIVERSE_SIZE) as u16;
    let mut frame = Vec::with_capacity(5 + UNIVERSE_SIZE + 1);
    frame.push(FRAME_START);
    frame.push(LABEL_OUTPUT_DMX);
    frame.extend_from_slice(&payload_len.to_le_bytes());
    frame.push(DMX_START_CODE);
    frame.extend_from_slice(channels);
    frame.push(FRAME_END);
    frame
}

#[async_trait]
impl<T: UsbTransport> DmxDriver for UsbProDriver<T> {
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
            Ok(()) => {
                *self.shared.link.lock().await = Some(Link { transport });
                self.shared.connected.store(true, Ordering::Release);
                info!("{DRIVER_NAME}: connected");
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
