//! Scripted in-memory transport for tests and simulation
//!
//! [`MockTransport`] records every primitive call and can be told to fail
//! transfers (hard errors or non-ok completion statuses) or to complete them
//! slowly. Cloning shares the underlying state, so tests keep a clone as a
//! probe while the driver owns the original.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ControlRequest, DeviceDescriptor, TransferOutResult, TransferStatus, TransportError,
    UsbTransport,
};

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Open,
    Close,
    SelectConfiguration(u8),
    ClaimInterface(u8),
    ControlOut { request: u8, value: u16, index: u16 },
    TransferOut { endpoint: u8, data: Vec<u8> },
}

/// How the mock completes OUT transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Complete normally
    #[default]
    None,
    /// Fail with a hard transport error
    Error,
    /// Complete with the given non-ok status
    Status(TransferStatus),
}

#[derive(Default)]
struct MockState {
    open: bool,
    configuration: Option<u8>,
    claimed: Vec<u8>,
    calls: Vec<MockCall>,
    failure_mode: FailureMode,
    fail_open: bool,
    fail_close: bool,
    transfer_delay: Duration,
}

/// In-memory [`UsbTransport`] implementation
#[derive(Clone)]
pub struct MockTransport {
    descriptor: DeviceDescriptor,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Make subsequent OUT transfers (control and bulk) fail or complete
    /// with a non-ok status. `FailureMode::None` restores normal completion.
    pub fn set_failure_mode(&self, mode: FailureMode) {
        self.state.lock().failure_mode = mode;
    }

    /// Make the next `open()` fail.
    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }

    /// Make every `close()` fail.
    pub fn fail_close(&self) {
        self.state.lock().fail_close = true;
    }

    /// Delay every bulk OUT transfer by `delay` before completing.
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.state.lock().transfer_delay = delay;
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Number of bulk OUT transfers recorded so far.
    pub fn transfer_out_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::TransferOut { .. }))
            .count()
    }

    /// Payloads of all bulk OUT transfers on the given endpoint.
    pub fn written_frames(&self, endpoint: u8) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::TransferOut { endpoint: ep, data } if *ep == endpoint => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn check_transfer(&self) -> Result<(), TransportError> {
        let state = self.state.lock();
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        match state.failure_mode {
            FailureMode::Error => Err(TransportError::Transfer(
                "simulated transfer failure".into(),
            )),
            _ => Ok(()),
        }
    }

    fn completion_status(&self) -> TransferStatus {
        match self.state.lock().failure_mode {
            FailureMode::Status(status) => status,
            _ => TransferStatus::Ok,
        }
    }
}

#[async_trait]
impl UsbTransport for MockTransport {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn active_configuration(&self) -> Option<u8> {
        self.state.lock().configuration
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Open);
        if state.fail_open {
            return Err(TransportError::Io(std::io::Error::other(
                "simulated open failure",
            )));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Close);
        state.open = false;
        state.configuration = None;
        state.claimed.clear();
        if state.fail_close {
            return Err(TransportError::Io(std::io::Error::other(
                "simulated close failure",
            )));
        }
        Ok(())
    }

    async fn select_configuration(&mut self, configuration: u8) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::SelectConfiguration(configuration));
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.configuration = Some(configuration);
        Ok(())
    }

    async fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::ClaimInterface(interface));
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        if !state.claimed.contains(&interface) {
            state.claimed.push(interface);
        }
        Ok(())
    }

    async fn control_transfer_out(
        &self,
        request: ControlRequest,
        _data: &[u8],
    ) -> Result<TransferStatus, TransportError> {
        self.state.lock().calls.push(MockCall::ControlOut {
            request: request.request,
            value: request.value,
            index: request.index,
        });
        self.check_transfer()?;
        Ok(self.completion_status())
    }

    async fn transfer_out(
        &self,
        endpoint: u8,
        data: &[u8],
    ) -> Result<TransferOutResult, TransportError> {
        let delay = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::TransferOut {
                endpoint,
                data: data.to_vec(),
            });
            state.transfer_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_transfer()?;
        let status = self.completion_status();
        let bytes_written = if status == TransferStatus::Ok {
            data.len()
        } else {
            0
        };
        Ok(TransferOutResult {
            status,
            bytes_written,
        })
    }
}
