//! Shared send-path state and the periodic output task
//!
//! Both protocol drivers embed [`OutputState`]: the in-flight guard that
//! keeps sends single-flight, the consecutive-error counter, and the
//! scheduler-active flag the circuit breaker clears when the error
//! threshold is crossed.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{error, trace, warn};

use super::events::{DriverEvent, ErrorReason, EventBus};
use super::universe::{SharedUniverse, Universe};
use crate::error::DriverError;

/// Send-path bookkeeping embedded by every driver
pub(crate) struct OutputState {
    in_flight: AtomicBool,
    active: AtomicBool,
    errors: AtomicU32,
    threshold: u32,
}

/// RAII token for a single in-flight send; releases the guard on drop.
pub(crate) struct SendPermit<'a> {
    state: &'a OutputState,
}

impl Drop for SendPermit<'_> {
    fn drop(&mut self) {
        self.state.in_flight.store(false, Ordering::Release);
    }
}

impl OutputState {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            active: AtomicBool::new(false),
            errors: AtomicU32::new(0),
            threshold,
        }
    }

    /// Try to begin a send. Returns `None` if another send is in flight.
    pub(crate) fn begin_send(&self) -> Option<SendPermit<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SendPermit { state: self })
    }

    /// A transfer completed successfully: the consecutive-error count
    /// starts over.
    pub(crate) fn record_success(&self) {
        self.errors.store(0, Ordering::Release);
    }

    /// A transfer failed. Returns the new consecutive count and whether this
    /// failure crossed the threshold. The equality test means the breaker
    /// trips exactly once per crossing: the scheduler-active flag is cleared
    /// here and further failures only grow the count.
    pub(crate) fn record_failure(&self) -> (u32, bool) {
        let count = self.errors.fetch_add(1, Ordering::AcqRel) + 1;
        let tripped = count == self.threshold;
        if tripped {
            self.active.store(false, Ordering::Release);
        }
        (count, tripped)
    }

    pub(crate) fn consecutive_errors(&self) -> u32 {
        self.errors.load(Ordering::Acquire)
    }

    pub(crate) fn threshold(&self) -> u32 {
        self.threshold
    }

    pub(crate) fn reset_errors(&self) {
        self.errors.store(0, Ordering::Release);
    }

    pub(crate) fn activate(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Classifies one send attempt's result against the circuit breaker.
///
/// Success resets the consecutive-error count; failure increments it and
/// logs it with the current count and threshold. Exactly once per threshold
/// crossing, the scheduler is stopped and one `Error` event is emitted.
/// Status-failures and hard transport errors count identically but are
/// logged distinguishably.
pub(crate) struct SendReporter<'a> {
    pub state: &'a OutputState,
    pub events: &'a EventBus,
    pub driver: &'a str,
}

impl SendReporter<'_> {
    pub(crate) fn success(&self) {
        self.state.record_success();
        trace!("{}: sent DMX frame", self.driver);
    }

    pub(crate) fn failure(&self, error: DriverError) {
        let (count, tripped) = self.state.record_failure();
        let threshold = self.state.threshold();
        match &error {
            DriverError::TransferStatus(status) => warn!(
                "{}: transfer completed with status {:?} ({}/{})",
                self.driver, status, count, threshold
            ),
            other => warn!(
                "{}: transfer failed ({}/{}): {}",
                self.driver, count, threshold, other
            ),
        }
        if tripped {
            error!(
                "{}: stopping output after {} consecutive transfer errors",
                self.driver, count
            );
            self.events.emit(&DriverEvent::Error {
                driver: self.driver.to_string(),
                reason: ErrorReason::TooManyTransferErrors(count),
            });
        }
    }
}

/// The per-driver output scheduler.
///
/// Reads the shared universe and invokes the driver's send path once per
/// tick until the active flag is cleared (by `stop_output`, `disconnect`,
/// or the circuit breaker). Each tick takes a fresh read of the universe,
/// so in-place mutations by the owner drive the next frame. Missed ticks
/// are skipped, not queued: under a slow transport, frames drop and the
/// latest data wins.
pub(crate) async fn run_output_loop<S, Fut>(
    universe: SharedUniverse,
    state: Arc<OutputState>,
    period: Duration,
    send: S,
) where
    S: Fn(Universe) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while state.is_active() {
        ticker.tick().await;
        if !state.is_active() {
            break;
        }
        let frame = universe.read().clone();
        send(frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_is_exclusive_and_released_on_drop() {
        let state = OutputState::new(5);

        let permit = state.begin_send().expect("first permit");
        assert!(state.begin_send().is_none());

        drop(permit);
        assert!(state.begin_send().is_some());
    }

    #[test]
    fn test_breaker_trips_exactly_once_at_threshold() {
        let state = OutputState::new(3);
        state.activate();

        assert_eq!(state.record_failure(), (1, false));
        assert_eq!(state.record_failure(), (2, false));
        assert_eq!(state.record_failure(), (3, true));
        assert!(!state.is_active());

        // Past the threshold the count keeps growing but never re-trips.
        assert_eq!(state.record_failure(), (4, false));
    }

    #[test]
    fn test_success_resets_the_count() {
        let state = OutputState::new(3);

        state.record_failure();
        state.record_failure();
        state.record_success();
        assert_eq!(state.consecutive_errors(), 0);

        // A fresh run of failures can trip the breaker again.
        state.record_failure();
        state.record_failure();
        assert_eq!(state.record_failure(), (3, true));
    }
}
