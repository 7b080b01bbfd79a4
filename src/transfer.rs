//! Interrupt-transfer engine: one outstanding request per device session.
//!
//! States: `Idle -> Submitted -> Completed(status) -> Submitted ...` until a
//! shutdown-class status, a cancel, or a failed resubmit moves the engine to
//! the terminal `Cancelled` state. Every transition happens under the
//! engine's mutex, so submit, completion and cancel of one session are
//! serialized while different sessions never contend.

use crate::buffer::BufferRef;
use crate::bus::{
    Completion, CompletionHandler, EndpointDescriptor, InterruptBus, InterruptIn, RequestId,
    TransferStatus,
};
use crate::consts::REPORT_LEN;
use crate::error::TransferError;
use log::{debug, error, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Lifecycle state of the session's transfer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Submitted,
    Completed(TransferStatus),
    Cancelled,
}

/// How a completion status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionClass {
    /// Deliver the frame and resubmit.
    Success,
    /// The device or endpoint went away (or the request was unlinked). Stop.
    Shutdown,
    /// Anything else. Retry once.
    Transient,
}

impl CompletionClass {
    pub fn of(status: TransferStatus) -> Self {
        match status {
            TransferStatus::Ok => CompletionClass::Success,
            TransferStatus::ConnectionReset
            | TransferStatus::NoSuchDevice
            | TransferStatus::EndpointShutdown => CompletionClass::Shutdown,
            TransferStatus::Other(_) => CompletionClass::Transient,
        }
    }
}

/// A copy of the transfer buffer taken on successful completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub bytes: [u8; REPORT_LEN],
    /// Bytes actually transferred.
    pub len: usize,
}

/// Receives what the engine produces on the completion path.
///
/// Both methods are called from the bus's completion context and must return
/// in bounded time without waiting on bus I/O.
pub trait FrameHandler: Send + Sync {
    /// A report arrived. Called with the engine lock held, before resubmission.
    fn on_frame(&self, frame: &Frame);
    /// The engine stopped because of a persistent error. Called without the lock.
    fn on_failure(&self, error: TransferError);
}

#[derive(Debug)]
struct EngineState {
    state: TransferState,
    cancel_requested: bool,
    submissions: u64,
}

/// Owns the single interrupt-in request of a device session.
pub struct TransferEngine {
    bus: Arc<dyn InterruptBus>,
    request: RequestId,
    endpoint: EndpointDescriptor,
    buffer: BufferRef,
    hooks: Arc<dyn FrameHandler>,
    handler: CompletionHandler,
    inner: Mutex<EngineState>,
    stopped: Condvar,
}

impl TransferEngine {
    pub(crate) fn new(
        bus: Arc<dyn InterruptBus>,
        request: RequestId,
        endpoint: EndpointDescriptor,
        buffer: BufferRef,
        hooks: Arc<dyn FrameHandler>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<TransferEngine>| {
            let weak = weak.clone();
            let handler: CompletionHandler = Arc::new(move |completion: Completion| {
                match weak.upgrade() {
                    Some(engine) => engine.complete(completion),
                    None => trace!("Completion for a dropped engine ignored"),
                }
            });
            TransferEngine {
                bus,
                request,
                endpoint,
                buffer,
                hooks,
                handler,
                inner: Mutex::new(EngineState {
                    state: TransferState::Idle,
                    cancel_requested: false,
                    submissions: 0,
                }),
                stopped: Condvar::new(),
            }
        })
    }

    pub fn state(&self) -> TransferState {
        self.inner.lock().state
    }

    /// Queues the interrupt-in request (`Idle`/`Completed` -> `Submitted`).
    pub fn submit(&self) -> Result<(), TransferError> {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            TransferState::Idle | TransferState::Completed(_) => self.submit_locked(&mut inner),
            TransferState::Submitted => Err(TransferError::Busy),
            TransferState::Cancelled => Err(TransferError::Terminated),
        }
    }

    fn submit_locked(&self, inner: &mut EngineState) -> Result<(), TransferError> {
        if !self.buffer.begin_transfer() {
            error!(
                "Transfer buffer {} already referenced by an outstanding request",
                self.buffer.address()
            );
            return Err(TransferError::Busy);
        }
        let transfer = InterruptIn {
            endpoint: self.endpoint.address,
            buffer: self.buffer.address(),
            length: REPORT_LEN,
            interval: self.endpoint.interval,
        };
        match self
            .bus
            .submit_in(self.request, transfer, Arc::clone(&self.handler))
        {
            Ok(()) => {
                inner.state = TransferState::Submitted;
                inner.submissions += 1;
                trace!(
                    "Submitted interrupt-in #{} on EP 0x{:02X} into {} (interval {} ms)",
                    inner.submissions,
                    transfer.endpoint,
                    transfer.buffer,
                    transfer.interval
                );
                Ok(())
            }
            Err(e) => {
                self.buffer.end_transfer();
                debug!("Bus rejected interrupt-in request: {}", e);
                Err(TransferError::QueueRejected)
            }
        }
    }

    fn stop_locked(&self, inner: &mut EngineState) {
        inner.state = TransferState::Cancelled;
        self.stopped.notify_all();
    }

    /// Completion path. Invoked by the bus once per accepted request.
    fn complete(&self, completion: Completion) {
        let mut inner = self.inner.lock();
        if inner.state != TransferState::Submitted {
            warn!(
                "Unexpected completion ({}) in state {:?} ignored",
                completion.status, inner.state
            );
            return;
        }
        self.buffer.end_transfer();
        inner.state = TransferState::Completed(completion.status);

        if inner.cancel_requested {
            debug!("Cancellation observed (status: {})", completion.status);
            self.stop_locked(&mut inner);
            return;
        }

        let failure = match CompletionClass::of(completion.status) {
            CompletionClass::Success => {
                let frame = Frame {
                    bytes: self.buffer.copy_out(),
                    len: completion.actual_length.min(REPORT_LEN),
                };
                self.hooks.on_frame(&frame);
                match self.submit_locked(&mut inner) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("Resubmission failed: {}", e);
                        self.stop_locked(&mut inner);
                        Some(e)
                    }
                }
            }
            CompletionClass::Shutdown => {
                debug!("Transfer stopped: {}", completion.status);
                self.stop_locked(&mut inner);
                None
            }
            CompletionClass::Transient => {
                warn!(
                    "Transient transfer error ({}), retrying once",
                    completion.status
                );
                match self.submit_locked(&mut inner) {
                    Ok(()) => None,
                    Err(e) => {
                        error!("Retry after transient error rejected: {}", e);
                        self.stop_locked(&mut inner);
                        Some(TransferError::RetryFailed)
                    }
                }
            }
        };
        drop(inner);

        if let Some(e) = failure {
            self.hooks.on_failure(e);
        }
    }

    /// Requests cancellation. Returns immediately; completion is observed
    /// asynchronously (see [`TransferEngine::wait_cancelled`]).
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            TransferState::Submitted => {
                if !inner.cancel_requested {
                    inner.cancel_requested = true;
                    debug!("Cancelling outstanding request {:?}", self.request);
                    self.bus.cancel(self.request);
                }
            }
            TransferState::Idle | TransferState::Completed(_) => self.stop_locked(&mut inner),
            TransferState::Cancelled => {}
        }
    }

    /// Blocks until the engine reaches `Cancelled`, at most `timeout`.
    pub fn wait_cancelled(&self, timeout: Duration) -> Result<(), TransferError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.state != TransferState::Cancelled {
            if self.stopped.wait_until(&mut inner, deadline).timed_out()
                && inner.state != TransferState::Cancelled
            {
                return Err(TransferError::CancelTimeout);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("request", &self.request)
            .field("endpoint", &self.endpoint)
            .field("state", &self.inner.try_lock().map(|inner| inner.state))
            .finish()
    }
}
