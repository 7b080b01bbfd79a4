//! Per-device sessions: buffer, transfer engine, dispatch path and identity.

use crate::buffer::TransferBuffer;
use crate::bus::{DeviceHandle, EndpointDescriptor, InterruptBus, RequestId};
use crate::config::DispatchMode;
use crate::consts::report;
use crate::decoder::PacketDecoder;
use crate::error::{AttachError, TransferError};
use crate::event::InputEvent;
use crate::registry::DeviceIdentity;
use crate::transfer::{Frame, FrameHandler, TransferEngine, TransferState};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Identifies one device session for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Destination of decoded events.
///
/// `report` is called once per standard frame that changed at least one
/// control. Sinks must not call back into the
/// [`DeviceRegistry`](crate::registry::DeviceRegistry).
pub trait EventSink: Send + Sync {
    fn report(&self, session: SessionId, events: &[InputEvent]);
}

impl<F> EventSink for F
where
    F: Fn(SessionId, &[InputEvent]) + Send + Sync,
{
    fn report(&self, session: SessionId, events: &[InputEvent]) {
        self(session, events)
    }
}

/// Fatal transfer error posted from the completion context for later teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SessionFailure {
    pub handle: DeviceHandle,
    pub session: SessionId,
    pub error: TransferError,
}

fn deliver(id: SessionId, decoder: &mut PacketDecoder, sink: &dyn EventSink, frame: &Frame) {
    if frame.len < report::MIN_STANDARD_LEN {
        trace!("{}: dropping short frame ({} bytes)", id, frame.len);
        return;
    }
    if let Some(events) = decoder.decode(&frame.bytes) {
        if !events.is_empty() {
            sink.report(id, &events);
        }
    }
}

enum Route {
    Inline {
        decoder: Mutex<PacketDecoder>,
        sink: Arc<dyn EventSink>,
    },
    /// Closed (set to `None`) on teardown so the worker drains and exits.
    Deferred(Mutex<Option<Sender<Frame>>>),
}

/// Completion-side hooks of one session.
struct FrameRoute {
    id: SessionId,
    handle: DeviceHandle,
    route: Route,
    failures: Sender<SessionFailure>,
}

impl FrameRoute {
    fn close(&self) {
        if let Route::Deferred(tx) = &self.route {
            tx.lock().take();
        }
    }
}

impl FrameHandler for FrameRoute {
    fn on_frame(&self, frame: &Frame) {
        match &self.route {
            Route::Inline { decoder, sink } => {
                deliver(self.id, &mut decoder.lock(), sink.as_ref(), frame)
            }
            Route::Deferred(tx) => {
                let tx = tx.lock();
                let Some(tx) = tx.as_ref() else {
                    trace!("{}: dispatch closed, frame dropped", self.id);
                    return;
                };
                match tx.try_send(*frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("{}: dispatch queue full, dropping frame", self.id)
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        debug!("{}: dispatch worker gone, frame dropped", self.id)
                    }
                }
            }
        }
    }

    fn on_failure(&self, error: TransferError) {
        error!("{} on {}: transfer stopped: {}", self.id, self.handle, error);
        let failure = SessionFailure {
            handle: self.handle,
            session: self.id,
            error,
        };
        if self.failures.send(failure).is_err() {
            debug!("{}: registry gone, failure not queued", self.id);
        }
    }
}

fn spawn_dispatch_worker(
    id: SessionId,
    rx: Receiver<Frame>,
    sink: Arc<dyn EventSink>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("redgear-dispatch-{}", id.0))
        .spawn(move || {
            let mut decoder = PacketDecoder::new();
            for frame in rx.iter() {
                deliver(id, &mut decoder, sink.as_ref(), &frame);
            }
            trace!("{}: dispatch worker exiting", id);
        })
}

/// Everything needed to build a session.
pub(crate) struct SessionParams {
    pub id: SessionId,
    pub handle: DeviceHandle,
    pub identity: DeviceIdentity,
    pub display_name: String,
    pub path: String,
    pub endpoint: EndpointDescriptor,
    pub bus: Arc<dyn InterruptBus>,
    pub sink: Arc<dyn EventSink>,
    pub dispatch: DispatchMode,
    pub queue_depth: usize,
    pub failures: Sender<SessionFailure>,
}

/// Read-only view of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub handle: DeviceHandle,
    pub identity: DeviceIdentity,
    pub display_name: String,
    pub path: String,
    pub state: TransferState,
}

/// Per-device aggregate owning the transfer buffer and engine.
pub struct DeviceSession {
    id: SessionId,
    handle: DeviceHandle,
    identity: DeviceIdentity,
    display_name: String,
    path: String,
    bus: Arc<dyn InterruptBus>,
    request: Option<RequestId>,
    buffer: Option<TransferBuffer>,
    engine: Arc<TransferEngine>,
    route: Arc<FrameRoute>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSession {
    /// Acquires request, buffer and dispatch path, in that order. On failure
    /// everything acquired so far is released in reverse order.
    pub(crate) fn open(params: SessionParams) -> Result<Self, AttachError> {
        let SessionParams {
            id,
            handle,
            identity,
            display_name,
            path,
            endpoint,
            bus,
            sink,
            dispatch,
            queue_depth,
            failures,
        } = params;

        let request = bus.alloc_request(handle).map_err(|e| {
            warn!("{}: request allocation failed: {}", handle, e);
            AttachError::ResourceExhausted
        })?;

        let buffer = match TransferBuffer::map(bus.as_ref(), handle) {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("{}: buffer mapping failed: {}", handle, e);
                bus.free_request(request);
                return Err(AttachError::ResourceExhausted);
            }
        };

        let (route, worker) = match dispatch {
            DispatchMode::Inline => (
                Route::Inline {
                    decoder: Mutex::new(PacketDecoder::new()),
                    sink,
                },
                None,
            ),
            DispatchMode::Deferred => {
                let (tx, rx) = channel::bounded(queue_depth.max(1));
                match spawn_dispatch_worker(id, rx, sink) {
                    Ok(worker) => (Route::Deferred(Mutex::new(Some(tx))), Some(worker)),
                    Err(e) => {
                        warn!("{}: dispatch worker spawn failed: {}", handle, e);
                        if buffer.release(bus.as_ref()).is_err() {
                            error!("{}: fresh buffer reported in flight", handle);
                        }
                        bus.free_request(request);
                        return Err(AttachError::ResourceExhausted);
                    }
                }
            }
        };

        let route = Arc::new(FrameRoute {
            id,
            handle,
            route,
            failures,
        });
        let engine = TransferEngine::new(
            Arc::clone(&bus),
            request,
            endpoint,
            buffer.borrow_ref(),
            Arc::clone(&route) as Arc<dyn FrameHandler>,
        );

        info!(
            "{}: {} on {} ({}), EP 0x{:02X}, {:?} dispatch",
            id, display_name, handle, path, endpoint.address, dispatch
        );

        Ok(DeviceSession {
            id,
            handle,
            identity,
            display_name,
            path,
            bus,
            request: Some(request),
            buffer: Some(buffer),
            engine,
            route,
            worker,
        })
    }

    #[inline]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[inline]
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn transfer_state(&self) -> TransferState {
        self.engine.state()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            handle: self.handle,
            identity: self.identity,
            display_name: self.display_name.clone(),
            path: self.path.clone(),
            state: self.transfer_state(),
        }
    }

    pub(crate) fn engine(&self) -> Arc<TransferEngine> {
        Arc::clone(&self.engine)
    }

    /// Cancels the outstanding transfer, waits up to `timeout` for the bus
    /// to confirm, then releases everything. On timeout nothing is released
    /// and the session is handed back.
    pub(crate) fn shutdown(self, timeout: Duration) -> std::result::Result<(), Self> {
        self.engine.cancel();
        if let Err(e) = self.engine.wait_cancelled(timeout) {
            error!("{} on {}: {}", self.id, self.handle, e);
            return Err(self);
        }
        self.release();
        Ok(())
    }

    fn release(mut self) {
        self.route.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("{}: dispatch worker panicked", self.id);
            }
        }
        if let Some(buffer) = self.buffer.take() {
            if let Err(buffer) = buffer.release(self.bus.as_ref()) {
                // The bus still holds its own reference to the region.
                error!("{}: buffer {} left mapped", self.id, buffer.address());
            }
        }
        if let Some(request) = self.request.take() {
            self.bus.free_request(request);
        }
        info!("{}: {} on {} released", self.id, self.display_name, self.handle);
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("display_name", &self.display_name)
            .field("path", &self.path)
            .field("engine", &self.engine)
            .finish()
    }
}
