//! In-process [`InterruptBus`] for tests and demos.
//!
//! Nothing completes on its own: the caller injects reports and statuses
//! with [`SimBus::complete`], which delivers the completion on the calling
//! thread after the bus lock is released.

use crate::buffer::DmaRegion;
use crate::bus::{
    Completion, CompletionHandler, DeviceAddress, DeviceHandle, InterruptBus, InterruptIn,
    RequestId, TransferStatus,
};
use crate::error::BusError;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

/// What the simulated bus does with a cancel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelMode {
    /// Complete the request with `ConnectionReset` from another thread.
    #[default]
    Complete,
    /// Swallow the cancel; the request stays outstanding.
    Ignore,
}

struct Pending {
    request: RequestId,
    transfer: InterruptIn,
    handler: CompletionHandler,
}

#[derive(Default)]
struct SimState {
    next_token: u64,
    requests: HashMap<RequestId, DeviceHandle>,
    regions: HashMap<DeviceAddress, Arc<DmaRegion>>,
    pending: HashMap<DeviceHandle, Pending>,
    submissions: HashMap<DeviceHandle, u64>,
    last_transfer: HashMap<DeviceHandle, InterruptIn>,
    reject_submits: HashMap<DeviceHandle, u32>,
    fail_alloc: u32,
    fail_map: u32,
    cancel_mode: CancelMode,
    unplugged: HashSet<DeviceHandle>,
    paths: HashMap<DeviceHandle, String>,
    invalid_releases: u64,
}

impl SimState {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn take_pending(&mut self, request: RequestId) -> Option<Pending> {
        let handle = *self.requests.get(&request)?;
        match self.pending.get(&handle) {
            Some(p) if p.request == request => self.pending.remove(&handle),
            _ => None,
        }
    }
}

/// A scriptable host bus.
#[derive(Default)]
pub struct SimBus {
    state: Mutex<SimState>,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cancel_mode(&self, mode: CancelMode) {
        self.state.lock().cancel_mode = mode;
    }

    pub fn set_device_path(&self, handle: DeviceHandle, path: impl Into<String>) {
        self.state.lock().paths.insert(handle, path.into());
    }

    /// The next `count` submissions for `handle` are rejected.
    pub fn reject_next_submits(&self, handle: DeviceHandle, count: u32) {
        self.state.lock().reject_submits.insert(handle, count);
    }

    /// The next request allocation fails.
    pub fn fail_next_request_alloc(&self) {
        self.state.lock().fail_alloc += 1;
    }

    /// The next buffer mapping fails.
    pub fn fail_next_buffer_map(&self) {
        self.state.lock().fail_map += 1;
    }

    /// Completes the outstanding request of `handle`.
    ///
    /// On `Ok`, `data` is written into the mapped buffer first. Returns
    /// `false` if nothing was outstanding.
    pub fn complete(&self, handle: DeviceHandle, status: TransferStatus, data: &[u8]) -> bool {
        let (pending, actual_length) = {
            let mut state = self.state.lock();
            let Some(pending) = state.pending.remove(&handle) else {
                trace!("{}: nothing outstanding to complete", handle);
                return false;
            };
            let actual_length = match (status, state.regions.get(&pending.transfer.buffer)) {
                (TransferStatus::Ok, Some(region)) => {
                    region.fill(&data[..data.len().min(pending.transfer.length)])
                }
                (TransferStatus::Ok, None) => {
                    warn!("{}: completing into an unmapped buffer", handle);
                    0
                }
                _ => 0,
            };
            (pending, actual_length)
        };
        (pending.handler)(Completion {
            status,
            actual_length,
        });
        true
    }

    /// Delivers a standard report with status `Ok`.
    pub fn deliver_report(&self, handle: DeviceHandle, data: &[u8]) -> bool {
        self.complete(handle, TransferStatus::Ok, data)
    }

    /// Marks the device gone. Completes its outstanding request with `NoSuchDevice`.
    pub fn unplug(&self, handle: DeviceHandle) -> bool {
        self.state.lock().unplugged.insert(handle);
        self.complete(handle, TransferStatus::NoSuchDevice, &[])
    }

    pub fn submissions(&self, handle: DeviceHandle) -> u64 {
        self.state
            .lock()
            .submissions
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_pending(&self, handle: DeviceHandle) -> bool {
        self.state.lock().pending.contains_key(&handle)
    }

    /// The most recent transfer accepted for `handle`.
    pub fn last_transfer(&self, handle: DeviceHandle) -> Option<InterruptIn> {
        self.state.lock().last_transfer.get(&handle).copied()
    }

    pub fn mapped_buffers(&self) -> usize {
        self.state.lock().regions.len()
    }

    pub fn live_requests(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Frees and unmaps of objects the bus did not know about.
    pub fn invalid_releases(&self) -> u64 {
        self.state.lock().invalid_releases
    }
}

impl InterruptBus for SimBus {
    fn alloc_request(&self, handle: DeviceHandle) -> Result<RequestId, BusError> {
        let mut state = self.state.lock();
        if state.fail_alloc > 0 {
            state.fail_alloc -= 1;
            return Err(BusError::OutOfResources("request pool empty".to_string()));
        }
        let request = RequestId(state.token());
        state.requests.insert(request, handle);
        trace!("{}: allocated {:?}", handle, request);
        Ok(request)
    }

    fn free_request(&self, request: RequestId) {
        let mut state = self.state.lock();
        if state.take_pending(request).is_some() {
            warn!("{:?} freed while outstanding", request);
        }
        if state.requests.remove(&request).is_none() {
            warn!("Free of unknown request {:?}", request);
            state.invalid_releases += 1;
        }
    }

    fn map_buffer(
        &self,
        handle: DeviceHandle,
        region: Arc<DmaRegion>,
    ) -> Result<DeviceAddress, BusError> {
        let mut state = self.state.lock();
        if state.fail_map > 0 {
            state.fail_map -= 1;
            return Err(BusError::OutOfResources("no mappable memory".to_string()));
        }
        if state.unplugged.contains(&handle) {
            return Err(BusError::NoDevice(handle));
        }
        let address = DeviceAddress(0x1000_0000 + state.token() * 0x40);
        state.regions.insert(address, region);
        Ok(address)
    }

    fn unmap_buffer(&self, address: DeviceAddress) {
        let mut state = self.state.lock();
        if state.regions.remove(&address).is_none() {
            warn!("Unmap of unknown buffer {}", address);
            state.invalid_releases += 1;
        }
    }

    fn submit_in(
        &self,
        request: RequestId,
        transfer: InterruptIn,
        on_complete: CompletionHandler,
    ) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let Some(&handle) = state.requests.get(&request) else {
            return Err(BusError::Rejected(format!("unknown request {:?}", request)));
        };
        if state.unplugged.contains(&handle) {
            return Err(BusError::NoDevice(handle));
        }
        if let Some(left) = state.reject_submits.get_mut(&handle) {
            if *left > 0 {
                *left -= 1;
                debug!("{}: rejecting submission ({} more)", handle, left);
                return Err(BusError::Rejected("scripted rejection".to_string()));
            }
        }
        if state.pending.contains_key(&handle) {
            return Err(BusError::Rejected("request already queued".to_string()));
        }
        if !state.regions.contains_key(&transfer.buffer) {
            return Err(BusError::Rejected(format!(
                "buffer {} is not mapped",
                transfer.buffer
            )));
        }
        state.pending.insert(
            handle,
            Pending {
                request,
                transfer,
                handler: on_complete,
            },
        );
        *state.submissions.entry(handle).or_insert(0) += 1;
        state.last_transfer.insert(handle, transfer);
        Ok(())
    }

    fn cancel(&self, request: RequestId) {
        let mut state = self.state.lock();
        if state.cancel_mode == CancelMode::Ignore {
            debug!("Ignoring cancel of {:?}", request);
            return;
        }
        let Some(pending) = state.take_pending(request) else {
            return;
        };
        drop(state);
        let spawned = thread::Builder::new()
            .name("sim-cancel".to_string())
            .spawn(move || {
                (pending.handler)(Completion {
                    status: TransferStatus::ConnectionReset,
                    actual_length: 0,
                })
            });
        if let Err(e) = spawned {
            warn!("Cancel completion thread failed to start: {}", e);
        }
    }

    fn device_path(&self, handle: DeviceHandle) -> Option<String> {
        self.state.lock().paths.get(&handle).cloned()
    }
}
