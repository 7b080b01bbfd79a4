//! hidapi backend: an [`InterruptBus`] over hidraw-style report reads, and a
//! polling monitor that turns device enumeration changes into attach and
//! detach notifications.
//!
//! hidapi exposes neither endpoint descriptors nor the interface protocol
//! byte. The monitor therefore synthesizes the pad's single interrupt IN
//! endpoint and reports a configured protocol variant (wired by default).

use crate::buffer::DmaRegion;
use crate::bus::{
    Completion, CompletionHandler, DeviceAddress, DeviceHandle, EndpointDescriptor,
    InterfaceDescriptor, InterruptBus, InterruptIn, RequestId, TransferStatus,
};
use crate::config::DriverConfig;
use crate::consts::{self, endpoint, REPORT_LEN};
use crate::error::{BusError, Result};
use crate::registry::{DeviceIdentity, DeviceRegistry};
use crate::session::EventSink;
use hidapi::{HidApi, HidDevice};
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Read slice; bounds how long a cancel or close takes to be noticed.
const READ_SLICE_MS: i32 = 50;

/// An opened hidraw device.
struct HidLink {
    device: Mutex<HidDevice>,
    path: String,
    closed: AtomicBool,
}

struct Armed {
    handler: CompletionHandler,
    region: Arc<DmaRegion>,
    length: usize,
}

#[derive(Default)]
struct ReaderShared {
    armed: Mutex<Option<Armed>>,
    wake: Condvar,
    cancel: AtomicBool,
    closing: AtomicBool,
}

struct RequestSlot {
    handle: DeviceHandle,
    shared: Arc<ReaderShared>,
    reader: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct HidState {
    next_token: u64,
    links: HashMap<DeviceHandle, Arc<HidLink>>,
    requests: HashMap<RequestId, RequestSlot>,
    regions: HashMap<DeviceAddress, Arc<DmaRegion>>,
}

impl HidState {
    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

/// [`InterruptBus`] backed by hidapi.
///
/// Each request owns a reader thread that waits until a transfer is armed,
/// then polls the device in short slices until a report arrives, the
/// request is cancelled, or the device goes away.
#[derive(Default)]
pub struct HidBus {
    state: Mutex<HidState>,
}

impl HidBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the device at `path` and makes it reachable as `handle`.
    pub fn open_device(&self, api: &HidApi, handle: DeviceHandle, path: &CStr) -> Result<()> {
        let device = api.open_path(path)?;
        let link = Arc::new(HidLink {
            device: Mutex::new(device),
            path: path.to_string_lossy().into_owned(),
            closed: AtomicBool::new(false),
        });
        debug!("{}: opened {}", handle, link.path);
        self.state.lock().links.insert(handle, link);
        Ok(())
    }

    /// Forgets the device. Readers still polling it complete with `NoSuchDevice`.
    pub fn close_device(&self, handle: DeviceHandle) {
        if let Some(link) = self.state.lock().links.remove(&handle) {
            link.closed.store(true, Ordering::Release);
            debug!("{}: closed {}", handle, link.path);
        }
    }
}

fn reader_loop(handle: DeviceHandle, link: Arc<HidLink>, shared: Arc<ReaderShared>) {
    let mut buf = [0u8; REPORT_LEN];
    loop {
        let armed = {
            let mut slot = shared.armed.lock();
            loop {
                if shared.closing.load(Ordering::Acquire) {
                    trace!("{}: reader exiting", handle);
                    return;
                }
                if let Some(armed) = slot.take() {
                    break armed;
                }
                shared
                    .wake
                    .wait_for(&mut slot, Duration::from_millis(READ_SLICE_MS as u64));
            }
        };

        let status = loop {
            if shared.cancel.swap(false, Ordering::AcqRel) {
                break TransferStatus::ConnectionReset;
            }
            if link.closed.load(Ordering::Acquire) || shared.closing.load(Ordering::Acquire) {
                break TransferStatus::NoSuchDevice;
            }
            match link.device.lock().read_timeout(&mut buf, READ_SLICE_MS) {
                Ok(0) => continue,
                Ok(n) => {
                    let n = armed.region.fill(&buf[..n.min(armed.length)]);
                    trace!("{}: report {:02X?}", handle, &buf[..n]);
                    (armed.handler)(Completion {
                        status: TransferStatus::Ok,
                        actual_length: n,
                    });
                    break TransferStatus::Ok;
                }
                Err(e) => {
                    warn!("{}: read failed: {}", handle, e);
                    break TransferStatus::NoSuchDevice;
                }
            }
        };
        if status != TransferStatus::Ok {
            (armed.handler)(Completion {
                status,
                actual_length: 0,
            });
        }
    }
}

impl InterruptBus for HidBus {
    fn alloc_request(&self, handle: DeviceHandle) -> std::result::Result<RequestId, BusError> {
        let mut state = self.state.lock();
        let link = state
            .links
            .get(&handle)
            .cloned()
            .ok_or(BusError::NoDevice(handle))?;
        let request = RequestId(state.token());
        let shared = Arc::new(ReaderShared::default());
        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("redgear-hid-{}", handle.0))
                .spawn(move || reader_loop(handle, link, shared))
                .map_err(|e| BusError::OutOfResources(e.to_string()))?
        };
        state.requests.insert(
            request,
            RequestSlot {
                handle,
                shared,
                reader: Some(reader),
            },
        );
        Ok(request)
    }

    fn free_request(&self, request: RequestId) {
        let slot = self.state.lock().requests.remove(&request);
        let Some(mut slot) = slot else {
            warn!("Free of unknown request {:?}", request);
            return;
        };
        slot.shared.closing.store(true, Ordering::Release);
        slot.shared.wake.notify_all();
        if let Some(reader) = slot.reader.take() {
            if reader.join().is_err() {
                error!("{}: reader thread panicked", slot.handle);
            }
        }
    }

    fn map_buffer(
        &self,
        handle: DeviceHandle,
        region: Arc<DmaRegion>,
    ) -> std::result::Result<DeviceAddress, BusError> {
        let mut state = self.state.lock();
        if !state.links.contains_key(&handle) {
            return Err(BusError::NoDevice(handle));
        }
        let address = DeviceAddress(state.token());
        state.regions.insert(address, region);
        Ok(address)
    }

    fn unmap_buffer(&self, address: DeviceAddress) {
        if self.state.lock().regions.remove(&address).is_none() {
            warn!("Unmap of unknown buffer {}", address);
        }
    }

    fn submit_in(
        &self,
        request: RequestId,
        transfer: InterruptIn,
        on_complete: CompletionHandler,
    ) -> std::result::Result<(), BusError> {
        let state = self.state.lock();
        let slot = state
            .requests
            .get(&request)
            .ok_or_else(|| BusError::Rejected(format!("unknown request {:?}", request)))?;
        let link = state
            .links
            .get(&slot.handle)
            .ok_or(BusError::NoDevice(slot.handle))?;
        if link.closed.load(Ordering::Acquire) {
            return Err(BusError::NoDevice(slot.handle));
        }
        let region = state
            .regions
            .get(&transfer.buffer)
            .cloned()
            .ok_or_else(|| BusError::Rejected(format!("buffer {} not mapped", transfer.buffer)))?;
        let mut armed = slot.shared.armed.lock();
        if armed.is_some() {
            return Err(BusError::Rejected("request already queued".to_string()));
        }
        *armed = Some(Armed {
            handler: on_complete,
            region,
            length: transfer.length,
        });
        slot.shared.wake.notify_one();
        Ok(())
    }

    fn cancel(&self, request: RequestId) {
        if let Some(slot) = self.state.lock().requests.get(&request) {
            slot.shared.cancel.store(true, Ordering::Release);
            slot.shared.wake.notify_all();
        }
    }

    fn device_path(&self, handle: DeviceHandle) -> Option<String> {
        self.state
            .lock()
            .links
            .get(&handle)
            .map(|link| link.path.clone())
    }
}

/// Changes applied by one [`HidMonitor::scan`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub attached: Vec<DeviceHandle>,
    pub detached: Vec<DeviceHandle>,
    /// Sessions torn down after a transfer failure.
    pub reaped: usize,
}

/// Polls hidapi enumeration and drives a [`DeviceRegistry`] from it.
pub struct HidMonitor {
    api: HidApi,
    bus: Arc<HidBus>,
    registry: DeviceRegistry,
    known: HashMap<CString, DeviceHandle>,
    /// Paths that failed to attach; not retried until they disappear.
    refused: HashSet<CString>,
    next_handle: u64,
    protocol_variant: u8,
}

impl HidMonitor {
    pub fn new(sink: Arc<dyn EventSink>, config: DriverConfig) -> Result<Self> {
        let api = HidApi::new()?;
        let bus = Arc::new(HidBus::new());
        let registry = DeviceRegistry::new(bus.clone(), sink, config)?;
        Ok(HidMonitor {
            api,
            bus,
            registry,
            known: HashMap::new(),
            refused: HashSet::new(),
            next_handle: 1,
            protocol_variant: consts::PROTOCOL_WIRED,
        })
    }

    /// Protocol variant reported for every enumerated pad.
    pub fn with_protocol_variant(mut self, protocol_variant: u8) -> Self {
        self.protocol_variant = protocol_variant;
        self
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn interface_for(&self, interface_number: i32) -> InterfaceDescriptor {
        InterfaceDescriptor {
            number: u8::try_from(interface_number).unwrap_or(0),
            class: consts::USB_CLASS_VENDOR_SPEC,
            subclass: consts::GAMEPAD_SUBCLASS,
            protocol: self.protocol_variant,
            endpoints: vec![EndpointDescriptor::interrupt_in(
                endpoint::PAD_IN_ADDRESS & 0x0F,
                endpoint::PAD_IN_MAX_PACKET,
                endpoint::PAD_IN_INTERVAL,
            )],
        }
    }

    /// Re-enumerates, attaching new pads and detaching vanished ones.
    pub fn scan(&mut self) -> Result<ScanReport> {
        self.api.refresh_devices()?;
        let mut report = ScanReport::default();

        let present: Vec<(CString, u16, u16, i32)> = self
            .api
            .device_list()
            .filter(|info| {
                self.registry.table().iter().any(|entry| {
                    entry.vendor_id == info.vendor_id() && entry.product_id == info.product_id()
                })
            })
            .map(|info| {
                (
                    info.path().to_owned(),
                    info.vendor_id(),
                    info.product_id(),
                    info.interface_number(),
                )
            })
            .collect();
        let present_paths: HashSet<&CString> = present.iter().map(|(p, ..)| p).collect();

        let gone: Vec<(CString, DeviceHandle)> = self
            .known
            .iter()
            .filter(|(path, _)| !present_paths.contains(path))
            .map(|(path, handle)| (path.clone(), *handle))
            .collect();
        for (path, handle) in gone {
            self.known.remove(&path);
            if let Err(e) = self.registry.on_detach(handle) {
                error!("{}: detach failed: {}", handle, e);
            }
            // Handles are never reused, so no second detach can follow.
            self.registry.forget(handle);
            self.bus.close_device(handle);
            report.detached.push(handle);
        }
        self.refused.retain(|path| present_paths.contains(path));

        for (path, vendor_id, product_id, interface_number) in &present {
            if self.known.contains_key(path) || self.refused.contains(path) {
                continue;
            }
            let handle = DeviceHandle(self.next_handle);
            self.next_handle += 1;
            if let Err(e) = self.bus.open_device(&self.api, handle, path) {
                warn!("Cannot open {:?}: {}", path, e);
                self.refused.insert(path.clone());
                continue;
            }
            let identity = DeviceIdentity {
                vendor_id: *vendor_id,
                product_id: *product_id,
                protocol_variant: self.protocol_variant,
                interface_class: consts::USB_CLASS_VENDOR_SPEC,
            };
            let interface = self.interface_for(*interface_number);
            match self.registry.on_attach(handle, identity, &interface) {
                Ok(session) => {
                    info!("{}: attached as {}", handle, session);
                    self.known.insert(path.clone(), handle);
                    report.attached.push(handle);
                }
                Err(e) => {
                    warn!("{}: attach refused: {}", handle, e);
                    self.bus.close_device(handle);
                    self.refused.insert(path.clone());
                }
            }
        }

        report.reaped = self.registry.reap();
        Ok(report)
    }

    /// Scans every `poll` until `stop` is set, then detaches everything.
    pub fn run(&mut self, poll: Duration, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            let report = self.scan()?;
            if !report.attached.is_empty() || !report.detached.is_empty() || report.reaped > 0 {
                debug!("Scan: {:?}", report);
            }
            thread::sleep(poll);
        }
        self.registry.shutdown();
        for (_, handle) in self.known.drain() {
            self.bus.close_device(handle);
        }
        Ok(())
    }
}
