//! Device matching and the session registry driven by bus attach/detach.

use crate::bus::{DeviceHandle, EndpointDescriptor, InterfaceDescriptor, InterruptBus};
use crate::config::DriverConfig;
use crate::consts;
use crate::error::{AttachError, DecodeError, DetachError, Error, Result};
use crate::session::{DeviceSession, EventSink, SessionFailure, SessionId, SessionParams, SessionSummary};
use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What the bus reports about a device, used only for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub protocol_variant: u8,
    pub interface_class: u8,
}

/// Report layout a compatible device produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketType {
    /// Tagged 64-byte frames with buttons in bytes 2 and 3.
    #[default]
    Standard,
}

/// One row of the compatibility table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    pub protocol_variant: u8,
    pub display_name: String,
    #[serde(default)]
    pub packet_type: PacketType,
}

/// Interface protocols the driver accepts.
pub const ACCEPTED_VARIANTS: [u8; 2] = [consts::PROTOCOL_WIRED, consts::PROTOCOL_WIRELESS];

/// The built-in table: RedGear wired and wireless pads.
pub fn default_table() -> Vec<CompatibilityEntry> {
    vec![
        CompatibilityEntry {
            vendor_id: consts::MICROSOFT_VID,
            product_id: consts::REDGEAR_PID,
            protocol_variant: consts::PROTOCOL_WIRED,
            display_name: "RedGear Wired Gamepad".to_string(),
            packet_type: PacketType::Standard,
        },
        CompatibilityEntry {
            vendor_id: consts::MICROSOFT_VID,
            product_id: consts::REDGEAR_PID,
            protocol_variant: consts::PROTOCOL_WIRELESS,
            display_name: "RedGear Wireless Gamepad".to_string(),
            packet_type: PacketType::Standard,
        },
    ]
}

/// Rejects tables where two entries share vendor, product and protocol variant.
pub fn validate_table(table: &[CompatibilityEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in table {
        if !seen.insert((entry.vendor_id, entry.product_id, entry.protocol_variant)) {
            return Err(Error::InvalidTable(format!(
                "duplicate entry {:04X}:{:04X} protocol {} ({})",
                entry.vendor_id, entry.product_id, entry.protocol_variant, entry.display_name
            )));
        }
    }
    Ok(())
}

/// First entry matching vendor, product and an accepted protocol variant.
pub fn match_identity<'a>(
    table: &'a [CompatibilityEntry],
    identity: &DeviceIdentity,
) -> Option<&'a CompatibilityEntry> {
    if !ACCEPTED_VARIANTS.contains(&identity.protocol_variant) {
        return None;
    }
    table.iter().find(|entry| {
        entry.vendor_id == identity.vendor_id
            && entry.product_id == identity.product_id
            && entry.protocol_variant == identity.protocol_variant
    })
}

fn single_interrupt_in(
    interface: &InterfaceDescriptor,
) -> std::result::Result<EndpointDescriptor, AttachError> {
    let mut endpoints = interface.interrupt_in_endpoints();
    match (endpoints.next(), endpoints.next()) {
        (Some(ep), None) => Ok(*ep),
        (None, _) => Err(AttachError::UnsupportedTopology { found: 0 }),
        (Some(_), Some(_)) => Err(AttachError::UnsupportedTopology {
            found: interface.interrupt_in_endpoints().count(),
        }),
    }
}

/// Completion latch for one in-progress teardown.
#[derive(Default)]
struct Teardown {
    done: Mutex<bool>,
    finished: Condvar,
}

impl Teardown {
    fn open(&self) {
        *self.done.lock() = true;
        self.finished.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
    }
}

/// What the registry knows about a handle.
enum Slot {
    Live(DeviceSession),
    /// Removed from service; cancel and release are running on another thread.
    Retiring(Arc<Teardown>),
    /// Fully released. Kept so that repeated detaches succeed.
    Retired,
}

#[derive(Default)]
struct Slots {
    map: HashMap<DeviceHandle, Slot>,
    /// Retirement order of `Retired` tombstones, oldest first.
    retired: VecDeque<DeviceHandle>,
}

impl Slots {
    fn live(&self, handle: &DeviceHandle) -> Option<&DeviceSession> {
        match self.map.get(handle) {
            Some(Slot::Live(session)) => Some(session),
            _ => None,
        }
    }

    /// Swaps a live session for a `Retiring` marker and hands it out.
    fn begin_retire(&mut self, handle: DeviceHandle) -> Option<(DeviceSession, Arc<Teardown>)> {
        if !matches!(self.map.get(&handle), Some(Slot::Live(_))) {
            return None;
        }
        let gate = Arc::new(Teardown::default());
        match self.map.insert(handle, Slot::Retiring(Arc::clone(&gate))) {
            Some(Slot::Live(session)) => Some((session, gate)),
            _ => None,
        }
    }

    /// Number of handles still holding bus resources.
    fn occupied(&self) -> usize {
        self.map
            .values()
            .filter(|slot| !matches!(slot, Slot::Retired))
            .count()
    }

    fn forget(&mut self, handle: &DeviceHandle) {
        self.retired.retain(|h| h != handle);
    }
}

/// Owns every live [`DeviceSession`], keyed by bus handle.
///
/// Attach and detach for different handles may run concurrently; the
/// session map is only locked for lookups and state changes, never across a
/// transfer wait. A handle being torn down stays in the map as `Retiring`
/// until its buffer is released, so a detach racing the teardown waits for it.
pub struct DeviceRegistry {
    table: Vec<CompatibilityEntry>,
    bus: Arc<dyn InterruptBus>,
    sink: Arc<dyn EventSink>,
    config: DriverConfig,
    slots: Mutex<Slots>,
    /// Sessions whose transfer never confirmed cancellation. Never released.
    quarantine: Mutex<Vec<DeviceSession>>,
    next_id: AtomicU64,
    failures_tx: Sender<SessionFailure>,
    failures_rx: Receiver<SessionFailure>,
}

impl DeviceRegistry {
    /// Builds a registry. Uses the configured table or [`default_table`].
    pub fn new(
        bus: Arc<dyn InterruptBus>,
        sink: Arc<dyn EventSink>,
        config: DriverConfig,
    ) -> Result<Self> {
        let table = config.devices.clone().unwrap_or_else(default_table);
        validate_table(&table)?;
        let (failures_tx, failures_rx) = channel::unbounded();
        debug!("Device registry ready with {} table entries", table.len());
        Ok(DeviceRegistry {
            table,
            bus,
            sink,
            config,
            slots: Mutex::new(Slots::default()),
            quarantine: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            failures_tx,
            failures_rx,
        })
    }

    pub fn table(&self) -> &[CompatibilityEntry] {
        &self.table
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Looks up the compatibility entry for `identity`. No side effects.
    pub fn match_device(&self, identity: &DeviceIdentity) -> Option<&CompatibilityEntry> {
        match_identity(&self.table, identity)
    }

    /// Bus attach notification. Claims the device and starts its transfer loop.
    pub fn on_attach(
        &self,
        handle: DeviceHandle,
        identity: DeviceIdentity,
        interface: &InterfaceDescriptor,
    ) -> std::result::Result<SessionId, AttachError> {
        self.reap();

        let entry = self
            .match_device(&identity)
            .ok_or(AttachError::NotSupported {
                vendor_id: identity.vendor_id,
                product_id: identity.product_id,
                protocol_variant: identity.protocol_variant,
            })?;
        if self.config.report_axes {
            warn!("{}: axis events requested but not decodable", handle);
            return Err(AttachError::Decoder(DecodeError::AxisLayoutUnspecified));
        }
        let endpoint = single_interrupt_in(interface).inspect_err(|e| {
            warn!("{}: {}", handle, e);
        })?;

        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let path = self
            .bus
            .device_path(handle)
            .unwrap_or_else(|| format!("usb-{}/input{}", handle.0, interface.number));
        let session = DeviceSession::open(SessionParams {
            id,
            handle,
            identity,
            display_name: entry.display_name.clone(),
            path,
            endpoint,
            bus: Arc::clone(&self.bus),
            sink: Arc::clone(&self.sink),
            dispatch: self.config.dispatch,
            queue_depth: self.config.queue_depth,
            failures: self.failures_tx.clone(),
        })?;
        let engine = session.engine();

        {
            let mut slots = self.slots.lock();
            let refusal = match slots.map.get(&handle) {
                Some(Slot::Live(_)) | Some(Slot::Retiring(_)) => {
                    Some(AttachError::AlreadyClaimed(handle))
                }
                _ if slots.occupied() >= self.config.max_sessions => {
                    warn!(
                        "{}: session limit ({}) reached",
                        handle, self.config.max_sessions
                    );
                    Some(AttachError::ResourceExhausted)
                }
                _ => None,
            };
            if let Some(e) = refusal {
                drop(slots);
                self.discard(session);
                return Err(e);
            }
            slots.forget(&handle);
            slots.map.insert(handle, Slot::Live(session));
        }

        if let Err(e) = engine.submit() {
            warn!("{}: initial submit failed: {}", handle, e);
            let session = {
                let mut slots = self.slots.lock();
                match slots.map.remove(&handle) {
                    Some(Slot::Live(session)) => Some(session),
                    Some(other) => {
                        // A concurrent detach already took it over.
                        slots.map.insert(handle, other);
                        None
                    }
                    None => None,
                }
            };
            if let Some(session) = session {
                self.discard(session);
            }
            return Err(AttachError::SubmitFailed(e));
        }
        Ok(id)
    }

    /// Bus detach notification. Cancels the transfer, waits for the bus to
    /// confirm, then frees the session. Repeated detaches are no-ops; a
    /// detach arriving while the session is already being torn down waits
    /// for that teardown to finish.
    pub fn on_detach(&self, handle: DeviceHandle) -> std::result::Result<(), DetachError> {
        let mut slots = self.slots.lock();
        match slots.map.get(&handle) {
            None => {
                drop(slots);
                error!("{}: detach for a device that was never attached", handle);
                Err(DetachError::UnknownDevice(handle))
            }
            Some(Slot::Retired) => {
                debug!("{}: repeated detach ignored", handle);
                Ok(())
            }
            Some(Slot::Retiring(gate)) => {
                let gate = Arc::clone(gate);
                drop(slots);
                debug!("{}: detach waiting for teardown in progress", handle);
                gate.wait();
                Ok(())
            }
            Some(Slot::Live(_)) => {
                let Some((session, gate)) = slots.begin_retire(handle) else {
                    return Ok(());
                };
                drop(slots);
                self.retire(handle, session, &gate)
            }
        }
    }

    /// Tears down sessions whose transfer loop failed. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let mut reaped = 0;
        while let Ok(failure) = self.failures_rx.try_recv() {
            let claimed = {
                let mut slots = self.slots.lock();
                let current = slots
                    .live(&failure.handle)
                    .is_some_and(|s| s.id() == failure.session);
                if current {
                    slots.begin_retire(failure.handle)
                } else {
                    None
                }
            };
            let Some((session, gate)) = claimed else {
                debug!("{}: failure for {} already handled", failure.handle, failure.session);
                continue;
            };
            warn!(
                "{}: tearing down {} after {}",
                failure.handle, failure.session, failure.error
            );
            if self.retire(failure.handle, session, &gate).is_ok() {
                reaped += 1;
            }
        }
        reaped
    }

    /// Cancels and releases a session already marked `Retiring`, then
    /// leaves a tombstone and wakes any detach waiting on it.
    fn retire(
        &self,
        handle: DeviceHandle,
        session: DeviceSession,
        gate: &Arc<Teardown>,
    ) -> std::result::Result<(), DetachError> {
        let result = self.release(session);
        {
            let mut slots = self.slots.lock();
            if matches!(slots.map.get(&handle), Some(Slot::Retiring(g)) if Arc::ptr_eq(g, gate)) {
                slots.map.insert(handle, Slot::Retired);
                slots.retired.push_back(handle);
                while slots.retired.len() > self.config.retired_capacity {
                    if let Some(oldest) = slots.retired.pop_front() {
                        if matches!(slots.map.get(&oldest), Some(Slot::Retired)) {
                            slots.map.remove(&oldest);
                        }
                    }
                }
            }
        }
        gate.open();
        result
    }

    fn release(&self, session: DeviceSession) -> std::result::Result<(), DetachError> {
        let handle = session.handle();
        match session.shutdown(self.config.cancel_timeout()) {
            Ok(()) => Ok(()),
            Err(session) => {
                error!(
                    "{}: transfer never completed after cancel; quarantining {}",
                    handle,
                    session.id()
                );
                self.quarantine.lock().push(session);
                Err(DetachError::CancelTimeout(handle))
            }
        }
    }

    /// Releases a session that never became visible to the bus loop.
    fn discard(&self, session: DeviceSession) {
        if let Err(e) = self.release(session) {
            error!("Rollback of partially attached session failed: {}", e);
        }
    }

    /// Drops the tombstone of a handle the bus will never detach again.
    /// Live and retiring handles are left alone.
    pub fn forget(&self, handle: DeviceHandle) {
        let mut slots = self.slots.lock();
        if matches!(slots.map.get(&handle), Some(Slot::Retired)) {
            slots.map.remove(&handle);
            slots.forget(&handle);
            trace!("{}: tombstone dropped", handle);
        }
    }

    /// Detaches every live session.
    pub fn shutdown(&self) {
        let claimed: Vec<(DeviceHandle, DeviceSession, Arc<Teardown>)> = {
            let mut slots = self.slots.lock();
            let live: Vec<DeviceHandle> = slots
                .map
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
                .map(|(handle, _)| *handle)
                .collect();
            live.into_iter()
                .filter_map(|handle| {
                    slots
                        .begin_retire(handle)
                        .map(|(session, gate)| (handle, session, gate))
                })
                .collect()
        };
        for (handle, session, gate) in claimed {
            if let Err(e) = self.retire(handle, session, &gate) {
                error!("{}: shutdown: {}", handle, e);
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.slots
            .lock()
            .map
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    pub fn session(&self, handle: DeviceHandle) -> Option<SessionSummary> {
        self.slots.lock().live(&handle).map(DeviceSession::summary)
    }

    pub fn handles(&self) -> Vec<DeviceHandle> {
        let mut handles: Vec<_> = self
            .slots
            .lock()
            .map
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(handle, _)| *handle)
            .collect();
        handles.sort();
        handles
    }

    /// Handles remembered only so that a repeated detach succeeds.
    pub fn tombstones(&self) -> usize {
        self.slots.lock().retired.len()
    }

    /// Sessions leaked because their cancellation was never confirmed.
    pub fn quarantined(&self) -> usize {
        self.quarantine.lock().len()
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        let live = self.session_count();
        if live > 0 {
            info!("Registry dropped with {} live session(s); detaching", live);
            self.shutdown();
        }
    }
}
