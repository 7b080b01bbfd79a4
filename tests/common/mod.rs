//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use crossbeam::channel::{self, Receiver, Sender};
use redgear_hid::{
    DeviceHandle, DeviceIdentity, DeviceRegistry, DispatchMode, DriverConfig,
    EndpointDescriptor, EventSink, InputEvent, InterfaceDescriptor, SessionId, SimBus,
    GAMEPAD_SUBCLASS, MICROSOFT_VID, PROTOCOL_WIRED, REDGEAR_PID, REPORT_LEN,
    USB_CLASS_VENDOR_SPEC,
};
use std::sync::Arc;
use std::time::Duration;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Forwards every report to a channel the test can wait on.
pub struct RecordingSink {
    tx: Sender<(SessionId, Vec<InputEvent>)>,
}

impl EventSink for RecordingSink {
    fn report(&self, session: SessionId, events: &[InputEvent]) {
        let _ = self.tx.send((session, events.to_vec()));
    }
}

pub fn recording_sink() -> (Arc<RecordingSink>, Receiver<(SessionId, Vec<InputEvent>)>) {
    let (tx, rx) = channel::unbounded();
    (Arc::new(RecordingSink { tx }), rx)
}

pub fn identity(protocol_variant: u8) -> DeviceIdentity {
    DeviceIdentity {
        vendor_id: MICROSOFT_VID,
        product_id: REDGEAR_PID,
        protocol_variant,
        interface_class: USB_CLASS_VENDOR_SPEC,
    }
}

pub fn wired() -> DeviceIdentity {
    identity(PROTOCOL_WIRED)
}

/// Gamepad interface with the given number of interrupt IN endpoints
/// (plus one interrupt OUT endpoint, which must never count).
pub fn pad_interface(interrupt_in: u8) -> InterfaceDescriptor {
    let mut endpoints: Vec<_> = (1..=interrupt_in)
        .map(|n| EndpointDescriptor::interrupt_in(n, 32, 4))
        .collect();
    endpoints.push(EndpointDescriptor {
        address: 0x02,
        attributes: 0x03,
        max_packet_size: 32,
        interval: 8,
    });
    InterfaceDescriptor {
        number: 0,
        class: USB_CLASS_VENDOR_SPEC,
        subclass: GAMEPAD_SUBCLASS,
        protocol: PROTOCOL_WIRED,
        endpoints,
    }
}

pub fn frame(prefix: &[u8]) -> [u8; REPORT_LEN] {
    let mut raw = [0u8; REPORT_LEN];
    raw[..prefix.len()].copy_from_slice(prefix);
    raw
}

pub struct Rig {
    pub bus: Arc<SimBus>,
    pub registry: DeviceRegistry,
    pub events: Receiver<(SessionId, Vec<InputEvent>)>,
}

pub fn rig_with(config: DriverConfig) -> Rig {
    init_logging();
    let bus = Arc::new(SimBus::new());
    let (sink, events) = recording_sink();
    let registry = DeviceRegistry::new(bus.clone(), sink, config).expect("registry");
    Rig {
        bus,
        registry,
        events,
    }
}

pub fn rig(dispatch: DispatchMode) -> Rig {
    rig_with(DriverConfig {
        dispatch,
        cancel_timeout_ms: 300,
        ..DriverConfig::default()
    })
}

pub fn attach(rig: &Rig, handle: u64) -> SessionId {
    rig.registry
        .on_attach(DeviceHandle(handle), wired(), &pad_interface(1))
        .expect("attach")
}
