//! # redgear-hid
//!
//! A Rust crate that drives RedGear USB gamepads (wired and wireless) through
//! their interrupt IN endpoint and turns raw 64-byte reports into
//! edge-triggered button events.
//!
//! The pads speak the Xbox 360 wire protocol and enumerate as Microsoft
//! `045E:028E` on a vendor-specific interface (subclass 93, protocol 1 for
//! wired pads, 129 for wireless ones).
//!
//! ## Features
//!
//! *   Device matching against a compatibility table (built in, or loaded from TOML).
//! *   Per-device sessions created on bus attach and torn down on detach (`DeviceRegistry`).
//! *   One outstanding interrupt-in transfer per device, resubmitted after every report:
//!     *   Shutdown-class statuses stop the loop.
//!     *   Other errors are retried once; a rejected retry tears the session down.
//!     *   Detach cancels the transfer and waits (bounded) for the bus to confirm.
//! *   Report decoding (`PacketDecoder`):
//!     *   Standard frames (tag 0x00) only; other frames are dropped silently.
//!     *   Start, Select, both thumbstick presses and A/B/X/Y.
//!     *   Only changed buttons are reported.
//! *   Deferred dispatch: decoding and event delivery run on a per-session worker,
//!     off the completion path (configurable).
//! *   Backends:
//!     *   `HidBus` / `HidMonitor` over `hidapi` for real hardware.
//!     *   `SimBus`, a scriptable in-process bus for tests.
//! *   `EchoDevice`, a 100-byte echo buffer, and `EchoSink` which logs events into it.
//!
//! ## Limitations
//!
//! *   **Axes:** Stick and trigger bytes are not decoded. Asking for axis events
//!     (`report_axes = true`) makes every attach fail with `DecodeError::AxisLayoutUnspecified`.
//! *   **Output reports:** LEDs and rumble are not driven.
//! *   **hidapi:** The protocol byte of the interface is not visible through hidapi, so
//!     `HidMonitor` reports the wired variant unless told otherwise.
//!
//! ## Installation
//!
//! Add the following to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! redgear-hid = "0.1.0" # Replace with the latest version
//! hidapi = "2.0"        # Or latest compatible version
//! log = "0.4"           # Optional, for logging
//!
//! [dev-dependencies]    # For demos/tests
//! env_logger = "0.11"
//! ```
//!
//! You also need the `hidapi` library installed on your system. See the [`hidapi` crate documentation](https://docs.rs/hidapi/) for details.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use redgear_hid::{DriverConfig, HidMonitor, InputEvent, Result, SessionId};
//! use std::sync::Arc;
//! use std::{thread, time::Duration};
//!
//! fn main() -> Result<()> {
//!     // Optional: Initialize logging
//!     // env_logger::init();
//!
//!     let sink = Arc::new(|session: SessionId, events: &[InputEvent]| {
//!         for event in events {
//!             println!("{}: {}", session, event);
//!         }
//!     });
//!     let mut monitor = HidMonitor::new(sink, DriverConfig::default())?;
//!
//!     loop {
//!         let report = monitor.scan()?;
//!         for handle in &report.attached {
//!             println!("Attached {:?}", monitor.registry().session(*handle));
//!         }
//!         thread::sleep(Duration::from_millis(500));
//!     }
//! }
//! ```
//!
//! ## Driving the registry from your own bus
//!
//! Implement [`InterruptBus`] for the host stack, build a [`DeviceRegistry`] on it,
//! and forward attach/detach notifications to [`DeviceRegistry::on_attach`] and
//! [`DeviceRegistry::on_detach`]. Call [`DeviceRegistry::reap`] periodically (or
//! rely on the next attach) to tear down sessions whose transfer loop failed.
//!
//! ## Hardware Setup Notes
//!
//! *   **Linux udev Rules:** Grant user permission to the HID device. Create `/etc/udev/rules.d/99-redgear.rules`:
//!     ```udev
//!     # RedGear gamepads (Xbox 360 protocol, Microsoft VID)
//!     SUBSYSTEM=="hidraw", ATTRS{idVendor}=="045e", ATTRS{idProduct}=="028e", MODE="0666", GROUP="plugdev"
//!     ```
//!     *(Adjust `GROUP` if needed)*. Reload: `sudo udevadm control --reload-rules && sudo udevadm trigger`
//! *   The kernel's own `xpad` driver may claim the pad first; unbind it if no hidraw node appears.
//!
//! ## License
//!
//! This project is licensed under the WTFPL - see the [LICENSE](LICENSE) file for details.

// Make internal modules private, re-export public types
mod consts;
mod error;
pub mod buffer;
pub mod bus;
pub mod config;
pub mod decoder;
pub mod echo;
pub mod event;
pub mod hid;
pub mod registry;
pub mod session;
pub mod sim;
pub mod transfer;

pub use buffer::{DmaRegion, TransferBuffer};
pub use bus::{
    Completion, CompletionHandler, DeviceAddress, DeviceHandle, EndpointDescriptor,
    InterfaceDescriptor, InterruptBus, InterruptIn, RequestId, TransferStatus,
};
pub use config::{DispatchMode, DriverConfig};
pub use decoder::PacketDecoder;
pub use echo::{EchoDevice, EchoSink};
pub use error::{
    AttachError, BusError, DecodeError, DetachError, EchoError, Error, Result, TransferError,
};
pub use event::{Button, Buttons, InputEvent, InputSnapshot};
pub use hid::{HidBus, HidMonitor, ScanReport};
pub use registry::{
    default_table, match_identity, validate_table, CompatibilityEntry, DeviceIdentity,
    DeviceRegistry, PacketType,
};
pub use session::{EventSink, SessionId, SessionSummary};
pub use sim::{CancelMode, SimBus};
pub use transfer::{CompletionClass, Frame, TransferState};
// Re-export only essential public constants
pub use consts::{
    ECHO_CAPACITY, GAMEPAD_SUBCLASS, MICROSOFT_VID, PROTOCOL_WIRED, PROTOCOL_WIRELESS,
    REDGEAR_PID, REPORT_LEN, USB_CLASS_VENDOR_SPEC,
};

/// Report layout constants, for building frames by hand.
pub mod layout {
    pub use crate::consts::report::{
        face, system, FACE_BUTTONS_OFFSET, MIN_STANDARD_LEN, SYSTEM_BUTTONS_OFFSET, TAG_OFFSET,
        TAG_STANDARD,
    };
}
