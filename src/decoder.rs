//! Fixed-layout report decoding.
//!
//! Byte 0 tags the frame. Tag 0x00 frames carry buttons in the high nibbles
//! of bytes 2 and 3; every other tag (LED status, rumble acks, headset
//! frames) is dropped silently. Axis bytes are not interpreted.

use crate::consts::{report, REPORT_LEN};
use crate::error::DecodeError;
use crate::event::{Button, Buttons, InputEvent, InputSnapshot};
use log::trace;

impl Buttons {
    /// The single place that knows the bit layout of a standard frame.
    pub fn from_report(raw: &[u8; REPORT_LEN]) -> Self {
        let sys = raw[report::SYSTEM_BUTTONS_OFFSET];
        let face = raw[report::FACE_BUTTONS_OFFSET];
        Buttons {
            start: sys & report::system::START != 0,
            select: sys & report::system::SELECT != 0,
            thumb_left: sys & report::system::THUMB_LEFT != 0,
            thumb_right: sys & report::system::THUMB_RIGHT != 0,
            a: face & report::face::A != 0,
            b: face & report::face::B != 0,
            x: face & report::face::X != 0,
            y: face & report::face::Y != 0,
        }
    }
}

/// Turns raw frames into edge-triggered button events.
#[derive(Debug, Default)]
pub struct PacketDecoder {
    snapshot: InputSnapshot,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one frame.
    ///
    /// Returns `None` for non-standard frames (snapshot untouched). For
    /// standard frames returns the buttons whose state differs from the
    /// snapshot, in [`Button::ALL`] order, and updates the snapshot.
    pub fn decode(&mut self, raw: &[u8; REPORT_LEN]) -> Option<Vec<InputEvent>> {
        let tag = raw[report::TAG_OFFSET];
        if tag != report::TAG_STANDARD {
            trace!("Dropping frame with tag 0x{:02X}", tag);
            return None;
        }

        let current = Buttons::from_report(raw);
        let mut events = Vec::new();
        for button in Button::ALL {
            let pressed = current.get(button);
            if pressed != self.snapshot.buttons.get(button) {
                self.snapshot.buttons.set(button, pressed);
                events.push(InputEvent::Button { button, pressed });
            }
        }
        Some(events)
    }

    /// Axis decoding is not defined for this report layout.
    pub fn decode_axes(&self, _raw: &[u8; REPORT_LEN]) -> Result<Vec<InputEvent>, DecodeError> {
        Err(DecodeError::AxisLayoutUnspecified)
    }

    pub fn snapshot(&self) -> &InputSnapshot {
        &self.snapshot
    }

    /// Forgets the last-known state; the next standard frame reports every held button.
    pub fn reset(&mut self) {
        self.snapshot = InputSnapshot::default();
    }
}
