//! Input events and the per-session state snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A digital control on the pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Button {
    Start,
    Select,
    ThumbstickLeftPress,
    ThumbstickRightPress,
    A,
    B,
    X,
    Y,
}

impl Button {
    /// Every decoded button, in report order (byte 2 bits 4..7, then byte 3 bits 4..7).
    pub const ALL: [Button; 8] = [
        Button::Start,
        Button::Select,
        Button::ThumbstickLeftPress,
        Button::ThumbstickRightPress,
        Button::A,
        Button::B,
        Button::X,
        Button::Y,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Button::Start => "Start",
            Button::Select => "Select",
            Button::ThumbstickLeftPress => "ThumbL",
            Button::ThumbstickRightPress => "ThumbR",
            Button::A => "A",
            Button::B => "B",
            Button::X => "X",
            Button::Y => "Y",
        }
    }
}

/// Named boolean view of the decoded buttons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buttons {
    pub start: bool,
    pub select: bool,
    pub thumb_left: bool,
    pub thumb_right: bool,
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
}

impl Buttons {
    pub fn get(&self, button: Button) -> bool {
        match button {
            Button::Start => self.start,
            Button::Select => self.select,
            Button::ThumbstickLeftPress => self.thumb_left,
            Button::ThumbstickRightPress => self.thumb_right,
            Button::A => self.a,
            Button::B => self.b,
            Button::X => self.x,
            Button::Y => self.y,
        }
    }

    pub fn set(&mut self, button: Button, pressed: bool) {
        let slot = match button {
            Button::Start => &mut self.start,
            Button::Select => &mut self.select,
            Button::ThumbstickLeftPress => &mut self.thumb_left,
            Button::ThumbstickRightPress => &mut self.thumb_right,
            Button::A => &mut self.a,
            Button::B => &mut self.b,
            Button::X => &mut self.x,
            Button::Y => &mut self.y,
        };
        *slot = pressed;
    }

    /// Buttons currently held.
    pub fn pressed(&self) -> impl Iterator<Item = Button> + '_ {
        Button::ALL.into_iter().filter(|b| self.get(*b))
    }
}

/// A single input change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    /// A button changed state.
    Button { button: Button, pressed: bool },
    /// An axis moved. Not produced by the fixed report layout; reserved for
    /// layouts that define axis bytes.
    Axis { axis: u8, value: i16 },
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputEvent::Button { button, pressed } => write!(
                f,
                "{} {}",
                button.name(),
                if *pressed { "pressed" } else { "released" }
            ),
            InputEvent::Axis { axis, value } => write!(f, "axis{} {}", axis, value),
        }
    }
}

/// Last-known input state, used for edge-triggered reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSnapshot {
    pub buttons: Buttons,
    pub axes: BTreeMap<u8, i16>,
}
