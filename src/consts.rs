//! Internal constants: device IDs, report layout, endpoint bits and defaults.

// Default Vendor/Product IDs
/// Microsoft vendor ID. RedGear pads speak the Xbox 360 wire protocol and enumerate under it.
pub const MICROSOFT_VID: u16 = 0x045E;
/// Product ID reported by both wired and wireless RedGear gamepads.
pub const REDGEAR_PID: u16 = 0x028E;

/// Vendor-specific USB interface class (0xFF).
pub const USB_CLASS_VENDOR_SPEC: u8 = 0xFF;
/// Interface subclass of the gamepad input interface.
pub const GAMEPAD_SUBCLASS: u8 = 93;

/// Interface protocol of wired controllers.
pub const PROTOCOL_WIRED: u8 = 1;
/// Interface protocol of wireless controllers.
pub const PROTOCOL_WIRELESS: u8 = 129;

/// Length in bytes of one raw input report (and of every transfer buffer).
pub const REPORT_LEN: usize = 64;

// Driver defaults
pub(crate) const DEFAULT_CANCEL_TIMEOUT_MS: u64 = 1000;
pub(crate) const DEFAULT_QUEUE_DEPTH: usize = 32;
pub(crate) const DEFAULT_MAX_SESSIONS: usize = 8;
/// Detached handles remembered for repeated-detach tolerance.
pub(crate) const DEFAULT_RETIRED_CAPACITY: usize = 256;

// --- Input Report Layout ---
pub mod report {
    /// Byte 0 tags the frame format. Only 0x00 frames carry button state.
    pub const TAG_OFFSET: usize = 0;
    pub const TAG_STANDARD: u8 = 0x00;
    /// Frames shorter than this cannot carry both button bytes.
    pub const MIN_STANDARD_LEN: usize = 4;

    pub const SYSTEM_BUTTONS_OFFSET: usize = 2;
    pub const FACE_BUTTONS_OFFSET: usize = 3;

    // Byte 2, bits 4..7
    pub mod system {
        pub const START: u8 = 1 << 4;
        pub const SELECT: u8 = 1 << 5;
        pub const THUMB_LEFT: u8 = 1 << 6;
        pub const THUMB_RIGHT: u8 = 1 << 7;
    }

    // Byte 3, bits 4..7
    pub mod face {
        pub const A: u8 = 1 << 4;
        pub const B: u8 = 1 << 5;
        pub const X: u8 = 1 << 6;
        pub const Y: u8 = 1 << 7;
    }
}

// --- Endpoint Descriptor Bits ---
pub mod endpoint {
    /// bEndpointAddress direction bit (set = device-to-host).
    pub const DIR_IN: u8 = 0x80;
    /// bmAttributes transfer type field.
    pub const XFER_TYPE_MASK: u8 = 0x03;
    pub const XFER_INTERRUPT: u8 = 0x03;

    /// Input endpoint used by the pads (EP1 IN, 32 byte packets, 4 ms interval).
    pub const PAD_IN_ADDRESS: u8 = 0x81;
    pub const PAD_IN_MAX_PACKET: u16 = 32;
    pub const PAD_IN_INTERVAL: u8 = 4;
}

// --- Completion Status Codes (errno values, reported negated) ---
pub mod errno {
    pub const ENODEV: i32 = 19;
    pub const ECONNRESET: i32 = 104;
    pub const ESHUTDOWN: i32 = 108;
}

/// Capacity of the echo character device.
pub const ECHO_CAPACITY: usize = 100;
