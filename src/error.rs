use crate::bus::DeviceHandle;
use thiserror::Error;

/// Errors reported by an [`InterruptBus`](crate::bus::InterruptBus) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus could not allocate a request object or map a buffer.
    #[error("Bus resources exhausted: {0}")]
    OutOfResources(String),
    /// The device behind the handle is gone (unplugged or closed).
    #[error("No such device: {0}")]
    NoDevice(DeviceHandle),
    /// The bus refused to queue the request.
    #[error("Request rejected by bus: {0}")]
    Rejected(String),
}

/// Reasons a device could not be claimed on attach.
///
/// Every variant leaves the device unclaimed with no session registered and
/// no bus resource held.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// No compatibility entry matched the device identity.
    #[error(
        "Device {vendor_id:04X}:{product_id:04X} (protocol {protocol_variant}) is not supported"
    )]
    NotSupported {
        vendor_id: u16,
        product_id: u16,
        protocol_variant: u8,
    },
    /// The interface does not expose exactly one inbound interrupt endpoint.
    #[error("Unsupported interface topology: expected 1 interrupt IN endpoint, found {found}")]
    UnsupportedTopology {
        /// Number of inbound interrupt endpoints found on the interface.
        found: usize,
    },
    /// A request object, buffer, worker or session slot could not be allocated.
    #[error("Resources exhausted while constructing the device session")]
    ResourceExhausted,
    /// A session already exists for this handle.
    #[error("Device {0} is already claimed")]
    AlreadyClaimed(DeviceHandle),
    /// The first transfer could not be queued.
    #[error("Initial transfer submission failed: {0}")]
    SubmitFailed(TransferError),
    /// Decoder configuration cannot be honoured.
    #[error("Decoder configuration rejected: {0}")]
    Decoder(#[from] DecodeError),
}

/// Errors reported by [`DeviceRegistry::on_detach`](crate::registry::DeviceRegistry::on_detach).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetachError {
    /// Detach for a handle that was never attached. Indicates a broken bus contract.
    #[error("Detach for unknown device {0}")]
    UnknownDevice(DeviceHandle),
    /// The outstanding transfer never reported cancellation; its buffer was leaked.
    #[error("Transfer cancellation timed out for device {0}; buffer quarantined")]
    CancelTimeout(DeviceHandle),
}

/// Errors reported by the [`TransferEngine`](crate::transfer::TransferEngine).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// The bus refused the interrupt-in request.
    #[error("Interrupt transfer rejected by bus")]
    QueueRejected,
    /// A transient completion was retried once and the retry was rejected.
    #[error("Retry after transient transfer error was rejected")]
    RetryFailed,
    /// A request is already outstanding for this session.
    #[error("A transfer is already outstanding")]
    Busy,
    /// The engine has been cancelled and cannot submit again.
    #[error("Transfer engine is cancelled")]
    Terminated,
    /// Cancellation was not observed within the configured bound.
    #[error("Timed out waiting for transfer cancellation")]
    CancelTimeout,
}

/// Errors reported by the [`PacketDecoder`](crate::decoder::PacketDecoder).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Axis bytes are not interpreted for this report layout.
    #[error("Axis layout is unspecified for this report format")]
    AxisLayoutUnspecified,
}

/// Errors reported by the [`EchoDevice`](crate::echo::EchoDevice).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoError {
    /// The echo buffer is already full.
    #[error("Echo buffer full ({capacity} bytes)")]
    NoSpace { capacity: usize },
}

/// Crate-wide error type.
///
/// Wraps the per-component error families so callers that do not care which
/// layer failed can use a single `?`.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the underlying HID API layer.
    #[error("HID API error: {0}")]
    Hid(#[from] hidapi::HidError),
    /// General I/O error (configuration files, thread spawning).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed configuration file.
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
    /// The compatibility table violates its uniqueness rule.
    #[error("Invalid compatibility table: {0}")]
    InvalidTable(String),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    Detach(#[from] DetachError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Echo(#[from] EchoError),
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;
