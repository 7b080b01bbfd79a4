//! The host-bus side of the driver: handles, descriptors, completion
//! statuses and the interrupt-transfer primitive consumed by the engine.

use crate::buffer::DmaRegion;
use crate::consts::{endpoint, errno};
use crate::error::BusError;
use std::fmt;
use std::sync::Arc;

/// Opaque handle the bus uses to name an attached device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// A bus-side request object (one per session).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Device-visible address of a mapped transfer buffer.
///
/// Only meaningful while the buffer stays mapped; the bus resolves it back
/// to the region it writes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(pub u64);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// One endpoint of an interface, as reported at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress (bit 7 = IN).
    pub address: u8,
    /// bmAttributes (bits 0..1 = transfer type).
    pub attributes: u8,
    pub max_packet_size: u16,
    /// bInterval, in milliseconds for full-speed interrupt endpoints.
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Builds an interrupt IN endpoint descriptor.
    pub fn interrupt_in(number: u8, max_packet_size: u16, interval: u8) -> Self {
        EndpointDescriptor {
            address: endpoint::DIR_IN | (number & 0x0F),
            attributes: endpoint::XFER_INTERRUPT,
            max_packet_size,
            interval,
        }
    }

    #[inline]
    pub fn is_in(&self) -> bool {
        self.address & endpoint::DIR_IN != 0
    }

    #[inline]
    pub fn is_interrupt(&self) -> bool {
        self.attributes & endpoint::XFER_TYPE_MASK == endpoint::XFER_INTERRUPT
    }
}

/// The interface a device exposes on attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointDescriptor>,
}

impl InterfaceDescriptor {
    /// Iterates the inbound interrupt endpoints of this interface.
    pub fn interrupt_in_endpoints(&self) -> impl Iterator<Item = &EndpointDescriptor> + '_ {
        self.endpoints
            .iter()
            .filter(|ep| ep.is_in() && ep.is_interrupt())
    }
}

/// Completion status of an interrupt transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    /// The request was unlinked (the status a cancelled request completes with).
    ConnectionReset,
    /// The device disappeared.
    NoSuchDevice,
    /// The endpoint was shut down.
    EndpointShutdown,
    /// Any other failure, as a negative errno.
    Other(i32),
}

impl TransferStatus {
    /// Maps an errno-style status code (0 or negative errno).
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => TransferStatus::Ok,
            c if c == -errno::ECONNRESET => TransferStatus::ConnectionReset,
            c if c == -errno::ENODEV => TransferStatus::NoSuchDevice,
            c if c == -errno::ESHUTDOWN => TransferStatus::EndpointShutdown,
            c => TransferStatus::Other(c),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            TransferStatus::Ok => 0,
            TransferStatus::ConnectionReset => -errno::ECONNRESET,
            TransferStatus::NoSuchDevice => -errno::ENODEV,
            TransferStatus::EndpointShutdown => -errno::ESHUTDOWN,
            TransferStatus::Other(c) => *c,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Ok => write!(f, "ok"),
            TransferStatus::ConnectionReset => write!(f, "connection reset"),
            TransferStatus::NoSuchDevice => write!(f, "no such device"),
            TransferStatus::EndpointShutdown => write!(f, "endpoint shutdown"),
            TransferStatus::Other(c) => write!(f, "error {}", c),
        }
    }
}

/// What the bus reports when a request finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub status: TransferStatus,
    /// Bytes written into the mapped buffer.
    pub actual_length: usize,
}

/// Capability the bus invokes once per submitted request.
pub type CompletionHandler = Arc<dyn Fn(Completion) + Send + Sync>;

/// An interrupt-in request as handed to the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptIn {
    pub endpoint: u8,
    pub buffer: DeviceAddress,
    pub length: usize,
    pub interval: u8,
}

/// The interrupt-transfer primitive offered by a host bus stack.
///
/// Completions arrive on a context the bus controls. Implementations must
/// never call a [`CompletionHandler`] from inside `submit_in` or `cancel`:
/// the engine holds its per-session lock across both calls.
pub trait InterruptBus: Send + Sync {
    /// Allocates a request object for `handle`.
    fn alloc_request(&self, handle: DeviceHandle) -> Result<RequestId, BusError>;

    /// Frees a request object. The request must not be outstanding.
    fn free_request(&self, request: RequestId);

    /// Registers `region` as device-visible memory and returns its address token.
    fn map_buffer(
        &self,
        handle: DeviceHandle,
        region: Arc<DmaRegion>,
    ) -> Result<DeviceAddress, BusError>;

    /// Drops the bus's view of a mapped region.
    fn unmap_buffer(&self, address: DeviceAddress);

    /// Queues an interrupt-in transfer. `on_complete` runs exactly once if this returns `Ok`.
    fn submit_in(
        &self,
        request: RequestId,
        transfer: InterruptIn,
        on_complete: CompletionHandler,
    ) -> Result<(), BusError>;

    /// Asks the bus to abort the outstanding request. Returns immediately;
    /// the abort is observed through the request's completion.
    fn cancel(&self, request: RequestId);

    /// Physical path of the device, if the bus knows one.
    fn device_path(&self, _handle: DeviceHandle) -> Option<String> {
        None
    }
}
