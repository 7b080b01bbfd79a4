//! Transfer buffers: device-visible report memory plus its address token.
//!
//! The bus keeps its own reference to a mapped [`DmaRegion`] and writes into
//! it asynchronously, which the borrow checker cannot follow across the
//! completion boundary. The "no release while a transfer is outstanding"
//! rule is therefore checked at runtime through an in-flight flag.

use crate::bus::{DeviceAddress, DeviceHandle, InterruptBus};
use crate::consts::REPORT_LEN;
use crate::error::BusError;
use log::{debug, error, trace};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Report-sized memory shared between the driver and the bus.
#[derive(Debug)]
pub struct DmaRegion {
    bytes: Mutex<[u8; REPORT_LEN]>,
}

impl DmaRegion {
    pub fn new() -> Self {
        DmaRegion {
            bytes: Mutex::new([0u8; REPORT_LEN]),
        }
    }

    /// Device-side write. Stores up to [`REPORT_LEN`] bytes, zeroes the tail
    /// and returns how many bytes were stored.
    pub fn fill(&self, data: &[u8]) -> usize {
        let n = data.len().min(REPORT_LEN);
        let mut bytes = self.bytes.lock();
        bytes[..n].copy_from_slice(&data[..n]);
        bytes[n..].fill(0);
        n
    }

    /// Copies the current contents out.
    pub fn copy_out(&self) -> [u8; REPORT_LEN] {
        *self.bytes.lock()
    }
}

impl Default for DmaRegion {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct BufferShared {
    region: Arc<DmaRegion>,
    in_flight: AtomicBool,
}

/// The one transfer buffer of a device session.
///
/// Owned by the session. Obtain a [`BufferRef`] for the transfer engine and
/// give the buffer back with [`TransferBuffer::release`].
#[derive(Debug)]
pub struct TransferBuffer {
    shared: Arc<BufferShared>,
    address: DeviceAddress,
}

impl TransferBuffer {
    /// Allocates a region and maps it on the bus for `handle`.
    pub fn map(bus: &dyn InterruptBus, handle: DeviceHandle) -> Result<Self, BusError> {
        let region = Arc::new(DmaRegion::new());
        let address = bus.map_buffer(handle, Arc::clone(&region))?;
        debug!("Mapped transfer buffer for {} at {}", handle, address);
        Ok(TransferBuffer {
            shared: Arc::new(BufferShared {
                region,
                in_flight: AtomicBool::new(false),
            }),
            address,
        })
    }

    #[inline]
    pub fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Whether a transfer referencing this buffer is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Borrowed view handed to the transfer engine.
    pub(crate) fn borrow_ref(&self) -> BufferRef {
        BufferRef {
            shared: Arc::clone(&self.shared),
            address: self.address,
        }
    }

    /// Unmaps the buffer. Refuses, returning the buffer, while a transfer
    /// referencing it is still outstanding.
    pub fn release(self, bus: &dyn InterruptBus) -> std::result::Result<(), Self> {
        if self.is_in_flight() {
            error!(
                "Refusing to release transfer buffer {} with a transfer outstanding",
                self.address
            );
            return Err(self);
        }
        bus.unmap_buffer(self.address);
        trace!("Released transfer buffer {}", self.address);
        Ok(())
    }
}

/// The engine's borrowed reference to a [`TransferBuffer`].
#[derive(Debug, Clone)]
pub(crate) struct BufferRef {
    shared: Arc<BufferShared>,
    address: DeviceAddress,
}

impl BufferRef {
    #[inline]
    pub(crate) fn address(&self) -> DeviceAddress {
        self.address
    }

    /// Marks the buffer as referenced by an outstanding request.
    /// Returns `false` if it already was.
    pub(crate) fn begin_transfer(&self) -> bool {
        !self.shared.in_flight.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_transfer(&self) {
        self.shared.in_flight.store(false, Ordering::Release);
    }

    pub(crate) fn copy_out(&self) -> [u8; REPORT_LEN] {
        self.shared.region.copy_out()
    }
}
