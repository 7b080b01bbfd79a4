//! Fixed-capacity echo device and an [`EventSink`] that writes into it.

use crate::consts::ECHO_CAPACITY;
use crate::error::EchoError;
use crate::event::InputEvent;
use crate::session::{EventSink, SessionId};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A byte buffer of [`ECHO_CAPACITY`] bytes: writes append, reads drain in order.
#[derive(Debug)]
pub struct EchoDevice {
    data: VecDeque<u8>,
}

impl EchoDevice {
    pub fn new() -> Self {
        EchoDevice {
            data: VecDeque::with_capacity(ECHO_CAPACITY),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Free space left.
    pub fn remaining(&self) -> usize {
        ECHO_CAPACITY - self.data.len()
    }

    /// Appends as much of `bytes` as fits and returns how much was stored.
    /// Fails only when the buffer is already full.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, EchoError> {
        let room = self.remaining();
        if room == 0 {
            debug!("Echo write of {} bytes refused: buffer full", bytes.len());
            return Err(EchoError::NoSpace {
                capacity: ECHO_CAPACITY,
            });
        }
        let n = bytes.len().min(room);
        self.data.extend(&bytes[..n]);
        trace!("Echo wrote {} of {} bytes", n, bytes.len());
        Ok(n)
    }

    /// Moves up to `buf.len()` bytes out, oldest first. Returns 0 when empty.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len());
        for (dst, src) in buf.iter_mut().zip(self.data.drain(..n)) {
            *dst = src;
        }
        trace!("Echo read {} bytes", n);
        n
    }
}

impl Default for EchoDevice {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes one `"<session>: <event>"` line per event into an [`EchoDevice`].
///
/// Lines that do not fit are truncated; once the device is full further
/// events are dropped until a reader drains it.
#[derive(Debug, Default)]
pub struct EchoSink {
    device: Mutex<EchoDevice>,
}

impl EchoSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything currently buffered.
    pub fn drain(&self) -> Vec<u8> {
        let mut device = self.device.lock();
        let mut out = vec![0u8; device.len()];
        let n = device.read(&mut out);
        out.truncate(n);
        out
    }
}

impl EventSink for EchoSink {
    fn report(&self, session: SessionId, events: &[InputEvent]) {
        let mut device = self.device.lock();
        for event in events {
            let line = format!("{}: {}\n", session, event);
            if let Err(e) = device.write(line.as_bytes()) {
                debug!("{}: event dropped: {}", session, e);
                return;
            }
        }
    }
}
