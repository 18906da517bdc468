//! Mock transport for testing

use super::Transport;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// In-memory serial line
///
/// Clones share the same buffers, so a test keeps one handle while the relay
/// owns another. An empty read sleeps briefly to stand in for a serial read
/// timeout.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    disconnected: bool,
    baud_rate: Option<u32>,
    clears: usize,
}

const EMPTY_READ_DELAY: Duration = Duration::from_millis(2);

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                read_buffer: VecDeque::new(),
                write_buffer: Vec::new(),
                disconnected: false,
                baud_rate: None,
                clears: 0,
            })),
        }
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Drain everything written so far
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().write_buffer)
    }

    /// Make every subsequent read and write fail (cable pulled)
    pub fn set_disconnected(&self, disconnected: bool) {
        self.inner.lock().disconnected = disconnected;
    }

    /// Last baud rate applied through [`Transport::set_baud_rate`]
    pub fn baud_rate(&self) -> Option<u32> {
        self.inner.lock().baud_rate
    }

    /// Number of [`Transport::clear_buffers`] calls
    pub fn clear_count(&self) -> usize {
        self.inner.lock().clears
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let available = {
            let mut inner = self.inner.lock();
            if inner.disconnected {
                return Err(Error::Disconnected("mock serial"));
            }
            let available = inner.read_buffer.len().min(buffer.len());
            for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
                *slot = byte;
            }
            available
        };
        if available == 0 {
            thread::sleep(EMPTY_READ_DELAY);
        }
        Ok(available)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(Error::Disconnected("mock serial"));
        }
        inner.write_buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.inner.lock().read_buffer.len())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.read_buffer.clear();
        inner.clears += 1;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.inner.lock().baud_rate = Some(baud_rate);
        Ok(())
    }

    fn try_clone_box(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
