//! Transport layer for I/O abstraction
//!
//! The relay talks to the robot through a [`Transport`]: a real serial port in
//! production, an in-memory [`MockTransport`] in tests.

use crate::error::Result;

mod discovery;
mod mock;
mod serial;

pub use discovery::{
    PortCandidate, USER_PORT_DESCRIPTION, VEX_USB_PID, VEX_USB_VID, discover_user_port,
    find_user_port,
};
pub use mock::MockTransport;
pub use serial::SerialTransport;

/// Byte-stream link to the robot
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read (0 on read timeout)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Check if data is available to read
    fn available(&mut self) -> Result<usize> {
        Ok(0)
    }

    /// Discard buffered input and output
    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reconfigure the line rate
    fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
        Ok(())
    }

    /// Second handle on the same link, used as the independent write half
    fn try_clone_box(&self) -> Result<Box<dyn Transport>>;

    /// Write a whole buffer and flush it
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let written = self.write(data)?;
            if written == 0 {
                return Err(crate::error::Error::Disconnected("serial write"));
            }
            data = &data[written..];
        }
        self.flush()
    }
}
