//! Serial transport implementation

use super::Transport;
use crate::error::Result;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Serial transport for the robot's USB user port (8N1, no flow control)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyACM1")
    /// * `baud_rate` - Baud rate (e.g., 115200)
    /// * `read_timeout` - Upper bound on a blocking read
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);
        Ok(SerialTransport { port })
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.port.set_baud_rate(baud_rate)?;
        log::info!("Serial baud rate set to {}", baud_rate);
        Ok(())
    }

    fn try_clone_box(&self) -> Result<Box<dyn Transport>> {
        let port = self.port.try_clone()?;
        Ok(Box::new(SerialTransport { port }))
    }
}
