//! Error types for the VEX link

use crate::protocol::FrameType;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Link error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Payload does not fit the 12-bit length field
    #[error("Payload too large: {0} bytes (max 4095)")]
    PayloadTooLarge(usize),

    /// Frame type does not fit the 4-bit type field
    #[error("Invalid frame type: {0:#04x}")]
    InvalidFrameType(u8),

    /// Only DATA and COMMAND frames go through the outbound queue
    #[error("Frame type {0:?} cannot be queued for transmission")]
    NotOriginatable(FrameType),

    /// Operation needs the transmit token
    #[error("Transmit token not held")]
    TokenNotHeld,

    /// Stop-and-wait: a frame is still awaiting acknowledgement
    #[error("Frame {0:#04x} still awaiting acknowledgement")]
    FrameOutstanding(u8),

    /// Outbound queue is at capacity
    #[error("Outbound queue full ({0} frames)")]
    QueueFull(usize),

    /// No VEX user port attached
    #[error("VEX Robotics User Port not found")]
    DeviceNotFound,

    /// Link endpoint went away
    #[error("{0} disconnected")]
    Disconnected(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
