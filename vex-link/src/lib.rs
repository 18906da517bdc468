//! Framed serial link to the VEX robot controller
//!
//! - [`protocol`]: CRC-16/XModem, frame model, streaming decoder
//! - [`session`]: half-duplex token protocol (stop-and-wait, retransmission)
//! - [`transport`]: serial port, mock line and USB discovery
//! - [`relay`]: serial <-> TCP bridge used by the `vex-bridge` daemon

pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{Error, Result};
pub use protocol::{DecodeEvent, Frame, FrameDecoder, FrameType};
pub use relay::{Bridge, BridgeHandle, LinkFlags, TransportOpener};
pub use session::{LinkState, Session, SessionAction, SessionConfig, SessionEvent};
pub use transport::{MockTransport, SerialTransport, Transport};
