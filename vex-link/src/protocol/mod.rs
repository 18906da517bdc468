//! Framed serial link protocol
//!
//! - `crc`: CRC-16/XModem table and update
//! - `frame`: frame model and encoder
//! - `decoder`: resynchronising streaming decoder

pub mod constants;
pub mod crc;
pub mod decoder;
pub mod frame;

pub use crc::{Crc16, crc_of, crc_update};
pub use decoder::{DecodeEvent, DecoderStats, FrameDecoder};
pub use frame::{CommandFunction, ConfigFunction, Frame, FrameType, encode};
