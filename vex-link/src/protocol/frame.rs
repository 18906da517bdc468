//! Frame model and encoder
//!
//! Wire layout (all multi-byte fields big-endian):
//!
//! ```text
//! ┌──────┬──────┬────────────────────┬──────────┬───────────────┬────────┐
//! │ 0xEB │ 0x90 │ TYPE(4) | LEN(12)  │ FRAME_ID │ PAYLOAD (LEN) │ CRC16  │
//! └──────┴──────┴────────────────────┴──────────┴───────────────┴────────┘
//! ```
//!
//! The CRC covers the payload only.

use super::constants::*;
use super::crc::crc_of;
use crate::error::{Error, Result};

/// Frame type carried in the high nibble of the format word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Configuration,
    Command,
    Data,
    Ack,
    Nack,
    Error,
    /// Nibble with no assigned meaning; kept so the codec is lossless
    Reserved(u8),
}

impl FrameType {
    /// Map a 4-bit value to a frame type (upper bits are ignored)
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            TYPE_CONFIGURATION => FrameType::Configuration,
            TYPE_COMMAND => FrameType::Command,
            TYPE_DATA => FrameType::Data,
            TYPE_ACK => FrameType::Ack,
            TYPE_NACK => FrameType::Nack,
            TYPE_ERROR => FrameType::Error,
            other => FrameType::Reserved(other),
        }
    }

    pub fn nibble(self) -> u8 {
        match self {
            FrameType::Configuration => TYPE_CONFIGURATION,
            FrameType::Command => TYPE_COMMAND,
            FrameType::Data => TYPE_DATA,
            FrameType::Ack => TYPE_ACK,
            FrameType::Nack => TYPE_NACK,
            FrameType::Error => TYPE_ERROR,
            FrameType::Reserved(n) => n,
        }
    }

    /// DATA and COMMAND are acknowledged; everything else is control traffic
    pub fn requires_ack(self) -> bool {
        matches!(self, FrameType::Data | FrameType::Command)
    }
}

/// CONFIGURATION function byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFunction {
    SetBaudRate,
    SetAckTimeout,
    TransmitToken,
}

impl TryFrom<u8> for ConfigFunction {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            CFG_SET_BAUD_RATE => Ok(ConfigFunction::SetBaudRate),
            CFG_SET_ACK_TIMEOUT => Ok(ConfigFunction::SetAckTimeout),
            CFG_TRANSMIT_TOKEN => Ok(ConfigFunction::TransmitToken),
            other => Err(other),
        }
    }
}

impl From<ConfigFunction> for u8 {
    fn from(function: ConfigFunction) -> u8 {
        match function {
            ConfigFunction::SetBaudRate => CFG_SET_BAUD_RATE,
            ConfigFunction::SetAckTimeout => CFG_SET_ACK_TIMEOUT,
            ConfigFunction::TransmitToken => CFG_TRANSMIT_TOKEN,
        }
    }
}

/// COMMAND function byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFunction {
    QueryFile,
    QueryFileCrc,
    ReceiveFile,
    TransmitFile,
}

impl TryFrom<u8> for CommandFunction {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            CMD_QUERY_FILE => Ok(CommandFunction::QueryFile),
            CMD_QUERY_FILE_CRC => Ok(CommandFunction::QueryFileCrc),
            CMD_RECEIVE_FILE => Ok(CommandFunction::ReceiveFile),
            CMD_TRANSMIT_FILE => Ok(CommandFunction::TransmitFile),
            other => Err(other),
        }
    }
}

impl From<CommandFunction> for u8 {
    fn from(function: CommandFunction) -> u8 {
        match function {
            CommandFunction::QueryFile => CMD_QUERY_FILE,
            CommandFunction::QueryFileCrc => CMD_QUERY_FILE_CRC,
            CommandFunction::ReceiveFile => CMD_RECEIVE_FILE,
            CommandFunction::TransmitFile => CMD_TRANSMIT_FILE,
        }
    }
}

/// A decoded or to-be-encoded frame
///
/// The payload length is validated on construction, so encoding cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    frame_type: FrameType,
    frame_id: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame, rejecting payloads over 4095 bytes
    ///
    /// `Reserved(n)` must name an unassigned nibble, so every frame has one
    /// canonical type and survives a round trip unchanged.
    pub fn new(frame_type: FrameType, frame_id: u8, payload: impl Into<Vec<u8>>) -> Result<Self> {
        if let FrameType::Reserved(n) = frame_type
            && (n > 0x0F || FrameType::from_nibble(n) != frame_type)
        {
            return Err(Error::InvalidFrameType(n));
        }
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(payload.len()));
        }
        Ok(Self {
            frame_type,
            frame_id,
            payload,
        })
    }

    /// Frame assembled by the decoder; type and length already fit their fields
    pub(crate) fn from_wire(frame_type: FrameType, frame_id: u8, payload: Vec<u8>) -> Self {
        Self::control(frame_type, frame_id, payload)
    }

    /// Constructor for payloads whose length is known to fit
    fn control(frame_type: FrameType, frame_id: u8, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD_SIZE);
        Self {
            frame_type,
            frame_id,
            payload,
        }
    }

    pub fn data(frame_id: u8, payload: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new(FrameType::Data, frame_id, payload)
    }

    pub fn command(frame_id: u8, function: CommandFunction, args: &[u8]) -> Result<Self> {
        let mut payload = Vec::with_capacity(1 + args.len());
        payload.push(function.into());
        payload.extend_from_slice(args);
        Self::new(FrameType::Command, frame_id, payload)
    }

    /// ACK echoing `acked_id`; the frame carries the same id
    pub fn ack(acked_id: u8) -> Self {
        Self::control(FrameType::Ack, acked_id, vec![acked_id])
    }

    /// NACK echoing `nacked_id` with a reason byte
    pub fn nack(nacked_id: u8, reason: u8) -> Self {
        Self::control(FrameType::Nack, nacked_id, vec![nacked_id, reason])
    }

    /// ERROR frame: reason byte followed by optional context
    pub fn error(frame_id: u8, reason: u8, context: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(1 + context.len().min(MAX_PAYLOAD_SIZE - 1));
        payload.push(reason);
        payload.extend_from_slice(&context[..context.len().min(MAX_PAYLOAD_SIZE - 1)]);
        Self::control(FrameType::Error, frame_id, payload)
    }

    pub fn configuration(frame_id: u8, function: ConfigFunction, args: &[u8]) -> Result<Self> {
        let mut payload = Vec::with_capacity(1 + args.len());
        payload.push(function.into());
        payload.extend_from_slice(args);
        Self::new(FrameType::Configuration, frame_id, payload)
    }

    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    #[inline]
    pub fn frame_id(&self) -> u8 {
        self.frame_id
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Same frame under a different id (used when re-sequencing onto another leg)
    pub fn with_id(mut self, frame_id: u8) -> Self {
        self.frame_id = frame_id;
        self
    }

    /// Format word: type in the high nibble, payload length in the low 12 bits
    #[inline]
    pub fn format_word(&self) -> u16 {
        ((self.frame_type.nibble() as u16 & 0x0F) << FRAME_TYPE_SHIFT)
            | (self.payload.len() as u16 & DATA_LENGTH_MASK)
    }

    /// Total bytes on the wire
    #[inline]
    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_SIZE + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buffer);
        buffer
    }

    /// Append the wire bytes to `buffer` (reusable across frames)
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.reserve(self.encoded_len());
        buffer.push(SYNC_BYTE_1);
        buffer.push(SYNC_BYTE_2);
        buffer.extend_from_slice(&self.format_word().to_be_bytes());
        buffer.push(self.frame_id);
        buffer.extend_from_slice(&self.payload);
        buffer.extend_from_slice(&crc_of(&self.payload).to_be_bytes());
    }

    pub fn config_function(&self) -> Option<ConfigFunction> {
        if self.frame_type != FrameType::Configuration {
            return None;
        }
        self.payload
            .first()
            .and_then(|&b| ConfigFunction::try_from(b).ok())
    }

    pub fn command_function(&self) -> Option<CommandFunction> {
        if self.frame_type != FrameType::Command {
            return None;
        }
        self.payload
            .first()
            .and_then(|&b| CommandFunction::try_from(b).ok())
    }

    /// Bytes following the function byte of a CONFIGURATION or COMMAND frame
    pub fn function_args(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or(&[])
    }

    /// The 4-byte big-endian argument of SET_BAUD_RATE / SET_ACK_TIMEOUT
    pub fn config_value(&self) -> Option<u32> {
        let args: [u8; 4] = self.function_args().get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(args))
    }

    /// Echoed id of an ACK or NACK
    pub fn acknowledged_id(&self) -> Option<u8> {
        match self.frame_type {
            FrameType::Ack | FrameType::Nack => self.payload.first().copied(),
            _ => None,
        }
    }

    pub fn nack_reason(&self) -> Option<u8> {
        match self.frame_type {
            FrameType::Nack => self.payload.get(1).copied(),
            _ => None,
        }
    }

    /// Reason byte of an ERROR frame
    pub fn error_reason(&self) -> Option<u8> {
        match self.frame_type {
            FrameType::Error => self.payload.first().copied(),
            _ => None,
        }
    }
}

/// Encode raw fields without building a [`Frame`] first
///
/// Errors when `frame_type` does not fit 4 bits or the payload exceeds 4095 bytes.
pub fn encode(frame_type: u8, frame_id: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if frame_type > 0x0F {
        return Err(Error::InvalidFrameType(frame_type));
    }
    let frame = Frame::new(FrameType::from_nibble(frame_type), frame_id, payload)?;
    Ok(frame.encode())
}
