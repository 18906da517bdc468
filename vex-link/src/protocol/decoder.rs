//! Streaming frame decoder
//!
//! Byte-at-a-time state machine. Bytes may arrive in any chunking; a frame is
//! emitted as soon as its last CRC byte is seen. Any corruption costs at most
//! the frame it lands in: after a CRC failure the decoder goes back to hunting
//! for `0xEB 0x90`.

use super::constants::*;
use super::crc::Crc16;
use super::frame::{Frame, FrameType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    HuntSync1,
    HuntSync2,
    FormatHi,
    FormatLo,
    FrameId,
    Payload,
    CrcHi,
    CrcLo,
}

/// Outcome of a completed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// CRC verified
    Frame(Frame),
    /// Well-framed but the payload CRC did not match; the payload is discarded
    CrcMismatch {
        frame_type: FrameType,
        frame_id: u8,
        expected: u16,
        actual: u16,
    },
}

/// Decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    pub frames: u64,
    pub crc_errors: u64,
    /// Bytes skipped while hunting for sync
    pub discarded_bytes: u64,
}

pub struct FrameDecoder {
    state: DecodeState,
    format: u16,
    frame_id: u8,
    data_length: usize,
    payload: Vec<u8>,
    running_crc: Crc16,
    crc: u16,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::HuntSync1,
            format: 0,
            frame_id: 0,
            data_length: 0,
            payload: Vec::with_capacity(256),
            running_crc: Crc16::new(),
            crc: 0,
            stats: DecoderStats::default(),
        }
    }

    /// Drop any partial frame and go back to hunting for sync
    pub fn reset(&mut self) {
        self.state = DecodeState::HuntSync1;
        self.format = 0;
        self.frame_id = 0;
        self.data_length = 0;
        self.payload.clear();
        self.running_crc = Crc16::new();
        self.crc = 0;
    }

    /// True when no partial frame is buffered
    pub fn is_idle(&self) -> bool {
        self.state == DecodeState::HuntSync1
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Feed a chunk of bytes, collecting every completed frame
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        bytes.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Feed one byte
    pub fn push(&mut self, byte: u8) -> Option<DecodeEvent> {
        match self.state {
            DecodeState::HuntSync1 => {
                if byte == SYNC_BYTE_1 {
                    self.state = DecodeState::HuntSync2;
                } else {
                    self.stats.discarded_bytes += 1;
                }
            }
            DecodeState::HuntSync2 => {
                if byte == SYNC_BYTE_2 {
                    self.state = DecodeState::FormatHi;
                } else if byte == SYNC_BYTE_1 {
                    // 0xEB 0xEB 0x90: the second 0xEB may start the real header
                    self.stats.discarded_bytes += 1;
                } else {
                    self.stats.discarded_bytes += 2;
                    self.state = DecodeState::HuntSync1;
                }
            }
            DecodeState::FormatHi => {
                self.format = (byte as u16) << 8;
                self.state = DecodeState::FormatLo;
            }
            DecodeState::FormatLo => {
                self.format |= byte as u16;
                self.data_length = (self.format & DATA_LENGTH_MASK) as usize;
                self.state = DecodeState::FrameId;
            }
            DecodeState::FrameId => {
                self.frame_id = byte;
                self.payload.clear();
                self.running_crc = Crc16::new();
                self.state = if self.data_length == 0 {
                    DecodeState::CrcHi
                } else {
                    DecodeState::Payload
                };
            }
            DecodeState::Payload => {
                self.payload.push(byte);
                self.running_crc.update(&[byte]);
                if self.payload.len() == self.data_length {
                    self.state = DecodeState::CrcHi;
                }
            }
            DecodeState::CrcHi => {
                self.crc = (byte as u16) << 8;
                self.state = DecodeState::CrcLo;
            }
            DecodeState::CrcLo => {
                self.crc |= byte as u16;
                let event = self.emit();
                self.reset();
                return Some(event);
            }
        }
        None
    }

    fn emit(&mut self) -> DecodeEvent {
        let frame_type = FrameType::from_nibble((self.format >> FRAME_TYPE_SHIFT) as u8);
        let actual = self.running_crc.value();
        if actual != self.crc {
            self.stats.crc_errors += 1;
            log::debug!(
                "CRC mismatch on {:?} frame {:#04x}: received={:#06x}, calculated={:#06x}",
                frame_type,
                self.frame_id,
                self.crc,
                actual
            );
            return DecodeEvent::CrcMismatch {
                frame_type,
                frame_id: self.frame_id,
                expected: self.crc,
                actual,
            };
        }

        self.stats.frames += 1;
        let payload = std::mem::replace(&mut self.payload, Vec::with_capacity(256));
        // data_length <= 0x0FFF and the nibble <= 0x0F, so this is always a valid frame
        DecodeEvent::Frame(Frame::from_wire(frame_type, self.frame_id, payload))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
