//! Wire constants for the framed serial link

// Sync bytes
pub const SYNC_BYTE_1: u8 = 0xEB;
pub const SYNC_BYTE_2: u8 = 0x90;

// Frame types (high nibble of the format word)
pub const TYPE_CONFIGURATION: u8 = 0x1;
pub const TYPE_COMMAND: u8 = 0x2;
pub const TYPE_DATA: u8 = 0x3;
pub const TYPE_ACK: u8 = 0x8;
pub const TYPE_NACK: u8 = 0x9;
pub const TYPE_ERROR: u8 = 0xA;

// Configuration functions (first payload byte)
pub const CFG_SET_BAUD_RATE: u8 = 0x1;
pub const CFG_SET_ACK_TIMEOUT: u8 = 0x2;
pub const CFG_TRANSMIT_TOKEN: u8 = 0x3;

// Command functions (first payload byte)
pub const CMD_QUERY_FILE: u8 = 0x1;
pub const CMD_QUERY_FILE_CRC: u8 = 0x2;
pub const CMD_RECEIVE_FILE: u8 = 0x3;
pub const CMD_TRANSMIT_FILE: u8 = 0x4;

// Reason bytes carried by NACK and ERROR frames
pub const REASON_CRC_MISMATCH: u8 = 0x01;
pub const REASON_NACK_EXHAUSTED: u8 = 0x02;
pub const REASON_ACK_TIMEOUT: u8 = 0x03;
pub const REASON_MALFORMED: u8 = 0x04;
pub const REASON_REFUSED: u8 = 0x05;

// Format word layout
pub const FRAME_TYPE_SHIFT: u16 = 12;
pub const DATA_LENGTH_MASK: u16 = 0x0FFF;

// Frame sizes
pub const HEADER_SIZE: usize = 5; // SYNC(2) + FORMAT(2) + ID(1)
pub const CRC_SIZE: usize = 2;
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CRC_SIZE;
pub const MAX_PAYLOAD_SIZE: usize = DATA_LENGTH_MASK as usize;

// Link defaults
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 500;
