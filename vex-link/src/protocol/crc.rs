//! CRC-16/CCITT (XModem): polynomial 0x1021, preset 0, MSB-first, no final XOR
//!
//! The lookup table is built at compile time so the per-byte update is a
//! single shift, XOR and table load.

const CRC_POLY: u16 = 0x1021;

/// Byte-indexed lookup table derived from [`CRC_POLY`]
pub static CRC_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut byte = 0;
    while byte < 256 {
        let mut value = (byte as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 0x8000 != 0 {
                (value << 1) ^ CRC_POLY
            } else {
                value << 1
            };
            bit += 1;
        }
        table[byte] = value;
        byte += 1;
    }
    table
}

/// Advance the CRC register by one byte
#[inline]
pub fn crc_update(state: u16, byte: u8) -> u16 {
    let index = (state >> 8) ^ byte as u16;
    (state << 8) ^ CRC_TABLE[index as usize]
}

/// CRC of a complete byte sequence
#[inline]
pub fn crc_of(data: &[u8]) -> u16 {
    data.iter().fold(0, |state, &byte| crc_update(state, byte))
}

/// Running CRC for data that arrives in pieces
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.value = crc_update(self.value, byte);
        }
    }

    pub fn value(&self) -> u16 {
        self.value
    }
}
