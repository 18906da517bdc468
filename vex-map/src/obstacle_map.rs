//! Occupancy grid with one bit per cell

use crate::error::{Error, Result};

const WIDTH_PREFIX_SIZE: usize = 8;

/// Row-major occupancy grid; cell `(x, y)` is bit `y * width + x`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObstacleMap {
    width: usize,
    height: usize,
    bits: Vec<u8>,
}

impl ObstacleMap {
    /// Empty (all free) map
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 {
            return Err(Error::ZeroWidth);
        }
        Ok(Self {
            width,
            height,
            bits: vec![0; (width * height).div_ceil(8)],
        })
    }

    /// Parse the serialized form
    ///
    /// Height is however many whole rows the payload holds; trailing pad bits
    /// are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some((prefix, payload)) = bytes.split_first_chunk::<WIDTH_PREFIX_SIZE>() else {
            return Err(Error::Truncated(bytes.len()));
        };
        let width = u64::from_le_bytes(*prefix);
        if width == 0 {
            return Err(Error::ZeroWidth);
        }
        let width = usize::try_from(width).map_err(|_| Error::Truncated(bytes.len()))?;

        let height = payload.len() * 8 / width;
        let used = (width * height).div_ceil(8);
        log::debug!(
            "Loaded {}x{} obstacle map ({} payload bytes)",
            width,
            height,
            payload.len()
        );

        Ok(Self {
            width,
            height,
            bits: payload[..used].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(WIDTH_PREFIX_SIZE + self.bits.len());
        bytes.extend_from_slice(&(self.width as u64).to_le_bytes());
        bytes.extend_from_slice(&self.bits);
        bytes
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn locate(&self, x: usize, y: usize) -> Result<(usize, u8)> {
        if x >= self.width || y >= self.height {
            return Err(Error::OutOfBounds { x, y });
        }
        let index = y * self.width + x;
        Ok((index / 8, 0x80 >> (index % 8)))
    }

    pub fn get(&self, x: usize, y: usize) -> Result<bool> {
        let (byte, mask) = self.locate(x, y)?;
        Ok(self.bits[byte] & mask != 0)
    }

    pub fn set(&mut self, x: usize, y: usize, occupied: bool) -> Result<()> {
        let (byte, mask) = self.locate(x, y)?;
        if occupied {
            self.bits[byte] |= mask;
        } else {
            self.bits[byte] &= !mask;
        }
        Ok(())
    }

    pub fn occupied_count(&self) -> usize {
        (0..self.width * self.height)
            .filter(|&i| self.bits[i / 8] & (0x80 >> (i % 8)) != 0)
            .count()
    }
}
