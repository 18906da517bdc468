//! Bit-packed obstacle map shared with the path planner
//!
//! Serialized form: 8-byte little-endian width, then the occupancy grid
//! row-major with one bit per cell, MSB first within each byte.

pub mod error;
pub mod obstacle_map;

pub use error::{Error, Result};
pub use obstacle_map::ObstacleMap;
