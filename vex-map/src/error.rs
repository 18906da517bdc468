//! Error types for obstacle maps

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Serialized map shorter than its 8-byte width prefix
    #[error("Map truncated: {0} bytes, need at least 8")]
    Truncated(usize),

    #[error("Map width is zero")]
    ZeroWidth,

    #[error("Cell ({x}, {y}) outside the map")]
    OutOfBounds { x: usize, y: usize },
}
