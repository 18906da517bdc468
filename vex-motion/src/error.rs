//! Error types for profile generation

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Input outside its valid range (non-positive rate or step, negative goal, NaN)
    #[error("Invalid argument {name} = {value}")]
    InvalidArgument { name: &'static str, value: f64 },
}
