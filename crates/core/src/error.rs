use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("field kind mismatch: expected {expected}, got {actual}")]
    FieldKindMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("splice out of range: index {index}, remove {remove}, length {len}")]
    SpliceOutOfRange {
        index: usize,
        remove: usize,
        len: usize,
    },

    #[error("cannot merge transactions from different stores: {first} and {second}")]
    StoreMismatch { first: u32, second: u32 },
}
