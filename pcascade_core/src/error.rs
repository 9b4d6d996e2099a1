//! The single error type for the precision cascade core.

use thiserror::Error;

/// Everything that can go wrong while building, reading, or indexing a cascade.
///
/// All variants are recoverable and returned to the immediate caller. A request
/// that cannot be met at the requested precision always surfaces as an error,
/// never as a quietly degraded result.
#[derive(Error, Debug)]
pub enum CascadeError {
    // --- Source / target validation ---
    #[error("source of {0} bytes exceeds the 0xFFFFFF byte cascade limit")]
    OversizedSource(usize),

    #[error("target buffer {index} needs {needed} bytes but only has capacity {capacity}")]
    CapacityExceeded {
        index: usize,
        needed: usize,
        capacity: usize,
    },

    #[error("target buffer {0} declares a zero capacity")]
    InvalidCapacity(usize),

    #[error("expected {expected} target capacities for this cascade, got {actual}")]
    TargetCountMismatch { expected: usize, actual: usize },

    // --- Datatype dispatch ---
    #[error("element type tag {0} is not a supported fixed-width numeric type")]
    UnsupportedType(i32),

    #[error("buffer of {len} bytes is not a multiple of the {element_size}-byte element size")]
    MisalignedBuffer { len: usize, element_size: usize },

    #[error("caller asked for datatype {requested} but the cascade was written as {recorded}")]
    DatatypeMismatch { requested: u8, recorded: u8 },

    // --- Levels ---
    #[error("invalid cascade level {level}: {reason}")]
    InvalidLevel { level: i32, reason: &'static str },

    // --- Header ---
    #[error("header field {field} value {value:#x} does not fit in 24 bits")]
    HeaderFieldOverflow { field: &'static str, value: usize },

    #[error("unknown buffer signature {0:02x?}")]
    BadSignature([u8; 2]),

    #[error("header needs {needed} bytes, buffer has {actual}")]
    TruncatedHeader { needed: usize, actual: usize },

    #[error("format version {0} buffers can be inspected but not decoded")]
    UndecodableFormat(u8),

    #[error("corrupt compressed buffer: {0}")]
    CorruptBuffer(String),

    // --- Cascade buffer-count rules ---
    #[error("{supplied} buffers supplied but the cascade only produced {produced}")]
    TooManyBuffers { supplied: usize, produced: usize },

    #[error("{supplied} of {produced} cascade buffers supplied and the omitted ones are not an optional residual")]
    InsufficientPrecision { supplied: usize, produced: usize },

    #[error("inconsistent cascade: {0}")]
    InconsistentCascade(String),

    // --- Index / catalog ---
    #[error("block {block} is unknown to cascade index {column}")]
    UnknownBlock { column: String, block: usize },

    #[error("corrupt block record for block {block}: {reason}")]
    CorruptBlock { block: usize, reason: String },

    #[error("cascade index {0} has no storage attached")]
    StoreDetached(String),

    #[error("catalog entry {name} belongs to dataset id {recorded_id} level {recorded_level}, expected id {expected_id} level {expected_level}")]
    IdentityMismatch {
        name: String,
        recorded_id: u32,
        recorded_level: u32,
        expected_id: u32,
        expected_level: u32,
    },

    #[error("catalog has no entry named {0}")]
    MissingEntry(String),

    // --- Configuration ---
    #[error("compression algorithm {0} does not support precision cascades")]
    UnsupportedAlgorithm(String),

    // --- Wrapped errors ---
    #[error("codec failure: {0}")]
    Codec(#[source] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CascadeError>;

impl From<anyhow::Error> for CascadeError {
    fn from(err: anyhow::Error) -> Self {
        CascadeError::Codec(err)
    }
}
