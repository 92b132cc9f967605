//! Error types for the controller link.
//!
//! Every fallible operation returns [`Result<T>`]. None of these errors is
//! fatal: connection failures drop the session into simulation mode, decode
//! failures skip a single poll tick.

/// Why a telemetry packet (or a command string) was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeFailure {
    /// The buffer contained bytes that are not valid text.
    #[error("buffer is not valid text")]
    NotText,

    /// The packet had the wrong number of fields for the active variant.
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    /// A field could not be parsed as a finite number.
    #[error("field {index} is not a number: {text:?}")]
    InvalidNumber { index: usize, text: String },

    /// A command string was missing its start trigger, or carried an unexpected one.
    #[error("start trigger mismatch")]
    Trigger,
}

/// The error type for all controller link operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial port could not be opened.
    #[error("could not open {port} at {baud} baud: {reason}")]
    ConnectionFailed {
        port: String,
        baud: u32,
        reason: String,
    },

    /// A value handed to the encoder was non-finite, or a channel index was out of range.
    #[error("invalid input for channel {channel}: {field} = {value}")]
    InvalidInput {
        channel: usize,
        field: &'static str,
        value: f64,
    },

    /// A telemetry packet did not match the expected schema.
    #[error("decode failed: {0}")]
    DecodeFailed(#[from] DecodeFailure),

    /// The configuration file or command line held an unusable value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An underlying I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
