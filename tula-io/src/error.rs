//! Error types for TulaIO

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// TulaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Serial link problem surfaced by the reading stream
    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    /// Net weight could not be computed
    #[error("Calculation error: {0}")]
    Calculation(#[from] CalculationError),

    /// Hub connection refused at the credential boundary
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Configuration file could not be parsed or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire message could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Peer violated the hub wire protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A worker thread panicked
    #[error("Thread panic")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Failure to turn a raw frame into a reading
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    /// Header, length or field layout does not match the format
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    /// Parsed value falls outside the plausible range
    #[error("value {value_kg} kg outside plausible range")]
    OutOfRange { value_kg: f64 },
}

impl DecodeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Serial link health events. Never terminate the stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    /// Run of consecutive decode failures reached the configured threshold
    #[error("link degraded: {consecutive} consecutive undecodable frames")]
    Degraded { consecutive: u32 },

    /// Device handle failed; the stream is reconnecting
    #[error("link disconnected (reconnect attempt {attempt}): {reason}")]
    Disconnected { attempt: u32, reason: String },
}

/// Net weight calculation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalculationError {
    /// Strict mode refuses to compute from an unsettled reading
    #[error("gross reading is not stable")]
    UnstableInput,

    /// Reading is stale and carries no value
    #[error("no gross reading available")]
    NoReading,

    /// A tare component is negative or not finite
    #[error("invalid tare component {field}: {value}")]
    InvalidTare { field: &'static str, value: f64 },

    /// Product or tray name not present in the tare catalog
    #[error("unknown {kind} preset: {name}")]
    UnknownPreset { kind: &'static str, name: String },
}

/// Credential boundary failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// Verifier refused the credential
    #[error("credentials rejected: {reason}")]
    Rejected { reason: String },

    /// Peer did not complete the handshake in time
    #[error("handshake timed out")]
    Timeout,
}
