//! Error types for channel outputs
use thiserror::Error;

/// Channel output errors
#[derive(Error, Debug)]
pub enum OutputError {
    /// Bad or missing configuration fields, unknown device name, limits exceeded.
    /// Fatal to the driver that reported it.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The bus or device could not be opened or addressed.
    /// Fatal to the driver that reported it.
    #[error("failed to open {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: std::io::Error,
    },

    /// A single write/transfer did not complete. Logged, never fatal.
    #[error("transport error on {device}: {reason}")]
    TransportTransaction { device: String, reason: String },
}

impl OutputError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        OutputError::Configuration(msg.into())
    }

    pub(crate) fn open(device: impl Into<String>, source: std::io::Error) -> Self {
        OutputError::DeviceOpen {
            device: device.into(),
            source,
        }
    }

    pub(crate) fn transport(device: impl Into<String>, reason: impl ToString) -> Self {
        OutputError::TransportTransaction {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for OutputError {
    fn from(e: serde_json::Error) -> Self {
        OutputError::Configuration(e.to_string())
    }
}

/// Result type for channel output operations
pub type Result<T> = std::result::Result<T, OutputError>;
