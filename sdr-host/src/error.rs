//! Error types for sdr-host
//!
//! Only conditions with no partial result are raised as errors. Timeouts are
//! reported through `Option`/`Result<(), T>` returns and stream conditions
//! travel in metadata.

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// sdr-host error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Discovery produced no candidate for the hint
    #[error("No devices found for ----->\n{0}")]
    NotFound(String),

    /// The requested candidate index does not exist
    #[error("No device at index {index} for ----->\n{hint}")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Pretty-printed hint
        hint: String,
    },

    /// Caller passed an invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed wire packet
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A discovery or construction function failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Thread panicked
    #[error("Thread panicked")]
    ThreadPanic,

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_error_display() {
        let err = Error::IndexOutOfRange {
            index: 3,
            hint: "type=sim".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("index 3"));
        assert!(display.contains("type=sim"));
    }

    #[test]
    fn test_toml_conversion() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("= broken");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)));
    }
}
