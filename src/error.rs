//! Error types
//!
//! Construction-time failures surface as [`ConfigError`]; anything that goes
//! wrong while talking to a metrics backend is a [`SinkError`]. Sink errors
//! are logged and swallowed by the sinks themselves and never reach the
//! request path.

use thiserror::Error;

/// Errors raised while building the instrumentation layer.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The id-removal pattern does not compile.
    #[error("invalid path pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A configured value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    /// The configuration sources could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The metrics transport could not be created.
    #[error("failed to initialise metrics transport: {0}")]
    Transport(#[source] SinkError),
}

/// Errors raised by a metrics transport.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("no address found for {0}")]
    Unresolved(String),
}
