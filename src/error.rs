//! Error types for mail-junction.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration-related errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Junction {junction} is missing its apprise destination template")]
    MissingDestination { junction: String },

    #[error("Junction {junction} has an invalid {field} template: {source}")]
    InvalidTemplate {
        junction: String,
        field: &'static str,
        #[source]
        source: TemplateError,
    },
}

/// Template parse and render errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unterminated action starting at byte {position}")]
    Unterminated { position: usize },

    #[error("empty action at byte {position}")]
    EmptyAction { position: usize },

    #[error("unknown field {name:?}")]
    UnknownField { name: String },

    #[error("unknown function {name:?}")]
    UnknownFunction { name: String },

    #[error("malformed arguments to {function}: {reason}")]
    BadArguments {
        function: &'static str,
        reason: String,
    },

    #[error("{function} expects a list but {field} is a string")]
    NotAList {
        function: &'static str,
        field: String,
    },

    #[error("index {index} out of range for {field} of length {len}")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code}: {output}")]
    Failed {
        program: String,
        code: i32,
        output: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

/// Listener errors.
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client timed out")]
    Timeout,
}
