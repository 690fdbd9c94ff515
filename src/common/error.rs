//! Error types for natstest
//!
//! Every failure carries enough context (test name, topic, entry index) to
//! locate the offending test definition without re-running it.

use std::io;
use thiserror::Error;

use crate::matcher::MatchError;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for natstest
#[derive(Error, Debug)]
pub enum Error {
    // === Catalog Errors ===
    #[error("Unable to decode the test definition '{name}': {reason}")]
    Parse { name: String, reason: String },

    #[error("Unable to read the test definitions: {0}")]
    Filesystem(String),

    #[error("Unable to find valid test definition files in: {0}")]
    NoTestDefinitions(String),

    #[error("Unable to find the test {0}")]
    TestNotFound(String),

    #[error("Another test is already in progress, please wait ...")]
    Busy,

    // === Bus Errors ===
    #[error("Request timeout after {0} ms")]
    BusTimeout(u64),

    #[error("Bus transport error: {0}")]
    BusTransport(String),

    #[error("Unable to decode the response: {0}")]
    InvalidResponse(String),

    // === Template Errors ===
    #[error("The request data is invalid: {0}")]
    InvalidInput(String),

    #[error("The following command is not valid: {0}")]
    DisallowedCommand(String),

    #[error("Unable to run the command: {command} -- [{reason}]")]
    CommandFailed { command: String, reason: String },

    #[error("Template error: {0}")]
    Template(String),

    // === Match Errors ===
    #[error("{0}")]
    Mismatch(Box<MatchError>),

    // === Pipeline Errors ===
    #[error("{test}: {topic} [{index}]: {source}")]
    Entry {
        test: String,
        topic: String,
        index: usize,
        #[source]
        source: Box<Error>,
    },

    // === Service/Connection Errors ===
    #[error("Service not running. Start it with 'natstest serve'")]
    DaemonNotRunning,

    #[error("Failed to spawn the service: timed out waiting for socket after {0} seconds")]
    DaemonSpawnTimeout(u64),

    #[error("Failed to connect to the service: {0}")]
    DaemonConnectionFailed(#[source] io::Error),

    #[error("Service communication error: {0}")]
    DaemonCommunication(String),

    /// Failure reported by the service, with its error code
    #[error("{message}")]
    Remote { code: String, message: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to decide who is at fault for a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Filesystem,
    BusTimeout,
    BusTransport,
    Template,
    Match,
    NotFound,
    Conflict,
    Config,
    Internal,
}

impl ErrorKind {
    /// Wire code used in IPC error responses
    pub fn code(self) -> &'static str {
        match self {
            Self::Conflict => "BUSY",
            Self::NotFound => "NOT_FOUND",
            Self::Parse => "PARSE_ERROR",
            Self::Match => "MATCH_FAILED",
            Self::Template => "TEMPLATE_ERROR",
            Self::BusTimeout => "BUS_TIMEOUT",
            Self::BusTransport => "BUS_ERROR",
            Self::Filesystem => "FILESYSTEM_ERROR",
            Self::Config => "CONFIG_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Inverse of `code`; unknown codes are internal
    pub fn from_code(code: &str) -> Self {
        match code {
            "BUSY" => Self::Conflict,
            "NOT_FOUND" => Self::NotFound,
            "PARSE_ERROR" => Self::Parse,
            "MATCH_FAILED" => Self::Match,
            "TEMPLATE_ERROR" => Self::Template,
            "BUS_TIMEOUT" => Self::BusTimeout,
            "BUS_ERROR" => Self::BusTransport,
            "FILESYSTEM_ERROR" => Self::Filesystem,
            "CONFIG_ERROR" => Self::Config,
            _ => Self::Internal,
        }
    }

    /// Whether the failure is attributable to the test definition or the
    /// service under test rather than to natstest itself
    pub fn is_client_fault(self) -> bool {
        matches!(self, Self::Parse | Self::Match | Self::Template | Self::NotFound)
    }
}

impl Error {
    /// Create a parse error for the named test definition
    pub fn parse(name: &str, reason: impl ToString) -> Self {
        Self::Parse {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a command failure error
    pub fn command_failed(command: &str, reason: impl ToString) -> Self {
        Self::CommandFailed {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Attach pipeline context to an error raised while running an entry
    pub fn in_entry(self, test: &str, topic: &str, index: usize) -> Self {
        Self::Entry {
            test: test.to_string(),
            topic: topic.to_string(),
            index,
            source: Box::new(self),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } | Error::InvalidResponse(_) | Error::Json(_) => ErrorKind::Parse,
            Error::Filesystem(_) | Error::NoTestDefinitions(_) | Error::FileRead { .. } => {
                ErrorKind::Filesystem
            }
            Error::TestNotFound(_) => ErrorKind::NotFound,
            Error::Busy => ErrorKind::Conflict,
            Error::BusTimeout(_) => ErrorKind::BusTimeout,
            Error::BusTransport(_) => ErrorKind::BusTransport,
            Error::InvalidInput(_)
            | Error::DisallowedCommand(_)
            | Error::CommandFailed { .. }
            | Error::Template(_) => ErrorKind::Template,
            Error::Mismatch(_) => ErrorKind::Match,
            Error::Entry { source, .. } => source.kind(),
            Error::Config(_) | Error::ConfigParse(_) => ErrorKind::Config,
            Error::Remote { code, .. } => ErrorKind::from_code(code),
            _ => ErrorKind::Internal,
        }
    }
}

impl From<MatchError> for Error {
    fn from(e: MatchError) -> Self {
        Self::Mismatch(Box::new(e))
    }
}

/// IPC-serializable error for service responses
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IpcError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for IpcError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::DaemonNotRunning => "DAEMON_NOT_RUNNING",
            Error::Remote { code, .. } => code.as_str(),
            _ => e.kind().code(),
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}

impl From<IpcError> for Error {
    fn from(e: IpcError) -> Self {
        match e.code.as_str() {
            "BUSY" => Error::Busy,
            "DAEMON_NOT_RUNNING" => Error::DaemonNotRunning,
            _ => Error::Remote {
                code: e.code,
                message: e.message,
            },
        }
    }
}
