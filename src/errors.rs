//! Error types shared across the gateway.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Process exit code for invalid configuration.
pub const EXIT_CONFIG: u8 = 1;
/// Process exit code when the listening socket cannot be bound.
pub const EXIT_BIND: u8 = 2;
/// Process exit code for any other unrecoverable fault.
pub const EXIT_FAULT: u8 = 3;

/// Application error enumeration covering gateway failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or pipe I/O failure.
    Io(String),
    /// The external tool could not be launched.
    Spawn(String),
    /// The listening socket could not be bound.
    Bind(String),
    /// HTTP server failure after start-up.
    Http(String),
    /// The engine has already shut down.
    Stopped(String),
}

impl AppError {
    /// Exit code the binary reports when this error aborts it.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG,
            Self::Bind(_) => EXIT_BIND,
            Self::Io(_) | Self::Spawn(_) | Self::Http(_) | Self::Stopped(_) => EXIT_FAULT,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Stopped(msg) => write!(f, "stopped: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Why a single query did not produce a result.
///
/// The `Display` text is user facing: the HTTP adapter writes it verbatim
/// (plus a newline) into 500 response bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The query contained no non-blank line.
    Empty,
    /// The query contained more than one non-blank line.
    MultiLine,
    /// The tool has not emitted its ready prompt yet.
    NotReady,
    /// The engine was already stopped when the query was submitted.
    Stopped,
    /// The tool stopped while the query was queued or in flight.
    ToolStopped(String),
    /// The submitter canceled the query while it was in flight.
    Canceled(Option<String>),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Need a nonempty query."),
            Self::MultiLine => f.write_str("Need a single-line query."),
            Self::NotReady => f.write_str("Not available yet."),
            Self::Stopped => f.write_str("Stopped."),
            Self::ToolStopped(reason) => write!(f, "The external tool was stopped. {reason}"),
            Self::Canceled(None) => f.write_str("Canceled."),
            Self::Canceled(Some(reason)) => write!(f, "Canceled. {reason}"),
        }
    }
}

impl std::error::Error for QueryError {}
