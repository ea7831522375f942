use std::fmt;
use std::time::Duration;

/// Coarse category of a [`FireboltError`], for programmatic handling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    Configuration,
    Interface,
    Data,
    Operational,
    Programming,
    NotSupported,
    Timeout,
    ConnectionClosed,
    CursorClosed,
    Transport,
    General,
}

/// One entry of a structured error reported by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Deserialize)]
pub struct ErrorEntry {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default, rename = "helpLink")]
    pub help_link: Option<String>,
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{severity}: ")?;
        }
        if let Some(name) = &self.name {
            write!(f, "{name} ")?;
        }
        if let Some(code) = &self.code {
            write!(f, "({code}) ")?;
        }
        f.write_str(self.description.as_deref().unwrap_or("unknown error"))?;
        if let Some(resolution) = &self.resolution {
            write!(f, " {resolution}")?;
        }
        Ok(())
    }
}

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum FireboltError {
    /// An invalid or disallowed option was supplied by the caller.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The client could not make sense of its own input.
    #[error("interface error: {0}")]
    Interface(String),
    /// Malformed wire payload, parameter mismatch or nothing to fetch.
    #[error("data error: {0}")]
    Data(String),
    /// The server failed executing the query or the stream broke protocol.
    #[error("operational error: {0}")]
    Operational(String),
    #[error("programming error: {0}")]
    Programming(String),
    /// Feature combination the client does not implement.
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("query timed out after {:.3}s", .0.as_secs_f64())]
    QueryTimeout(Duration),
    #[error("unable to call {method}: connection closed")]
    ConnectionClosed { method: &'static str },
    #[error("unable to call {method}: cursor closed")]
    CursorClosed { method: &'static str },
    #[error("unable to call {method}: need to run a query first")]
    QueryNotRun { method: &'static str },
    #[error("unable to call {method}: method is not allowed for asynchronous queries")]
    MethodNotAllowedInAsync { method: &'static str },
    /// Error entries reported inside a streamed response.
    #[error("{}", join_entries(.errors))]
    Structured { errors: Vec<ErrorEntry> },
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("engine at {engine_url} is not running")]
    EngineNotRunning { engine_url: String },
    #[error("database '{database}' does not exist")]
    DatabaseNotFound { database: String },
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Several failures collected while releasing resources.
    #[error("{message}: {}", join_errors(.errors))]
    Aggregate {
        message: String,
        errors: Vec<FireboltError>,
    },
    #[error("{0}")]
    General(String),
}

impl FireboltError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Interface(_) => ErrorKind::Interface,
            Self::Data(_) => ErrorKind::Data,
            Self::Operational(_)
            | Self::Structured { .. }
            | Self::EngineNotRunning { .. }
            | Self::Aggregate { .. } => ErrorKind::Operational,
            Self::Programming(_) | Self::DatabaseNotFound { .. } => ErrorKind::Programming,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::QueryTimeout(_) => ErrorKind::Timeout,
            Self::ConnectionClosed { .. } => ErrorKind::ConnectionClosed,
            Self::CursorClosed { .. } => ErrorKind::CursorClosed,
            Self::Transport(_) | Self::Http { .. } => ErrorKind::Transport,
            Self::QueryNotRun { .. } | Self::MethodNotAllowedInAsync { .. } | Self::General(_) => {
                ErrorKind::General
            }
        }
    }
}

fn join_entries(errors: &[ErrorEntry]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_errors(errors: &[FireboltError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
