//! Error taxonomy shared by the client session, the driver adapter and the
//! TQL pipeline engine.

use thiserror::Error;

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Missing server address, malformed DSN, bad option.
    #[error("config: {0}")]
    Config(String),
    /// Credential rejection.
    #[error("{0}")]
    Auth(String),
    /// Connection refused, network loss, RPC deadline exceeded.
    #[error("transport: {0}")]
    Transport(String),
    /// Server-reported reason for a response with `success=false`.
    #[error("{0}")]
    Server(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("query: {0}")]
    Query(String),
    #[error("scan column {column}: can not convert {actual} to {expected}")]
    Scan {
        column: usize,
        expected: String,
        actual: String,
    },
    #[error("no rows in result set")]
    NoRows,
    #[error("bad connection: {0}")]
    BadConn(String),
    /// Operation on an appender after it was closed.
    #[error("transaction has already been committed or rolled back")]
    TxDone,
    /// Stage construction or evaluation failure.
    #[error("{}", pipeline_message(.stage, *.line, .reason))]
    Pipeline {
        stage: String,
        line: Option<usize>,
        reason: String,
    },
    /// Map-stage input shape violation.
    #[error("{0}")]
    Type(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("f({func}) invalid number of args; expect:{expected}, actual:{actual}")]
    InvalidNumOfArgs {
        func: String,
        expected: String,
        actual: usize,
    },
    #[error("f({func}) arg({index}) should be {expected}, but {actual}")]
    WrongTypeOfArgs {
        func: String,
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("io: {0}")]
    Io(String),
}

fn pipeline_message(stage: &str, line: Option<usize>, reason: &str) -> String {
    match line {
        Some(line) => format!("line {line}: {stage}: {reason}"),
        None => format!("{stage}: {reason}"),
    }
}

impl Error {
    pub fn pipeline(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Pipeline {
            stage: stage.into(),
            line: None,
            reason: reason.into(),
        }
    }

    /// Attach a source line to a pipeline error; other kinds are wrapped.
    #[must_use]
    pub fn at_line(self, stage: &str, line: usize) -> Self {
        match self {
            Error::Pipeline { stage, reason, .. } => Error::Pipeline {
                stage,
                line: Some(line),
                reason,
            },
            other => Error::Pipeline {
                stage: stage.to_string(),
                line: Some(line),
                reason: other.to_string(),
            },
        }
    }

    /// Map a server response reason, treating an empty reason as "unknown error".
    pub fn server(reason: &str) -> Self {
        if reason.is_empty() {
            Error::Server("unknown error".to_string())
        } else {
            Error::Server(reason.to_string())
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(feature = "io-csv")]
impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encode(err.to_string())
    }
}
