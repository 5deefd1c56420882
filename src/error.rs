//! Unified error model for the storage server.
//! Every failure a session can hit maps to one variant here; the session loop
//! decides from the variant whether to answer `ERR` and continue or to drop the
//! connection.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed command line, unknown command or non-numeric argument.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Well-formed but unacceptable argument (negative offset, bad file name).
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Backing file or trash operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    /// The client socket closed or errored; nothing more can be sent.
    #[error("transport error: {0}")]
    Transport(#[source] std::io::Error),
}

impl AppError {
    pub fn protocol<S: Into<String>>(msg: S) -> Self { AppError::Protocol(msg.into()) }
    pub fn argument<S: Into<String>>(msg: S) -> Self { AppError::Argument(msg.into()) }
    pub fn not_found<S: Into<String>>(msg: S) -> Self { AppError::NotFound(msg.into()) }
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        AppError::Io { context: context.into(), source }
    }

    /// Short stable code used in log fields.
    pub fn code_str(&self) -> &'static str {
        match self {
            AppError::Protocol(_) => "protocol",
            AppError::Argument(_) => "argument",
            AppError::NotFound(_) => "not_found",
            AppError::Io { .. } => "io",
            AppError::Transport(_) => "transport",
        }
    }

    /// Only transport loss ends a session; everything else is answered with `ERR`.
    pub fn is_fatal(&self) -> bool { matches!(self, AppError::Transport(_)) }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
