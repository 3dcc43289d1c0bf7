use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error raised by a hook or template function.
///
/// `Assertion` is the sanctioned way for a hook to fail a step; anything else
/// is reported as an unexpected error.
#[derive(Error, Debug)]
pub enum HookError {
    #[error("{0}")]
    Assertion(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    pub fn assertion<S: Into<String>>(message: S) -> Self {
        HookError::Assertion(message.into())
    }

    pub fn other<S: Into<String>>(message: S) -> Self {
        HookError::Other(message.into().into())
    }
}

impl From<Error> for HookError {
    fn from(err: Error) -> Self {
        if err.is_failure() {
            HookError::Assertion(err.to_string())
        } else {
            HookError::Other(Box::new(err))
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{function}' failed: {source}")]
    Resolution {
        function: String,
        #[source]
        source: HookError,
    },

    #[error("Invalid arguments for '{function}': {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("Undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("Cannot resolve path '{path}': {reason}")]
    PathResolution { path: String, reason: String },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Type mismatch in '{comparator}': cannot compare {actual} with {expected}")]
    TypeMismatch {
        comparator: String,
        actual: String,
        expected: String,
    },

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Invalid expression '{expression}': {reason}")]
    ExpressionSyntax { expression: String, reason: String },

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Case exceeded its time budget of {0:?}")]
    CaseTimeout(Duration),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to load suite '{path}': {reason}")]
    Load { path: String, reason: String },

    #[error("Settings error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn path<P: Into<String>, R: Into<String>>(path: P, reason: R) -> Self {
        Error::PathResolution {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn syntax<E: Into<String>, R: Into<String>>(expression: E, reason: R) -> Self {
        Error::ExpressionSyntax {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn arguments<F: Into<String>, R: Into<String>>(function: F, reason: R) -> Self {
        Error::InvalidArguments {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Assertion-style errors end a step as FAILED, everything else as ERROR.
    pub fn is_failure(&self) -> bool {
        match self {
            Error::Assertion(_) => true,
            Error::Resolution {
                source: HookError::Assertion(_),
                ..
            } => true,
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(err.to_string())
    }
}
