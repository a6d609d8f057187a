//! Error types shared by the price pipeline and its sources

use std::path::PathBuf;
use thiserror::Error;

/// Broad classification of a [`PriceDbError`], used by callers to decide how
/// to report a failure without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceFetch,
    Parse,
    Io,
    Config,
}

#[derive(Error, Debug)]
pub enum PriceDbError {
    /// A provider could not be reached, answered with an error status, or
    /// kept rate limiting us after every retry.
    #[error("failed to fetch prices from {provider}")]
    SourceFetch {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    /// A line in the price database is not a price directive.
    #[error("malformed price directive in {} at line {line_number}: {line:?}", path.display())]
    Parse {
        path: PathBuf,
        line_number: usize,
        line: String,
    },

    /// A provider answered, but with a body we could not decode.
    #[error("malformed {provider} response")]
    Payload {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl PriceDbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PriceDbError::SourceFetch { .. } => ErrorKind::SourceFetch,
            PriceDbError::Parse { .. } | PriceDbError::Payload { .. } => ErrorKind::Parse,
            PriceDbError::Io { .. } => ErrorKind::Io,
            PriceDbError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Messages of this error and every underlying cause, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = std::error::Error::source(self);
        while let Some(cause) = current {
            messages.push(cause.to_string());
            current = cause.source();
        }
        messages
    }

    pub fn fetch(provider: &str, source: impl Into<anyhow::Error>) -> Self {
        PriceDbError::SourceFetch {
            provider: provider.to_string(),
            source: source.into(),
        }
    }

    pub fn payload(provider: &str, source: impl Into<anyhow::Error>) -> Self {
        PriceDbError::Payload {
            provider: provider.to_string(),
            source: source.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PriceDbError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        PriceDbError::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        PriceDbError::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

pub type Result<T, E = PriceDbError> = std::result::Result<T, E>;
