use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while building, starting or tearing down a unit source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("watch root not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("watch backend: {0}")]
    Watch(#[from] notify::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

impl SourceError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
