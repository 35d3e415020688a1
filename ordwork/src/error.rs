use std::{io, path::PathBuf};

use thiserror::Error;

/// The first failure seen by a fallible run.
///
/// `E` is whatever the caller's worker and finalizer return. The index is
/// the one whose worker or finalizer produced the error.
#[derive(Debug, Error)]
pub enum Error<E> {
    #[error("worker failed for index {index}: {source}")]
    Worker {
        index: usize,
        #[source]
        source: E,
    },
    #[error("finalizer failed for index {index}: {source}")]
    Finalizer {
        index: usize,
        #[source]
        source: E,
    },
}

impl<E> Error<E> {
    /// The index whose worker or finalizer failed.
    pub fn index(&self) -> usize {
        match self {
            Error::Worker { index, .. } | Error::Finalizer { index, .. } => *index,
        }
    }

    /// Did the failure come from a finalizer?
    pub fn is_finalizer(&self) -> bool {
        matches!(self, Error::Finalizer { .. })
    }

    /// Discard the index, returning the caller's error.
    pub fn into_source(self) -> E {
        match self {
            Error::Worker { source, .. } | Error::Finalizer { source, .. } => source,
        }
    }
}

/// Failure to load a [`Config`](crate::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io failed for '{path}': '{source}'")]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    YamlSerError(#[from] serde_yaml::Error),
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,
}
