//! Errors surfaced by the compilation pipeline.
use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Everything that can abort a step of the pipeline.
///
/// Malformed DIMACS input, corrupt cache entries and hash mismatches are
/// deliberately absent: they are logged and recovered from where they occur.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{library} is not available ({reason}); {hint}")]
    EngineUnavailable {
        library: String,
        reason: String,
        hint: String,
    },

    #[error("no decision-diagram engine is registered under '{0}'")]
    UnsupportedEngine(String),

    #[error("unsupported variable ordering algorithm '{0}'")]
    UnsupportedOrderingAlgorithm(String),

    #[error("{engine} does not support dynamic reordering '{algorithm}'")]
    UnsupportedDynamicReorder { engine: String, algorithm: String },

    #[error("diagram operation took {elapsed:.2?}, exceeding the watchdog bound of {bound:.2?}")]
    OperationTimeout { elapsed: Duration, bound: Duration },

    #[error("orienting the variable graph produced a cycle through node {node}")]
    OrientationCycle { node: usize },

    #[error("{engine}: {message}")]
    Engine {
        engine: &'static str,
        message: String,
    },

    #[error("could not parse DIMACS input: {0}")]
    Parse(#[from] anyhow::Error),

    #[error("malformed diagram dump: {0}")]
    MalformedDump(String),

    #[error("invalid variable order: {0}")]
    InvalidOrder(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure only affects the current clause and compilation may go on.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::OperationTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
