use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while capturing or persisting counters.
///
/// None of these are recoverable mid-run except through the caller's own
/// decision to continue; the C entry points turn every variant into a
/// diagnostic line followed by a group-wide abort.
#[derive(Debug, Error)]
pub enum Error {
    /// The counter backend has no code for this name.
    #[error("unknown counter {name:?}")]
    UnknownCounter { name: String },

    /// The backend refused to add a resolved counter to the event set.
    #[error("failed to add counter {name:?} to the event set: {source}")]
    BackendRegistration {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{op} failed for {}: {source}", path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid value {value:?} for {var}: {reason}")]
    Config {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{op} is not allowed while {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },
}

impl Error {
    /// Name of the operation that failed, for the one-line diagnostic.
    pub fn operation(&self) -> &str {
        match self {
            Error::UnknownCounter { .. } => "resolve counter",
            Error::BackendRegistration { .. } => "add counter",
            Error::Backend { op, .. } | Error::Storage { op, .. } | Error::InvalidState { op, .. } => {
                *op
            }
            Error::Config { var, .. } => *var,
        }
    }

    /// Numeric code for the diagnostic line: the OS error number when the
    /// failure came from the OS, otherwise a fixed per-category code.
    pub fn code(&self) -> i32 {
        match self {
            Error::UnknownCounter { .. } => -1,
            Error::BackendRegistration { source, .. } | Error::Backend { source, .. } => {
                source.raw_os_error().unwrap_or(-2)
            }
            Error::Storage { source, .. } => source.raw_os_error().unwrap_or(-3),
            Error::Config { .. } => -4,
            Error::InvalidState { .. } => -5,
        }
    }

    pub(crate) fn storage(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            op,
            path: path.into(),
            source,
        }
    }
}

/// The error seen by processes whose own half of a collective succeeded
/// while some peer's did not.
pub(crate) fn peer_failure() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "failed on another process")
}
