use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::store::PendingWrite;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A persisted document that does not match the history schema.
///
/// Never retried: ingesting on top of it could make things worse.
#[derive(Error, Debug)]
#[error("corrupt history document: {reason}")]
pub struct CorruptDataError {
    pub reason: String,
}

impl CorruptDataError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Transient failure reading or writing durable state. Retriable.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("timed out after {waited:?}")]
    Timeout { waited: Duration },

    #[error("gave up after {attempts} conflicting concurrent writes")]
    ConflictsExhausted { attempts: u32 },

    #[error("failed to encode history document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome of a failed compare-and-swap write.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Another writer persisted first; the expected version is stale.
    #[error("concurrent write detected")]
    Conflict,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<io::Error> for WriteError {
    fn from(err: io::Error) -> Self {
        WriteError::Storage(StorageError::Io(err))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    CorruptData(#[from] CorruptDataError),

    /// `pending` is set when the in-memory append succeeded but durable state
    /// was not updated. Hand it to `HistoryStore::retry_persist`.
    #[error("storage error: {source}")]
    Storage {
        #[source]
        source: StorageError,
        pending: Option<Box<PendingWrite>>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read {what}: {reason}")]
    Input { what: String, reason: String },

    #[error("history belongs to {found}, not {expected}")]
    RepoMismatch { expected: String, found: String },
}

impl Error {
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Storage { .. })
    }

    /// Take the unpersisted write out of a storage failure, if there is one.
    pub fn into_pending(self) -> Option<PendingWrite> {
        match self {
            Error::Storage { pending, .. } => pending.map(|p| *p),
            _ => None,
        }
    }
}

impl From<StorageError> for Error {
    fn from(source: StorageError) -> Self {
        Error::Storage {
            source,
            pending: None,
        }
    }
}
