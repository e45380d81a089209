use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No storage location exists in this execution context. Reads degrade to
    /// empty results; writes report this so lost data is observable.
    #[error("local storage unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Record content that could not be read back once stored.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("import stopped after {committed} of {attempted} records were committed: {source}")]
    ImportPartialFailure {
        committed: usize,
        attempted: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("erase incomplete, stores still holding data: {}", remaining.join(", "))]
    PartialErase { remaining: Vec<String> },

    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// Opening the database failed; every caller shares this outcome.
    #[error("local store failed to initialize: {0}")]
    Initialization(#[source] Arc<StoreError>),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Internal(format!("blocking task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Maps a primary-key violation to [`StoreError::DuplicateKey`].
pub(crate) fn map_constraint(err: rusqlite::Error, key: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::DuplicateKey(key.to_owned())
        }
        _ => StoreError::Database(err),
    }
}
