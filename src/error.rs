use thiserror::Error;

/// Errors produced by the sync core.
///
/// Callers branch on the variant before deciding what to do next:
/// an incomplete config is non-retryable until the user supplies one,
/// a transport failure makes the record eligible for buffering/retry,
/// and a local persistence failure is fatal to the current operation only.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required remote configuration field is missing or blank.
    /// Never attempted against the network.
    #[error("remote config incomplete: `{field}` is empty")]
    ConfigIncomplete { field: &'static str },

    /// Network, auth, or server-side failure during a remote operation.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failure reading or writing the local queue or config store.
    #[error("local persistence error: {0}")]
    LocalPersistence(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SyncError {
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        SyncError::Transport(err.into())
    }

    pub fn persistence(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        SyncError::LocalPersistence(err.into())
    }

    /// Whether a later attempt with the same inputs could succeed without
    /// user intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transport(_))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        SyncError::LocalPersistence(Box::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for SyncError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        SyncError::LocalPersistence(Box::new(err))
    }
}
