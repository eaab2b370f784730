/// Errors returned by the [`StorageApi`](super::StorageApi).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A uniqueness constraint was violated, e.g. a duplicate request id or a
    /// swap that is already assigned to a batch.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The addressed row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other backend failure.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            _ => Self::Internal(err.into()),
        }
    }
}
