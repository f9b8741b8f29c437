use castgraph::MirrorError;

/// Errors a sync caller can see. Node syncs and deletes never return these;
/// they report failures as [`crate::SyncOutcome::Ignored`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The edge write failed after both endpoints were synced.
    #[error("failed to write {entity}: {source}")]
    EdgeWrite {
        entity: String,
        source: MirrorError,
    },
    #[error("missing endpoint: {0}")]
    MissingEndpoint(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Store(#[from] MirrorError),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Store(#[from] MirrorError),
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Store(MirrorError),
}

impl From<MirrorError> for RetrievalError {
    fn from(e: MirrorError) -> Self {
        match e {
            MirrorError::InvalidArgument(msg) => RetrievalError::InvalidArgument(msg),
            other => RetrievalError::Store(other),
        }
    }
}
