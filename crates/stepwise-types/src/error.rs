use thiserror::Error;

/// Errors surfaced by action executors.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("unknown action type '{0}'")]
    UnknownType(String),

    #[error("invalid action config: {0}")]
    InvalidConfig(String),

    #[error("action failed: {0}")]
    Failed(String),
}

/// Errors from workflow repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("conflict: {0}")]
    Conflict(String),
}
