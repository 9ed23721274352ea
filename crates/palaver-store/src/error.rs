use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An `update` targeted a document that does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A path string failed structural validation.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The backing store could not be reached or rejected the request.
    /// Transient; callers on best-effort paths log and move on.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A transaction kept conflicting with concurrent writers and gave up.
    #[error("Transaction aborted after {0} attempts")]
    Contention(u32),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
