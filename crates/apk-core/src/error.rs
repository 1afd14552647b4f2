use std::path::PathBuf;

/// Errors surfaced by the package database.
///
/// These travel inside [`anyhow::Error`] so call sites can attach context
/// freely; callers that need to react to a specific kind downcast.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DbError {
    #[error("{0}")]
    Parse(String),
    #[error("{pkg}: Trying to overwrite {path} owned by {owner}")]
    Conflict {
        pkg: String,
        path: String,
        owner: String,
    },
    #[error("{pkg}: {phase} script failed with status {status}")]
    Script {
        pkg: String,
        phase: &'static str,
        status: i32,
    },
    #[error("maximum number of repositories ({max}) reached")]
    RepositoryLimit { max: usize },
    #[error("{0}: package root is not initialized, run 'apk create' first")]
    UninitializedRoot(PathBuf),
    #[error("database was opened without a root filesystem")]
    NoRoot,
}

impl DbError {
    /// Whether an error chain bottoms out in this kind of database error.
    #[must_use]
    pub fn find(err: &anyhow::Error) -> Option<&DbError> {
        err.downcast_ref::<DbError>()
    }
}
