use std::path::PathBuf;

use thiserror::Error;

/// Failures the checker can run into.
///
/// Only [`CheckError::Precondition`] aborts a run. Everything scoped to a
/// single submission is turned into a degraded result row by the runner, and
/// [`CheckError::Persistence`] is reported after the batch has finished.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("{0}")]
    Precondition(String),
    #[error("syntax error in {}", .0.display())]
    Parse(PathBuf),
    #[error("{} is not valid UTF-8", .0.display())]
    Encoding(PathBuf),
    #[error("{0}")]
    Unexpected(String),
    #[error("failed to save report to {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },
}

impl CheckError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        CheckError::Precondition(msg.into())
    }

    /// True for errors that should stop the whole batch.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CheckError::Precondition(_))
    }
}
