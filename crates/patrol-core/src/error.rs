//! Typed error kinds for the job orchestration core.
//!
//! Propagation policy follows the kinds enumerated in the design: `Validation`,
//! `NotFound` and `InvalidState` surface as client errors at the HTTP boundary;
//! `Store` is a transient/conflict error retried at the call site.

use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {0} is not in a state that allows this transition")]
    InvalidState(Uuid),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
