use thiserror::Error;

/// Rejected workflow input or an unparseable persisted record.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown step type '{0}' (expected 'sequential' or 'parallel')")]
    UnknownStepKind(String),

    #[error("unknown task status '{0}' (expected pending, running, success or failed)")]
    UnknownTaskStatus(String),

    #[error("step {0} has no tasks")]
    EmptyStep(usize),

    #[error("step {step} contains an empty task name")]
    EmptyTaskName { step: usize },

    #[error("step at position {position} has step_idx {found}")]
    IndexMismatch { position: usize, found: usize },

    #[error("malformed run record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure talking to the persistence backend or decoding what it holds.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("stored run '{run_id}' is corrupt: {source}")]
    Corrupt {
        run_id: String,
        #[source]
        source: ValidationError,
    },
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Outcome of a status or listing query that did not produce data.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("run '{0}' not found")]
    NotFound(String),

    #[error("operator mode is not enabled")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a workflow submission did not produce a run.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to persist initial run state: {0}")]
    Store(#[from] StoreError),
}
