use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenieError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("No cluster found matching criteria: {0}")]
    NoClusterFound(String),

    #[error("Load balancer was given an empty candidate set")]
    EmptyCandidateSet,

    #[error("No execution strategy bound to cluster type: {0}")]
    UnknownClusterType(String),

    #[error("Invalid execution strategy binding: {0}")]
    InvalidStrategyBinding(String),

    #[error("Job launch failed: {0}")]
    JobLaunch(String),

    #[error("Kill failed: {0}")]
    Kill(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job with id {0} already exists")]
    JobAlreadyExists(String),

    #[error("Job store is at capacity")]
    AtCapacity,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GenieError {
    /// Configuration errors can't be fixed by resubmitting the job.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            GenieError::UnknownClusterType(_) | GenieError::InvalidStrategyBinding(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, GenieError>;
