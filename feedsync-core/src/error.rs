use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("remote service is rate limiting requests")]
    RateLimited,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("record zone was deleted and could not be recovered")]
    ZoneRevoked,
    #[error("{failed_chunks} status chunk(s) failed to propagate")]
    PropagationPartialFailure {
        failed_chunks: usize,
        rate_limited: bool,
    },
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// True when the next cycle should push statuses one at a time.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            SyncError::RateLimited
                | SyncError::PropagationPartialFailure {
                    rate_limited: true,
                    ..
                }
        )
    }
}
