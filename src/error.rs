// Error taxonomy for the statistics core. Repo/query boundaries return
// StatsError; startup paths (connect, config, main) use anyhow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    /// The caller sent something we cannot act on (unknown window keyword,
    /// malformed start/stop, bad stat type). Maps to HTTP 400.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// A job executor failed during its run. Logged by the scheduler;
    /// the job's last-run stays advanced so there is no retry storm.
    #[error("job {job} failed: {source}")]
    Execution {
        job: String,
        #[source]
        source: anyhow::Error,
    },

    /// The backing store is unreachable or a statement failed. Surfaced to
    /// admin callers as a failed response, not retried transparently.
    #[error("statistics store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}
