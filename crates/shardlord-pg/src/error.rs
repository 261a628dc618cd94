//! Error taxonomy for `shardlord-pg`.
//!
//! Every variant here is one of two *locally recoverable* error kinds --
//! transport error and remote execution error -- which the copy engine
//! turns into a scheduled retry after `cmd_retry_naptime`. All of them
//! classify non-fatal errors uniformly: the connection is discarded, the
//! task's next wake is configured, and the engine unwinds to the
//! scheduler. `shardlord-pg` itself never computes a wake time -- that
//! stays in `shardlord-engine`, which is the only place that knows about
//! tasks and timers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("connecting to {conninfo}: {source}")]
    Connect {
        conninfo: String,
        source: tokio_postgres::Error,
    },

    #[error("executing statement: {0}")]
    Statement(#[from] tokio_postgres::Error),

    #[error("expected exactly one row with one column, got {0} rows")]
    UnexpectedRowCount(usize),

    #[error("column value was NULL")]
    UnexpectedNull,

    #[error("operation attempted on a closed session")]
    NotConnected,

    /// Only ever constructed by [`crate::fake::FakeSession`] -- a real
    /// `tokio_postgres::Error` can't be built outside the driver, so tests
    /// that need to inject a transport failure use this instead.
    #[error("simulated failure: {0}")]
    Simulated(String),
}

impl PgError {
    /// Every `PgError` is locally recoverable by closing the connection
    /// and retrying -- there is no fatal variant in this crate. Kept as a
    /// method (rather than asserting it implicitly) so callers read the
    /// classification at the call site.
    pub fn is_retryable(&self) -> bool {
        true
    }
}
