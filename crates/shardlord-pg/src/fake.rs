//! A scripted [`SqlSession`] double for copy-engine tests.
//!
//! Records every script and query it's asked to run, and answers
//! queries from a pre-loaded queue -- never opens a socket. This is what
//! lets `shardlord-engine`'s tests exercise the full copy state machine
//! and reconfiguration phases, including retry-on-failure and
//! not-ready-poll paths, deterministically.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{PgError, SqlSession};

/// A scripted session: every `ensure_open`/`run_script` call can be told
/// to fail N times before succeeding, and `query_one` answers come off a
/// queue the test pre-loads.
#[derive(Default)]
pub struct FakeSession {
    open: bool,
    pending_open_failures: usize,
    pending_script_failures: usize,
    query_answers: VecDeque<Result<String, PgError>>,
    pub scripts: Vec<String>,
    pub queries: Vec<String>,
    pub open_count: usize,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` calls to `ensure_open` fail with a simulated
    /// transport error before a subsequent call succeeds.
    pub fn fail_next_open(mut self, n: usize) -> Self {
        self.pending_open_failures = n;
        self
    }

    /// The next `n` calls to `run_script` fail with a simulated remote
    /// execution error.
    pub fn fail_next_script(mut self, n: usize) -> Self {
        self.pending_script_failures = n;
        self
    }

    /// Queue an answer for the next `query_one` call.
    pub fn push_query_answer(mut self, answer: Result<String, PgError>) -> Self {
        self.query_answers.push_back(answer);
        self
    }

    pub fn push_query_ok(self, value: impl Into<String>) -> Self {
        self.push_query_answer(Ok(value.into()))
    }
}

#[async_trait]
impl SqlSession for FakeSession {
    async fn ensure_open(&mut self) -> Result<(), PgError> {
        self.open_count += 1;
        if self.pending_open_failures > 0 {
            self.pending_open_failures -= 1;
            self.open = false;
            return Err(PgError::Simulated("connect refused".to_string()));
        }
        self.open = true;
        Ok(())
    }

    async fn run_script(&mut self, script: &str) -> Result<(), PgError> {
        self.scripts.push(script.to_string());
        if !self.open {
            return Err(PgError::NotConnected);
        }
        if self.pending_script_failures > 0 {
            self.pending_script_failures -= 1;
            self.open = false;
            return Err(PgError::Simulated("statement failed".to_string()));
        }
        Ok(())
    }

    async fn query_one(&mut self, sql: &str) -> Result<String, PgError> {
        self.queries.push(sql.to_string());
        if !self.open {
            return Err(PgError::NotConnected);
        }
        match self.query_answers.pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => {
                self.open = false;
                Err(error)
            }
            None => Err(PgError::UnexpectedRowCount(0)),
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// A cloneable handle to a [`FakeSession`], so a test can hand one end to
/// a `Task` (as its `Box<dyn SqlSession>`) while keeping the other end to
/// assert on the scripts and queries it was asked to run.
#[derive(Clone)]
pub struct SharedFakeSession(Arc<Mutex<FakeSession>>);

impl SharedFakeSession {
    pub fn new(session: FakeSession) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub async fn scripts(&self) -> Vec<String> {
        self.0.lock().await.scripts.clone()
    }

    pub async fn queries(&self) -> Vec<String> {
        self.0.lock().await.queries.clone()
    }

    pub async fn is_open(&self) -> bool {
        self.0.lock().await.is_open()
    }
}

#[async_trait]
impl SqlSession for SharedFakeSession {
    async fn ensure_open(&mut self) -> Result<(), PgError> {
        self.0.lock().await.ensure_open().await
    }

    async fn run_script(&mut self, script: &str) -> Result<(), PgError> {
        self.0.lock().await.run_script(script).await
    }

    async fn query_one(&mut self, sql: &str) -> Result<String, PgError> {
        self.0.lock().await.query_one(sql).await
    }

    fn is_open(&self) -> bool {
        // Best-effort synchronous view; callers needing a guaranteed
        // up-to-date read should use the async `is_open` method above.
        self.0.try_lock().map(|guard| guard.is_open()).unwrap_or(false)
    }

    fn close(&mut self) {
        if let Ok(mut guard) = self.0.try_lock() {
            guard.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_open_the_configured_number_of_times() {
        let mut session = FakeSession::new().fail_next_open(2);
        assert!(session.ensure_open().await.is_err());
        assert!(session.ensure_open().await.is_err());
        assert!(session.ensure_open().await.is_ok());
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn query_one_drains_answers_in_order() {
        let mut session = FakeSession::new()
            .push_query_ok("Ready")
            .push_query_ok("16/B374D848");
        session.ensure_open().await.unwrap();
        assert_eq!(session.query_one("select state").await.unwrap(), "Ready");
        assert_eq!(
            session.query_one("select lsn").await.unwrap(),
            "16/B374D848"
        );
    }

    #[tokio::test]
    async fn script_failure_closes_the_session() {
        let mut session = FakeSession::new().fail_next_script(1);
        session.ensure_open().await.unwrap();
        assert!(session.run_script("select 1").await.is_err());
        assert!(!session.is_open());
    }
}
