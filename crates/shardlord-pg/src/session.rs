//! The managed remote SQL session.
//!
//! A `PgSession` is a lazily-opened, reconnectable connection to exactly
//! one worker. It is the *only* way the copy engine touches a worker --
//! every script, probe, and reconfiguration step in `shardlord-engine`
//! goes through one of the three methods on [`SqlSession`].

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};

use crate::PgError;

/// The session-local setting every freshly-opened connection gets, so that
/// control-plane statements never block on a synchronous replica the
/// reconfiguration phase is itself in the middle of rewiring: it makes
/// all subsequent statements behave as asynchronous commits from the
/// worker's replication point of view.
const ASYNC_COMMIT_STATEMENT: &str = "SET synchronous_commit = off";

/// The operations the copy engine performs against a worker. Abstracted
/// behind a trait so `shardlord-engine`'s tests can substitute
/// [`crate::fake::FakeSession`] instead of a live connection, never
/// against a live PostgreSQL instance.
#[async_trait]
pub trait SqlSession: Send {
    /// Open the connection if not already open, then set the session to
    /// asynchronous-commit mode. Idempotent: a session that is already
    /// open is a no-op.
    async fn ensure_open(&mut self) -> Result<(), PgError>;

    /// Split `script` on `;` and run each fragment as its own autocommit
    /// statement, serially, on the held connection. On any fragment's
    /// failure the connection is discarded and the error propagated; the
    /// caller (the copy state machine) is responsible for turning that
    /// into a scheduled retry.
    async fn run_script(&mut self, script: &str) -> Result<(), PgError>;

    /// Run `sql`, expecting exactly one row with exactly one, non-null
    /// column, and return that column's text representation. On protocol
    /// failure, row-count mismatch, or NULL, the connection is discarded.
    async fn query_one(&mut self, sql: &str) -> Result<String, PgError>;

    /// Whether a connection is currently held.
    fn is_open(&self) -> bool;

    /// Discard any held connection. Safe to call when already closed.
    fn close(&mut self);
}

/// A managed connection to one worker, identified by a libpq connection
/// string. Reconnects lazily: a fresh `PgSession` holds no connection
/// until the first `ensure_open`.
pub struct PgSession {
    conninfo: String,
    client: Option<Client>,
    connection_task: Option<tokio::task::JoinHandle<()>>,
}

impl PgSession {
    pub fn new(conninfo: impl Into<String>) -> Self {
        Self {
            conninfo: conninfo.into(),
            client: None,
            connection_task: None,
        }
    }

    pub fn conninfo(&self) -> &str {
        &self.conninfo
    }

    fn client_mut(&mut self) -> Result<&mut Client, PgError> {
        self.client.as_mut().ok_or(PgError::NotConnected)
    }
}

#[async_trait]
impl SqlSession for PgSession {
    async fn ensure_open(&mut self) -> Result<(), PgError> {
        if self.client.is_some() {
            return Ok(());
        }

        let (client, connection) =
            tokio_postgres::connect(&self.conninfo, NoTls)
                .await
                .map_err(|source| {
                    self.close();
                    PgError::Connect {
                        conninfo: self.conninfo.clone(),
                        source,
                    }
                })?;

        // Drive the connection's I/O loop in the background, as every
        // tokio-postgres consumer must (the `Client` only queues requests;
        // nothing runs without someone polling `Connection`).
        self.connection_task = Some(tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::warn!(%error, "postgres connection task ended with an error");
            }
        }));
        self.client = Some(client);

        if let Err(source) = self.client_mut()?.simple_query(ASYNC_COMMIT_STATEMENT).await {
            self.close();
            return Err(PgError::Statement(source));
        }

        Ok(())
    }

    async fn run_script(&mut self, script: &str) -> Result<(), PgError> {
        let client = self.client_mut()?;
        // Deliberately naive split: fragments never contain embedded
        // semicolons, by construction of `shardlord_catalog::scripts`.
        for fragment in script.split(';') {
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            if let Err(source) = client.simple_query(fragment).await {
                self.close();
                return Err(PgError::Statement(source));
            }
        }
        Ok(())
    }

    async fn query_one(&mut self, sql: &str) -> Result<String, PgError> {
        let client = self.client_mut()?;
        let messages = match client.simple_query(sql).await {
            Ok(messages) => messages,
            Err(source) => {
                self.close();
                return Err(PgError::Statement(source));
            }
        };

        let mut rows = messages
            .into_iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(row),
                _ => None,
            });

        let row = match (rows.next(), rows.next()) {
            (Some(row), None) => row,
            (None, _) => {
                self.close();
                return Err(PgError::UnexpectedRowCount(0));
            }
            (Some(_), Some(_)) => {
                let extra = 2 + rows.count();
                self.close();
                return Err(PgError::UnexpectedRowCount(extra));
            }
        };

        match row.get(0) {
            Some(value) => Ok(value.to_string()),
            None => {
                self.close();
                Err(PgError::UnexpectedNull)
            }
        }
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    fn close(&mut self) {
        self.client = None;
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Produces a fresh [`SqlSession`] for a given connection string. The
/// copy engine takes one of these rather than calling `PgSession::new`
/// directly so tests can substitute a factory that hands out
/// [`crate::fake::FakeSession`]/[`crate::fake::SharedFakeSession`]
/// instead.
pub trait SessionFactory: Send + Sync {
    fn open(&self, conninfo: &str) -> Box<dyn SqlSession>;
}

/// The production factory: every session it opens is a real
/// `PgSession` that lazily connects over `tokio-postgres`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgSessionFactory;

impl SessionFactory for PgSessionFactory {
    fn open(&self, conninfo: &str) -> Box<dyn SqlSession> {
        Box::new(PgSession::new(conninfo))
    }
}
