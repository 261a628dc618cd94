//! # shardlord-pg
//!
//! The managed remote SQL session: the copy engine's only way of
//! touching a worker database. Built directly on `tokio-postgres`, the
//! crate the broader Postgres-control-plane ecosystem reaches for.

mod error;
pub mod fake;
mod session;

pub use error::PgError;
pub use fake::{FakeSession, SharedFakeSession};
pub use session::{PgSession, PgSessionFactory, SessionFactory, SqlSession};
