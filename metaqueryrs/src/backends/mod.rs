//! Database backend implementations.
//!
//! Each backend is implemented in its own file and gated behind a feature flag.

use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::executor::QueryResult;

/// Unified interface for all database backends.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    fn dialect(&self) -> &'static dyn Dialect;

    /// Runs a query and returns its rows as ordered JSON objects.
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;

    /// Runs every statement in one transaction and returns the total number
    /// of affected rows. Nothing is committed if any statement fails.
    async fn execute_batch(&self, statements: &[String]) -> Result<u64>;
}

#[cfg(feature = "sqlite")]
mod sqlite;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnection;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnection;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "mysql")]
pub use mysql::MysqlConnection;
