//! SQLite backend implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};

use crate::dialect::{Dialect, DialectKind};
use crate::error::{MetaqueryError, Result};
use crate::executor::{ColumnMeta, QueryResult};

use super::BackendConnection;

const MEMORY: &str = ":memory:";

/// SQLite connection implementing the unified backend trait.
///
/// `:memory:` databases live as long as their single pooled connection, so
/// they run with one slot and the connection is always returned to the pool.
#[derive(Clone)]
pub struct SqliteConnection {
    database_path: PathBuf,
    limiter: Arc<Semaphore>,
    pool: Arc<Mutex<Vec<rusqlite::Connection>>>,
}

impl SqliteConnection {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let in_memory = path.as_os_str() == MEMORY;
        let max_concurrency = if in_memory { 1 } else { 8 };
        tracing::info!(path = %path.display(), max_concurrency, "creating SQLite connection");
        let first = rusqlite::Connection::open(&path)?;
        Ok(Self {
            database_path: path,
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            pool: Arc::new(Mutex::new(vec![first])),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(MEMORY)
    }

    /// Configure maximum concurrent executions. Ignored for `:memory:`.
    pub fn with_max_concurrency(mut self, max_in_flight: usize) -> Self {
        if self.database_path.as_os_str() != MEMORY {
            tracing::debug!(max_concurrency = max_in_flight, "configuring SQLite concurrency");
            self.limiter = Arc::new(Semaphore::new(max_in_flight.max(1)));
        }
        self
    }

    async fn acquire_slot(&self) -> Result<SemaphorePermit<'_>> {
        if self.limiter.available_permits() == 0 {
            tracing::debug!("all SQLite slots in use, waiting for permit");
        }
        self.limiter
            .acquire()
            .await
            .map_err(|e| MetaqueryError::Execution(format!("limiter closed: {e}")))
    }

    async fn checkout_connection(&self) -> Result<rusqlite::Connection> {
        let mut guard = self.pool.lock().await;
        if let Some(conn) = guard.pop() {
            let pool_size = guard.len();
            drop(guard);
            tracing::trace!(pool_remaining = pool_size, "reusing pooled SQLite connection");
            return Ok(conn);
        }
        drop(guard);
        tracing::debug!(path = %self.database_path.display(), "opening new SQLite connection");
        Ok(rusqlite::Connection::open(&self.database_path)?)
    }

    /// Runs `work` on a pooled connection off the async runtime. The
    /// connection goes back to the pool whether or not `work` failed.
    async fn with_connection<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let _permit = self.acquire_slot().await?;
        let conn = self.checkout_connection().await?;
        let (result, conn) = tokio::task::spawn_blocking(move || {
            let mut conn = conn;
            let result = work(&mut conn);
            (result, conn)
        })
        .await
        .map_err(|e| MetaqueryError::Execution(format!("task join error: {e}")))?;
        self.pool.lock().await.push(conn);
        result
    }
}

#[async_trait]
impl BackendConnection for SqliteConnection {
    fn dialect(&self) -> &'static dyn Dialect {
        DialectKind::Sqlite3.dialect()
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        let sql = sql.to_string();
        self.with_connection(move |conn| {
            let start = Instant::now();
            tracing::trace!(sql = %sql, "executing SQLite query");
            let mut stmt = conn.prepare(&sql)?;
            let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows_iter = stmt.query([])?;
            let mut rows = Vec::new();
            while let Some(row) = rows_iter.next()? {
                let mut map = Map::new();
                for (idx, name) in column_names.iter().enumerate() {
                    map.insert(name.clone(), sqlite_value_to_json(row.get_ref(idx)?));
                }
                rows.push(map);
            }
            let columns: Vec<ColumnMeta> = column_names
                .into_iter()
                .map(|name| ColumnMeta { name })
                .collect();
            tracing::debug!(
                rows = rows.len(),
                columns = columns.len(),
                ms = start.elapsed().as_millis(),
                "sqlite execute_sql"
            );
            Ok(QueryResult { columns, rows })
        })
        .await
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<u64> {
        let statements = statements.to_vec();
        self.with_connection(move |conn| {
            let start = Instant::now();
            let tx = conn.transaction()?;
            let mut affected = 0u64;
            for sql in &statements {
                tracing::trace!(sql = %sql, "executing SQLite statement");
                affected += tx.execute(sql, [])? as u64;
            }
            tx.commit()?;
            tracing::debug!(
                statements = statements.len(),
                affected,
                ms = start.elapsed().as_millis(),
                "sqlite execute_batch"
            );
            Ok(affected)
        })
        .await
    }
}

fn sqlite_value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            bytes,
        )),
    }
}
