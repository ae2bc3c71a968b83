//! MySQL backend implementation.

use std::time::Instant;

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use serde_json::{Map, Value};

use crate::config::ResolvedSourceConfig;
use crate::dialect::{Dialect, DialectKind};
use crate::error::{MetaqueryError, Result};
use crate::executor::{ColumnMeta, QueryResult};

use super::BackendConnection;

pub struct MysqlConnection {
    pool: mysql_async::Pool,
    kind: DialectKind,
}

impl MysqlConnection {
    /// `kind` is `Mysql` or `Mysql2`; both speak the same protocol.
    pub fn new(source: &ResolvedSourceConfig, kind: DialectKind) -> Result<Self> {
        tracing::info!(base = %source.base_id, dialect = %kind, "creating MySQL connection pool");
        let opts = mysql_async::Opts::from_url(&source.connection)
            .map_err(|e| MetaqueryError::Config(format!("invalid mysql url: {e}")))?;
        let constraints = mysql_async::PoolConstraints::new(0, source.pool.size.max(1))
            .ok_or_else(|| MetaqueryError::Config("invalid mysql pool size".to_string()))?;
        let mut builder = mysql_async::OptsBuilder::from_opts(opts)
            .pool_opts(mysql_async::PoolOpts::default().with_constraints(constraints));
        if let Some(schema) = &source.schema {
            builder = builder.db_name(Some(schema.clone()));
        }
        Ok(Self {
            pool: mysql_async::Pool::new(builder),
            kind,
        })
    }

    async fn conn(&self) -> Result<mysql_async::Conn> {
        self.pool.get_conn().await.map_err(|e| {
            tracing::error!(error = %e, "failed to get MySQL connection");
            MetaqueryError::Execution(format!("get mysql connection: {e}"))
        })
    }
}

#[async_trait]
impl BackendConnection for MysqlConnection {
    fn dialect(&self) -> &'static dyn Dialect {
        self.kind.dialect()
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        tracing::trace!(sql = %sql, "executing MySQL query");
        let mut conn = self.conn().await?;
        let rows: Vec<mysql_async::Row> = conn.query(sql).await.map_err(|e| {
            tracing::error!(error = %e, "MySQL query execution failed");
            MetaqueryError::Execution(format!("execute query: {e}"))
        })?;

        let columns: Vec<ColumnMeta> = rows
            .first()
            .map(|first| {
                first
                    .columns_ref()
                    .iter()
                    .map(|col| ColumnMeta {
                        name: col.name_str().into_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let result_rows: Vec<Map<String, Value>> = rows
            .into_iter()
            .map(|row| {
                let names: Vec<String> = row
                    .columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect();
                names
                    .into_iter()
                    .zip(mysql_async::Row::unwrap(row))
                    .map(|(name, value)| (name, mysql_value_to_json(value)))
                    .collect()
            })
            .collect();

        tracing::debug!(
            rows = result_rows.len(),
            columns = columns.len(),
            ms = start.elapsed().as_millis(),
            "mysql execute_sql"
        );
        Ok(QueryResult {
            columns,
            rows: result_rows,
        })
    }

    async fn execute_batch(&self, statements: &[String]) -> Result<u64> {
        let start = Instant::now();
        let mut conn = self.conn().await?;
        let mut tx = conn
            .start_transaction(mysql_async::TxOpts::default())
            .await
            .map_err(|e| MetaqueryError::Execution(format!("begin transaction: {e}")))?;
        let mut affected = 0u64;
        for sql in statements {
            tracing::trace!(sql = %sql, "executing MySQL statement");
            tx.query_drop(sql.as_str()).await.map_err(|e| {
                tracing::error!(error = %e, "MySQL statement failed, rolling back");
                MetaqueryError::Execution(format!("execute statement: {e}"))
            })?;
            affected += tx.affected_rows();
        }
        tx.commit()
            .await
            .map_err(|e| MetaqueryError::Execution(format!("commit transaction: {e}")))?;
        tracing::debug!(
            statements = statements.len(),
            affected,
            ms = start.elapsed().as_millis(),
            "mysql execute_batch"
        );
        Ok(affected)
    }
}

/// Dates come back as `YYYY-MM-DD HH:mm:ss` text, the format the time
/// handlers store on this dialect.
fn mysql_value_to_json(value: mysql_async::Value) -> Value {
    use mysql_async::Value as My;
    match value {
        My::NULL => Value::Null,
        My::Int(i) => Value::from(i),
        My::UInt(u) => Value::from(u),
        My::Float(f) => serde_json::Number::from_f64(f64::from(f))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        My::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        My::Bytes(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        My::Date(y, mo, d, h, mi, s, _micros) => Value::String(format!(
            "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"
        )),
        My::Time(negative, days, h, mi, s, _micros) => {
            let hours = u32::from(h) + days * 24;
            let sign = if negative { "-" } else { "" };
            Value::String(format!("{sign}{hours:02}:{mi:02}:{s:02}"))
        }
    }
}
