//! Source connections keyed by base id.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::BackendConnection;
use crate::config::{MetaqueryConfig, ResolvedSourceConfig};
use crate::dialect::DialectKind;
use crate::error::{MetaqueryError, Result};

/// A connected source, one variant per bundled driver.
#[derive(Clone)]
pub enum SourceClient {
    #[cfg(feature = "sqlite")]
    Sqlite(Arc<crate::backends::SqliteConnection>),
    #[cfg(feature = "postgres")]
    Postgres(Arc<crate::backends::PostgresConnection>),
    #[cfg(feature = "mysql")]
    Mysql(Arc<crate::backends::MysqlConnection>),
}

impl SourceClient {
    pub fn connection(&self) -> Arc<dyn BackendConnection> {
        match self {
            #[cfg(feature = "sqlite")]
            SourceClient::Sqlite(conn) => conn.clone(),
            #[cfg(feature = "postgres")]
            SourceClient::Postgres(conn) => conn.clone(),
            #[cfg(feature = "mysql")]
            SourceClient::Mysql(conn) => conn.clone(),
        }
    }
}

fn no_driver(kind: DialectKind, feature: Option<&str>) -> MetaqueryError {
    match feature {
        Some(feature) => MetaqueryError::Config(format!(
            "{kind} sources need the '{feature}' feature of metaquery-core"
        )),
        None => MetaqueryError::Config(format!(
            "no bundled driver for {kind}; register a BackendConnection for this base with SourceRegistry::insert"
        )),
    }
}

/// Opens a connection for a configured source. An unknown dialect string
/// fails here rather than at query time.
pub fn connect(source: &ResolvedSourceConfig) -> Result<SourceClient> {
    let kind: DialectKind = source.dialect.parse()?;
    tracing::debug!(base = %source.base_id, dialect = %kind, "connecting source");
    match kind {
        DialectKind::Sqlite3 => connect_sqlite(source),
        DialectKind::Pg => connect_postgres(source),
        DialectKind::Mysql | DialectKind::Mysql2 => connect_mysql(source, kind),
        DialectKind::Mssql | DialectKind::Oracledb | DialectKind::Snowflake | DialectKind::Databricks => {
            Err(no_driver(kind, None))
        }
    }
}

#[cfg(feature = "sqlite")]
fn connect_sqlite(source: &ResolvedSourceConfig) -> Result<SourceClient> {
    use crate::backends::SqliteConnection;
    let target = source
        .connection
        .strip_prefix("sqlite://")
        .unwrap_or(&source.connection);
    let conn = if target.is_empty() || target == ":memory:" {
        SqliteConnection::in_memory()?
    } else {
        SqliteConnection::open(target)?.with_max_concurrency(source.pool.size.max(1))
    };
    Ok(SourceClient::Sqlite(Arc::new(conn)))
}

#[cfg(not(feature = "sqlite"))]
fn connect_sqlite(_source: &ResolvedSourceConfig) -> Result<SourceClient> {
    Err(no_driver(DialectKind::Sqlite3, Some("sqlite")))
}

#[cfg(feature = "postgres")]
fn connect_postgres(source: &ResolvedSourceConfig) -> Result<SourceClient> {
    let conn = crate::backends::PostgresConnection::new(source)?;
    Ok(SourceClient::Postgres(Arc::new(conn)))
}

#[cfg(not(feature = "postgres"))]
fn connect_postgres(_source: &ResolvedSourceConfig) -> Result<SourceClient> {
    Err(no_driver(DialectKind::Pg, Some("postgres")))
}

#[cfg(feature = "mysql")]
fn connect_mysql(source: &ResolvedSourceConfig, kind: DialectKind) -> Result<SourceClient> {
    let conn = crate::backends::MysqlConnection::new(source, kind)?;
    Ok(SourceClient::Mysql(Arc::new(conn)))
}

#[cfg(not(feature = "mysql"))]
fn connect_mysql(_source: &ResolvedSourceConfig, kind: DialectKind) -> Result<SourceClient> {
    Err(no_driver(kind, Some("mysql")))
}

/// Base id to connection. Relation fetches and link mutations route each
/// statement through here to the base that owns the table.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    connections: HashMap<String, Arc<dyn BackendConnection>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects every source in the config.
    pub fn from_config(config: &MetaqueryConfig) -> Result<Self> {
        let mut registry = Self::new();
        for base_id in config.sources.keys() {
            let source = config.for_source(base_id)?;
            registry.insert(base_id.clone(), connect(&source)?.connection());
        }
        tracing::info!(sources = registry.len(), "source registry ready");
        Ok(registry)
    }

    pub fn insert(&mut self, base_id: impl Into<String>, conn: Arc<dyn BackendConnection>) {
        self.connections.insert(base_id.into(), conn);
    }

    pub fn get(&self, base_id: &str) -> Result<Arc<dyn BackendConnection>> {
        self.connections
            .get(base_id)
            .cloned()
            .ok_or_else(|| MetaqueryError::not_found("source", base_id))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
