//! SQL dialect abstractions for the supported backends.
//!
//! Each dialect lives in its own file. A dialect maps generic function tokens
//! and logical constructs to SQL fragments; expression tree walking lives in
//! [`crate::sql_ast::SqlRenderer`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MetaqueryError, Result};
use crate::models::{RollupFunction, Uidt};

mod capabilities;
mod databricks;
pub mod helpers;
mod mssql;
mod mysql;
mod oracle;
mod postgres;
mod snowflake;
mod sqlite;

pub use capabilities::{can_use_optimised_query, DialectCapabilities, OptimisedQueryMode};
pub use databricks::DatabricksDialect;
pub use mssql::MssqlDialect;
pub use mysql::MysqlDialect;
pub use oracle::OracleDialect;
pub use postgres::PostgresDialect;
pub use snowflake::SnowflakeDialect;
pub use sqlite::SqliteDialect;

/// Connection-factory name of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Pg,
    Mysql,
    Mysql2,
    Sqlite3,
    Mssql,
    Oracledb,
    Snowflake,
    Databricks,
}

static PG: PostgresDialect = PostgresDialect;
static MYSQL: MysqlDialect = MysqlDialect::new(DialectKind::Mysql);
static MYSQL2: MysqlDialect = MysqlDialect::new(DialectKind::Mysql2);
static SQLITE: SqliteDialect = SqliteDialect;
static MSSQL: MssqlDialect = MssqlDialect;
static ORACLE: OracleDialect = OracleDialect;
static SNOWFLAKE: SnowflakeDialect = SnowflakeDialect;
static DATABRICKS: DatabricksDialect = DatabricksDialect;

impl DialectKind {
    pub const ALL: [DialectKind; 8] = [
        DialectKind::Pg,
        DialectKind::Mysql,
        DialectKind::Mysql2,
        DialectKind::Sqlite3,
        DialectKind::Mssql,
        DialectKind::Oracledb,
        DialectKind::Snowflake,
        DialectKind::Databricks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::Pg => "pg",
            DialectKind::Mysql => "mysql",
            DialectKind::Mysql2 => "mysql2",
            DialectKind::Sqlite3 => "sqlite3",
            DialectKind::Mssql => "mssql",
            DialectKind::Oracledb => "oracledb",
            DialectKind::Snowflake => "snowflake",
            DialectKind::Databricks => "databricks",
        }
    }

    /// Collapses driver variants that share SQL syntax.
    pub fn family(&self) -> DialectKind {
        match self {
            DialectKind::Mysql2 => DialectKind::Mysql,
            other => *other,
        }
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            DialectKind::Pg => &PG,
            DialectKind::Mysql => &MYSQL,
            DialectKind::Mysql2 => &MYSQL2,
            DialectKind::Sqlite3 => &SQLITE,
            DialectKind::Mssql => &MSSQL,
            DialectKind::Oracledb => &ORACLE,
            DialectKind::Snowflake => &SNOWFLAKE,
            DialectKind::Databricks => &DATABRICKS,
        }
    }

    pub fn capabilities(&self) -> &'static DialectCapabilities {
        capabilities::capabilities(*self)
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = MetaqueryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pg" | "postgres" | "postgresql" => Ok(DialectKind::Pg),
            "mysql" => Ok(DialectKind::Mysql),
            "mysql2" => Ok(DialectKind::Mysql2),
            "sqlite3" | "sqlite" => Ok(DialectKind::Sqlite3),
            "mssql" => Ok(DialectKind::Mssql),
            "oracledb" | "oracle" => Ok(DialectKind::Oracledb),
            "snowflake" => Ok(DialectKind::Snowflake),
            "databricks" => Ok(DialectKind::Databricks),
            _ => Err(MetaqueryError::UnsupportedDialect(s.to_string())),
        }
    }
}

/// `functionName(token, dialect)`: the dialect's name for a generic function token.
pub fn function_name(token: &str, kind: DialectKind) -> String {
    kind.dialect().function_name(token)
}

/// Dialects render identifiers and primitive expression pieces.
pub trait Dialect: Send + Sync + fmt::Debug {
    fn kind(&self) -> DialectKind;

    fn quote_ident(&self, ident: &str) -> String;

    fn qualify_table(&self, table: &str) -> String {
        self.quote_ident(table)
    }

    /// Override table for generic function tokens. Lookup is case-insensitive.
    fn function_overrides(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }

    fn function_name(&self, token: &str) -> String {
        self.function_overrides()
            .iter()
            .find(|(generic, _)| generic.eq_ignore_ascii_case(token))
            .map(|(_, native)| native.to_string())
            .unwrap_or_else(|| token.to_string())
    }

    /// Whole-call rewrite for functions whose argument shape differs per dialect.
    fn rewrite_call(&self, _token: &str, _args: &[String]) -> Option<String> {
        None
    }

    fn time_format(&self) -> &'static str {
        "HH:mm:ss"
    }

    fn date_time_format(&self) -> &'static str {
        "YYYY-MM-DD HH:mm:ssZ"
    }

    /// Native column type for a stored uidt; `None` for computed columns.
    fn native_type(&self, uidt: Uidt) -> Option<&'static str>;

    fn type_mapping(&self) -> HashMap<Uidt, &'static str> {
        Uidt::ALL
            .iter()
            .filter_map(|uidt| self.native_type(*uidt).map(|ty| (*uidt, ty)))
            .collect()
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn render_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.format_bool(*b).to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => helpers::quote_string_single(s),
            Value::Array(items) => {
                let rendered: Vec<String> = items.iter().map(|v| self.render_literal(v)).collect();
                rendered.join(", ")
            }
            Value::Object(_) => helpers::quote_string_single(&value.to_string()),
        }
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        helpers::limit_offset_standard(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        false
    }

    fn render_concat(&self, args: &[String]) -> String {
        format!("({})", args.join(" || "))
    }

    fn render_cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS VARCHAR)")
    }

    fn render_cast_numeric(&self, expr: &str) -> String {
        format!("CAST({expr} AS DECIMAL)")
    }

    /// Date part of a date or timestamp expression.
    fn render_date_of(&self, expr: &str) -> String {
        format!("CAST({expr} AS DATE)")
    }

    /// Case-insensitive LIKE. Dialects without ILIKE lower both sides.
    fn render_like(&self, expr: &str, pattern: &str, negated: bool) -> String {
        let not_kw = if negated { "NOT " } else { "" };
        format!("LOWER({expr}) {not_kw}LIKE LOWER({pattern})")
    }

    fn render_aggregation(&self, func: RollupFunction, expr: &str) -> String {
        helpers::aggregation_standard(func, expr)
    }

    /// JSON array of the aggregated values, when the dialect can build one.
    fn render_json_array_agg(&self, _expr: &str) -> Option<String> {
        None
    }

    fn render_group_concat(&self, expr: &str) -> String {
        format!("LISTAGG({expr}, ',')")
    }

    fn current_timestamp(&self) -> &'static str {
        "CURRENT_TIMESTAMP"
    }
}
