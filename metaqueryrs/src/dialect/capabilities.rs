//! Per-dialect capability table.

use serde::{Deserialize, Serialize};

use super::DialectKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectCapabilities {
    /// Single-query plan with JSON-aggregated relation lists.
    pub optimised_query: bool,
    pub json_aggregation: bool,
    pub ilike: bool,
    /// Pagination through `OFFSET .. FETCH` instead of `LIMIT`.
    pub offset_fetch: bool,
    pub boolean_type: bool,
}

const PG: DialectCapabilities = DialectCapabilities {
    optimised_query: true,
    json_aggregation: true,
    ilike: true,
    offset_fetch: false,
    boolean_type: true,
};

const MYSQL: DialectCapabilities = DialectCapabilities {
    optimised_query: true,
    json_aggregation: true,
    ilike: false,
    offset_fetch: false,
    boolean_type: false,
};

const SQLITE: DialectCapabilities = DialectCapabilities {
    optimised_query: false,
    json_aggregation: true,
    ilike: false,
    offset_fetch: false,
    boolean_type: false,
};

const MSSQL: DialectCapabilities = DialectCapabilities {
    optimised_query: false,
    json_aggregation: false,
    ilike: false,
    offset_fetch: true,
    boolean_type: false,
};

const ORACLE: DialectCapabilities = DialectCapabilities {
    optimised_query: false,
    json_aggregation: true,
    ilike: false,
    offset_fetch: true,
    boolean_type: false,
};

const SNOWFLAKE: DialectCapabilities = DialectCapabilities {
    optimised_query: false,
    json_aggregation: true,
    ilike: true,
    offset_fetch: false,
    boolean_type: true,
};

const DATABRICKS: DialectCapabilities = DialectCapabilities {
    optimised_query: false,
    json_aggregation: true,
    ilike: true,
    offset_fetch: false,
    boolean_type: true,
};

pub(super) fn capabilities(kind: DialectKind) -> &'static DialectCapabilities {
    match kind {
        DialectKind::Pg => &PG,
        DialectKind::Mysql | DialectKind::Mysql2 => &MYSQL,
        DialectKind::Sqlite3 => &SQLITE,
        DialectKind::Mssql => &MSSQL,
        DialectKind::Oracledb => &ORACLE,
        DialectKind::Snowflake => &SNOWFLAKE,
        DialectKind::Databricks => &DATABRICKS,
    }
}

/// Configured override of the plan gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimisedQueryMode {
    /// Follow the capability table.
    #[default]
    Auto,
    /// Use the single-query plan wherever JSON aggregation exists.
    Always,
    /// Always use the multi-step plan.
    Never,
}

/// Whether a compiled query may use the single-query plan.
pub fn can_use_optimised_query(kind: DialectKind, mode: OptimisedQueryMode) -> bool {
    let caps = capabilities(kind);
    match mode {
        OptimisedQueryMode::Auto => caps.optimised_query,
        OptimisedQueryMode::Always => caps.json_aggregation,
        OptimisedQueryMode::Never => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimised_plan_limited_to_pg_and_mysql() {
        let allowed: Vec<DialectKind> = DialectKind::ALL
            .into_iter()
            .filter(|k| can_use_optimised_query(*k, OptimisedQueryMode::Auto))
            .collect();
        assert_eq!(
            allowed,
            vec![DialectKind::Pg, DialectKind::Mysql, DialectKind::Mysql2]
        );
    }

    #[test]
    fn override_modes() {
        assert!(!can_use_optimised_query(DialectKind::Pg, OptimisedQueryMode::Never));
        assert!(can_use_optimised_query(DialectKind::Sqlite3, OptimisedQueryMode::Always));
        assert!(!can_use_optimised_query(DialectKind::Mssql, OptimisedQueryMode::Always));
    }
}
