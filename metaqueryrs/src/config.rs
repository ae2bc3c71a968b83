//! Configuration system for metaquery.
//!
//! Supports TOML-based configuration with global defaults and per-source overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dialect::OptimisedQueryMode;
use crate::error::{MetaqueryError, Result};

/// Env var that forces the portable multi-step plan everywhere.
pub const DISABLE_OPTIMISED_QUERY_ENV: &str = "METAQUERY_DISABLE_OPTIMISED_QUERY";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MetaqueryConfig {
    /// Global defaults applied to all sources unless overridden.
    pub defaults: GlobalDefaults,

    /// Per-source configuration keyed by base id.
    #[serde(default)]
    pub sources: HashMap<String, SourceConfig>,
}

/// Global default settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalDefaults {
    pub query: QueryConfig,
    pub pool: PoolConfig,
    pub meta_cache: MetaCacheConfig,
    pub fanout: FanoutConfig,
}

/// Query compilation and execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Page size when the request does not name one (default: 25).
    pub default_page_size: u64,
    /// Upper bound on any requested page size (default: 1000).
    pub max_page_size: u64,
    /// Query timeout in milliseconds (0 = none).
    pub timeout_ms: u64,
    /// Plan gate override.
    pub optimised_query: OptimisedQueryMode,
    /// Offset applied to "now" for relative date filters.
    pub timezone_offset_minutes: i32,
}

/// Connection pooling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum pool size (default: 8).
    pub size: usize,
    /// Wait for a pooled connection, in seconds (default: 30).
    pub timeout_secs: u64,
}

/// Metadata cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetaCacheConfig {
    /// Cache TTL in seconds (default: 300).
    pub ttl_secs: u64,
    /// Maximum cached snapshots (default: 1000).
    pub max_size: usize,
}

/// Bounded fan-out configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Maximum concurrent sub-tasks (default: 8).
    pub concurrency: usize,
}

/// Per-source configuration (can override globals).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Connection-factory string: `pg`, `mysql2`, `sqlite3`, ...
    pub dialect: String,
    /// Connection URL, or a file path for SQLite.
    pub connection: String,
    pub schema: Option<String>,
    pub query: Option<QueryConfig>,
    pub pool: Option<PoolConfig>,
    pub optimised_query: Option<OptimisedQueryMode>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: 25,
            max_page_size: 1000,
            timeout_ms: 0,
            optimised_query: OptimisedQueryMode::Auto,
            timezone_offset_minutes: 0,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 8,
            timeout_secs: 30,
        }
    }
}

impl Default for MetaCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_size: 1000,
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

impl QueryConfig {
    /// Clamps a requested page size into `1..=max_page_size`.
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        let size = requested.unwrap_or(self.default_page_size).max(1);
        if self.max_page_size > 0 {
            size.min(self.max_page_size)
        } else {
            size
        }
    }

    /// The plan gate mode after the env escape hatch is applied.
    pub fn effective_optimised_query(&self) -> OptimisedQueryMode {
        let disabled = std::env::var(DISABLE_OPTIMISED_QUERY_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if disabled {
            OptimisedQueryMode::Never
        } else {
            self.optimised_query
        }
    }
}

impl MetaqueryConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MetaqueryError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| MetaqueryError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `METAQUERY_CONFIG` environment variable
    /// 2. `./metaquery.toml` (current directory)
    /// 3. `~/.config/metaquery/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("METAQUERY_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from METAQUERY_CONFIG");
                    return cfg;
                }
                Err(err) => tracing::warn!(path = %path, error = %err, "ignoring METAQUERY_CONFIG"),
            }
        }

        if let Ok(cfg) = Self::from_file("metaquery.toml") {
            tracing::info!("loaded config from ./metaquery.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("metaquery").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Resolved config for a source. Unknown base ids fail: a source must
    /// be configured before anything can connect to it.
    pub fn for_source(&self, base_id: &str) -> Result<ResolvedSourceConfig> {
        let source = self
            .sources
            .get(base_id)
            .ok_or_else(|| MetaqueryError::Config(format!("no source configured for base '{base_id}'")))?;
        Ok(ResolvedSourceConfig::merge(base_id, &self.defaults, source))
    }

    /// Query settings for a base, falling back to defaults when the base has no entry.
    pub fn query_for(&self, base_id: &str) -> QueryConfig {
        self.sources
            .get(base_id)
            .and_then(|s| s.query.clone())
            .unwrap_or_else(|| self.defaults.query.clone())
    }
}

/// Fully resolved configuration for a source (no Option fields besides schema).
#[derive(Debug, Clone)]
pub struct ResolvedSourceConfig {
    pub base_id: String,
    pub dialect: String,
    pub connection: String,
    pub schema: Option<String>,
    pub query: QueryConfig,
    pub pool: PoolConfig,
}

impl ResolvedSourceConfig {
    fn merge(base_id: &str, defaults: &GlobalDefaults, source: &SourceConfig) -> Self {
        let mut query = source.query.clone().unwrap_or_else(|| defaults.query.clone());
        if let Some(mode) = source.optimised_query {
            query.optimised_query = mode;
        }
        Self {
            base_id: base_id.to_string(),
            dialect: source.dialect.clone(),
            connection: source.connection.clone(),
            schema: source.schema.clone(),
            query,
            pool: source.pool.clone().unwrap_or_else(|| defaults.pool.clone()),
        }
    }

    /// A standalone source with default settings.
    pub fn new(
        base_id: impl Into<String>,
        dialect: impl Into<String>,
        connection: impl Into<String>,
    ) -> Self {
        Self {
            base_id: base_id.into(),
            dialect: dialect.into(),
            connection: connection.into(),
            schema: None,
            query: QueryConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = MetaqueryConfig::default();
        assert_eq!(cfg.defaults.query.default_page_size, 25);
        assert_eq!(cfg.defaults.pool.size, 8);
        assert_eq!(cfg.defaults.meta_cache.ttl_secs, 300);
        assert_eq!(cfg.defaults.fanout.concurrency, 8);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[defaults.query]
max_page_size = 200
optimised_query = "never"

[defaults.meta_cache]
ttl_secs = 60

[sources.b1]
dialect = "pg"
connection = "postgres://localhost/app"
schema = "public"
"#;
        let cfg = MetaqueryConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.defaults.query.max_page_size, 200);
        assert_eq!(cfg.defaults.meta_cache.ttl_secs, 60);

        let resolved = cfg.for_source("b1").unwrap();
        assert_eq!(resolved.dialect, "pg");
        assert_eq!(resolved.schema.as_deref(), Some("public"));
        assert_eq!(resolved.query.optimised_query, OptimisedQueryMode::Never);
    }

    #[test]
    fn test_source_override() {
        let toml = r#"
[defaults.pool]
size = 4

[sources.prod]
dialect = "mysql2"
connection = "mysql://db/prod"
optimised_query = "always"

[sources.prod.pool]
size = 32

[sources.local]
dialect = "sqlite3"
connection = "local.db"
"#;
        let cfg = MetaqueryConfig::from_toml(toml).unwrap();
        let prod = cfg.for_source("prod").unwrap();
        assert_eq!(prod.pool.size, 32);
        assert_eq!(prod.query.optimised_query, OptimisedQueryMode::Always);

        let local = cfg.for_source("local").unwrap();
        assert_eq!(local.pool.size, 4);
        assert_eq!(local.query.optimised_query, OptimisedQueryMode::Auto);

        assert!(matches!(cfg.for_source("missing"), Err(MetaqueryError::Config(_))));
    }

    #[test]
    fn page_size_is_clamped() {
        let query = QueryConfig {
            max_page_size: 100,
            ..Default::default()
        };
        assert_eq!(query.page_size(None), 25);
        assert_eq!(query.page_size(Some(0)), 1);
        assert_eq!(query.page_size(Some(5000)), 100);
    }
}
