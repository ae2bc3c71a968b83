//! Runs compiled list queries and their relation fetches.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::error::{MetaqueryError, Result};
use crate::fanout::try_for_each_bounded;
use crate::query_builder::CompiledQuery;
use crate::rollup::{fold_fetched, key_of, RelationFetch, FETCH_KEY, FETCH_VALUE};
use crate::sources::SourceRegistry;
use crate::sql_ast::SqlRenderer;

/// Keys bound into one fetch statement.
const FETCH_CHUNK: usize = 500;

#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Map<String, Value>>,
}

/// Rows of one page, keyed by column title, before handler shaping.
#[derive(Debug, Clone, Default)]
pub struct PageRows {
    pub rows: Vec<Map<String, Value>>,
    pub has_more: bool,
}

pub struct QueryExecutor<'a> {
    sources: &'a SourceRegistry,
    concurrency: usize,
    timeout: Option<Duration>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(sources: &'a SourceRegistry, concurrency: usize) -> Self {
        Self {
            sources,
            concurrency: concurrency.max(1),
            timeout: None,
        }
    }

    /// Per-statement timeout; 0 disables it.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
        self
    }

    pub async fn run(&self, compiled: &CompiledQuery) -> Result<PageRows> {
        let start = Instant::now();
        let conn = self.sources.get(&compiled.base_id)?;
        let result = self.timed(&compiled.sql, conn.execute_sql(&compiled.sql)).await?;

        let mut rows = result.rows;
        let page_size = usize::try_from(compiled.page.page_size).unwrap_or(usize::MAX);
        let has_more = rows.len() > page_size;
        rows.truncate(page_size);

        if !compiled.relation_fetches.is_empty() && !rows.is_empty() {
            let fetched = try_for_each_bounded(self.concurrency, &compiled.relation_fetches, |fetch| {
                let rows = &rows;
                async move { self.fetch(fetch, rows).await }
            })
            .await?;
            for (fetch, by_key) in compiled.relation_fetches.iter().zip(fetched) {
                for row in rows.iter_mut() {
                    let values = row
                        .remove(&fetch.outer_key)
                        .as_ref()
                        .and_then(key_of)
                        .and_then(|key| by_key.get(&key).cloned())
                        .unwrap_or_default();
                    row.insert(fetch.title.clone(), fold_fetched(fetch.kind, values));
                }
            }
        }

        tracing::info!(
            base = %compiled.base_id,
            rows = rows.len(),
            fetches = compiled.relation_fetches.len(),
            has_more,
            ms = start.elapsed().as_millis(),
            "list page executed"
        );
        Ok(PageRows { rows, has_more })
    }

    /// Related values per outer key. Each step maps the keys reached so far
    /// to the next ones; the last step yields the values themselves.
    async fn fetch(&self, fetch: &RelationFetch, rows: &[Map<String, Value>]) -> Result<HashMap<String, Vec<Value>>> {
        let mut reached: HashMap<String, Vec<Value>> = HashMap::new();
        for row in rows {
            if let Some(outer) = row.get(&fetch.outer_key).filter(|v| !v.is_null()) {
                if let Some(key) = key_of(outer) {
                    reached.entry(key).or_insert_with(|| vec![outer.clone()]);
                }
            }
        }

        for step in &fetch.steps {
            let mut seen = HashSet::new();
            let frontier: Vec<Value> = reached
                .values()
                .flatten()
                .filter(|v| key_of(v).is_some_and(|k| seen.insert(k)))
                .cloned()
                .collect();
            if frontier.is_empty() {
                reached.values_mut().for_each(Vec::clear);
                break;
            }

            let conn = self.sources.get(&step.base_id)?;
            let renderer = SqlRenderer::new(conn.dialect());
            let mut next: HashMap<String, Vec<Value>> = HashMap::new();
            for chunk in frontier.chunks(FETCH_CHUNK) {
                let sql = renderer.render_select(&step.query_for(chunk));
                let result = self.timed(&sql, conn.execute_sql(&sql)).await?;
                for mut row in result.rows {
                    let Some(key) = row.get(FETCH_KEY).and_then(key_of) else {
                        continue;
                    };
                    let value = row.remove(FETCH_VALUE).unwrap_or(Value::Null);
                    next.entry(key).or_default().push(value);
                }
            }

            for values in reached.values_mut() {
                *values = values
                    .iter()
                    .filter_map(key_of)
                    .flat_map(|k| next.get(&k).cloned().unwrap_or_default())
                    .collect();
            }
        }
        tracing::trace!(column = %fetch.title, keys = reached.len(), "relation fetch done");
        Ok(reached)
    }

    async fn timed<T>(&self, sql: &str, work: impl Future<Output = Result<T>>) -> Result<T> {
        match self.timeout {
            None => work.await,
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                tracing::warn!(sql = %sql, ms = limit.as_millis(), "query timed out");
                MetaqueryError::Execution(format!("query timed out after {} ms", limit.as_millis()))
            })?,
        }
    }
}
