//! `DataService`: the list and link entry points a host API calls.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::MetaqueryConfig;
use crate::error::{MetaqueryError, Result};
use crate::executor::QueryExecutor;
use crate::field_handler::HandlerRegistry;
use crate::links::{resolve_link_info, LinkOutcome, LinkResolver};
use crate::meta_cache::{Invalidation, MetaCache, MetaResolver};
use crate::meta_store::MetaStore;
use crate::models::{LinkRequest, Model};
use crate::pagination::Cursor;
use crate::query_builder::{resolve_view, ColumnError, CompiledQuery, ListRequest, QueryCompiler};
use crate::sources::SourceRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub page_size: u64,
    pub offset: u64,
    pub is_last_page: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    /// Rows keyed by column title, in output column order.
    pub list: Vec<Map<String, Value>>,
    pub page_info: PageResult,
    pub column_errors: Vec<ColumnError>,
}

pub struct DataService {
    cache: Arc<MetaCache>,
    store: Arc<dyn MetaStore>,
    sources: SourceRegistry,
    handlers: HandlerRegistry,
    config: MetaqueryConfig,
}

impl DataService {
    pub fn new(store: Arc<dyn MetaStore>, sources: SourceRegistry, config: MetaqueryConfig) -> Self {
        let cache = Arc::new(MetaCache::new("data", &config.defaults.meta_cache));
        Self {
            cache,
            store,
            sources,
            handlers: HandlerRegistry::standard(),
            config,
        }
    }

    /// Shares a process-wide cache instead of owning one.
    pub fn with_cache(mut self, cache: Arc<MetaCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn cache(&self) -> &Arc<MetaCache> {
        &self.cache
    }

    pub fn sources(&self) -> &SourceRegistry {
        &self.sources
    }

    /// A fresh request-scoped resolver; snapshots are pinned per request.
    pub fn resolver(&self) -> MetaResolver {
        MetaResolver::new(self.cache.clone(), self.store.clone())
            .with_concurrency(self.config.defaults.fanout.concurrency)
    }

    pub async fn compile(&self, request: &ListRequest) -> Result<(Arc<Model>, CompiledQuery)> {
        let resolver = self.resolver();
        let (model, view) = resolve_view(&resolver, request).await?;
        let dialect = self.sources.get(&model.base_id)?.dialect().kind();
        let query_config = self.config.query_for(&model.base_id);
        let compiled = QueryCompiler::new(&resolver, &self.handlers, dialect, &query_config).compile(
            &model,
            view.as_deref(),
            request,
        )?;
        tracing::debug!(sql = %compiled.sql, "list sql");
        Ok((model, compiled))
    }

    /// Compiles, executes and shapes one page.
    pub async fn list(&self, request: &ListRequest) -> Result<ListResponse> {
        let (model, compiled) = self.compile(request).await?;
        let query_config = self.config.query_for(&model.base_id);
        let page = QueryExecutor::new(&self.sources, self.config.defaults.fanout.concurrency)
            .with_timeout_ms(query_config.timeout_ms)
            .run(&compiled)
            .await?;

        let dialect = compiled.dialect;
        let list = page
            .rows
            .into_iter()
            .map(|mut raw| {
                let mut shaped = Map::new();
                for out in &compiled.columns {
                    let value = raw.remove(&out.alias).unwrap_or(Value::Null);
                    let value = match model.column(&out.column_id) {
                        Some(column) => self.handlers.handler_for(column, dialect).parse_value(&value, column),
                        None => value,
                    };
                    shaped.insert(out.title.clone(), value);
                }
                shaped
            })
            .collect();

        let next_cursor = if page.has_more {
            Some(Cursor::new(compiled.page.next_offset(), compiled.page.query_hash).encode()?)
        } else {
            None
        };
        Ok(ListResponse {
            list,
            page_info: PageResult {
                page_size: compiled.page.page_size,
                offset: compiled.page.offset,
                is_last_page: !page.has_more,
                next_cursor,
            },
            column_errors: compiled.column_errors,
        })
    }

    /// Applies `request.links`.
    pub async fn link(&self, request: &LinkRequest) -> Result<LinkOutcome> {
        let (resolver, info) = self.link_info(request).await?;
        LinkResolver::new(&self.sources, resolver.concurrency())
            .link(&info, &request.links)
            .await
    }

    /// Applies `request.unlinks`.
    pub async fn unlink(&self, request: &LinkRequest) -> Result<LinkOutcome> {
        let (resolver, info) = self.link_info(request).await?;
        LinkResolver::new(&self.sources, resolver.concurrency())
            .unlink(&info, &request.unlinks)
            .await
    }

    async fn link_info(&self, request: &LinkRequest) -> Result<(MetaResolver, crate::links::LinkInfo)> {
        let resolver = self.resolver();
        let model = resolver.model(&request.model_id).await?;
        let column = model
            .column(&request.column_id)
            .ok_or_else(|| MetaqueryError::not_found("column", request.column_id.clone()))?;
        let info = resolve_link_info(&resolver, &model, column).await?;
        Ok((resolver, info))
    }

    /// Runs a structural mutation and invalidates cached metadata once it
    /// has committed.
    pub async fn invalidate_after_commit<F, T>(&self, commit: F, targets: &[Invalidation]) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.cache.invalidate_after_commit(commit, targets).await
    }
}
