//! Query compiler: metadata plus a list request in, one `SelectQuery` out.
//!
//! Compilation runs in two stages. `resolve_view` loads the model, the view
//! and every model the relation columns reach; it is the only async part.
//! `QueryCompiler::compile` is pure and works off the pinned snapshots.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::dialect::{can_use_optimised_query, DialectKind};
use crate::error::{MetaqueryError, Result};
use crate::field_handler::{FilterContext, HandlerRegistry};
use crate::meta_cache::{MetaResolver, ModelLookup};
use crate::models::{Filter, Model, Sort, Uidt, View};
use crate::pagination::{compute_query_hash, Cursor};
use crate::rollup::{AliasGenerator, RelationCompiler, RelationFetch};
use crate::sql_ast::{SelectItem, SelectQuery, SqlRenderer, TableRef};

mod columns;
mod filters;
mod sorts;

use columns::{resolve_columns, visible_columns, Projected, Projection};
use filters::FilterCompiler;
use sorts::resolve_sorts;

/// Alias of the root table in every compiled query.
pub const ROOT_ALIAS: &str = "t";

/// One page of rows from a model, optionally through a view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub model_id: String,
    #[serde(default)]
    pub view_id: Option<String>,
    /// ANDed after the view's own filters.
    #[serde(default)]
    pub filters: Vec<Filter>,
    /// Take precedence over the view's sorts.
    #[serde(default)]
    pub sorts: Vec<Sort>,
    /// Restrict output to these column ids or titles.
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    /// Opaque cursor from a previous page; wins over `offset`.
    #[serde(default)]
    pub cursor: Option<String>,
}

impl ListRequest {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    pub fn with_view(mut self, view_id: impl Into<String>) -> Self {
        self.view_id = Some(view_id.into());
        self
    }
}

/// Whether list relations are aggregated in SQL or fetched in follow-up steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Optimised,
    Portable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// Read from the main query under the column's alias.
    Select,
    /// Filled from `relation_fetches[i]`.
    Fetch(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub column_id: String,
    pub title: String,
    pub alias: String,
    pub uidt: Uidt,
    /// Selected for row identity only.
    pub hidden: bool,
    pub source: ColumnSource,
}

/// A column left out of the SELECT, with the reason to show inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnError {
    pub column_id: String,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    pub page_size: u64,
    pub offset: u64,
    pub query_hash: u64,
}

impl PageInfo {
    /// Offset of the page after this one.
    pub fn next_offset(&self) -> u64 {
        self.offset.saturating_add(self.page_size)
    }
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub base_id: String,
    pub dialect: DialectKind,
    pub query: SelectQuery,
    pub sql: String,
    pub plan: PlanKind,
    pub columns: Vec<OutputColumn>,
    pub column_errors: Vec<ColumnError>,
    pub relation_fetches: Vec<RelationFetch>,
    pub page: PageInfo,
}

/// ResolveView: load the model and view, then every model reachable through
/// the model's relation columns, so compilation never waits on the store.
pub async fn resolve_view(
    resolver: &MetaResolver,
    request: &ListRequest,
) -> Result<(Arc<Model>, Option<Arc<View>>)> {
    let model = resolver.model(&request.model_id).await?;
    let view = match &request.view_id {
        Some(view_id) => {
            let view = resolver.view(view_id).await?;
            if view.meta.model_id != model.id {
                return Err(MetaqueryError::Validation(format!(
                    "view '{}' does not belong to table '{}'",
                    view.meta.title, model.title
                )));
            }
            Some(view)
        }
        None => None,
    };
    resolver.resolve_relation_graph(&model).await?;
    Ok((model, view))
}

pub struct QueryCompiler<'a> {
    models: &'a dyn ModelLookup,
    handlers: &'a HandlerRegistry,
    dialect: DialectKind,
    config: &'a QueryConfig,
    now: DateTime<FixedOffset>,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(
        models: &'a dyn ModelLookup,
        handlers: &'a HandlerRegistry,
        dialect: DialectKind,
        config: &'a QueryConfig,
    ) -> Self {
        let offset = FixedOffset::east_opt(config.timezone_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Self {
            models,
            handlers,
            dialect,
            config,
            now: Utc::now().with_timezone(&offset),
        }
    }

    /// Pins "now" for relative date filters.
    pub fn with_now(mut self, now: DateTime<FixedOffset>) -> Self {
        self.now = now;
        self
    }

    pub fn plan(&self) -> PlanKind {
        if can_use_optimised_query(self.dialect, self.config.effective_optimised_query()) {
            PlanKind::Optimised
        } else {
            PlanKind::Portable
        }
    }

    pub fn compile(&self, model: &Arc<Model>, view: Option<&View>, request: &ListRequest) -> Result<CompiledQuery> {
        let query_hash = compute_query_hash(request);
        let offset = match &request.cursor {
            Some(encoded) => {
                let cursor = Cursor::decode(encoded)?;
                cursor.validate_query_hash(query_hash)?;
                cursor.offset
            }
            None => request.offset.unwrap_or(0),
        };
        let page_size = self.config.page_size(request.page_size);
        let plan = self.plan();

        let aliases = AliasGenerator::new();
        let relations = RelationCompiler::new(self.models, &aliases);
        let mut projection = Projection::new(&relations, model, ROOT_ALIAS, plan);

        let mut query = SelectQuery {
            from: TableRef::new(&model.table_name, ROOT_ALIAS),
            ..Default::default()
        };
        let mut columns = Vec::new();
        let mut column_errors = Vec::new();
        let mut relation_fetches = Vec::new();

        for resolved in resolve_columns(model, view, request.fields.as_deref())? {
            let column = resolved.column;
            let source = match projection.value(column) {
                Ok(Projected::Sql(expr)) => {
                    query.select.push(SelectItem::aliased(expr, &column.title));
                    ColumnSource::Select
                }
                Ok(Projected::Fetch(fetch, outer)) => {
                    query.select.push(SelectItem::aliased(outer, &fetch.outer_key));
                    relation_fetches.push(fetch);
                    ColumnSource::Fetch(relation_fetches.len() - 1)
                }
                Err(err @ MetaqueryError::Sql(_)) => return Err(err),
                Err(err) => {
                    tracing::debug!(column = %column.title, error = %err, "column left out of select");
                    column_errors.push(ColumnError {
                        column_id: column.id.clone(),
                        title: column.title.clone(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            columns.push(OutputColumn {
                column_id: column.id.clone(),
                title: column.title.clone(),
                alias: column.title.clone(),
                uidt: column.uidt,
                hidden: resolved.hidden,
                source,
            });
        }

        let filters: Vec<&Filter> = view
            .map(|v| v.filters.iter())
            .into_iter()
            .flatten()
            .chain(request.filters.iter())
            .collect();
        let ctx = FilterContext::new(self.dialect.dialect()).with_now(self.now);
        query.filters = FilterCompiler::new(&relations, self.handlers, self.dialect, ctx)
            .compile(model, ROOT_ALIAS, &filters)?;

        let visible = visible_columns(model, view);
        query.order_by = resolve_sorts(&mut projection, model, view, &request.sorts, &visible, ROOT_ALIAS)?;

        query.joins = projection.into_joins();
        // One extra row tells the executor whether another page exists.
        query.limit = Some(page_size.saturating_add(1));
        query.offset = (offset > 0).then_some(offset);

        let sql = SqlRenderer::new(self.dialect.dialect()).render_select(&query);
        tracing::debug!(
            model = %model.title,
            dialect = %self.dialect,
            plan = ?plan,
            columns = columns.len(),
            fetches = relation_fetches.len(),
            "compiled list query"
        );
        Ok(CompiledQuery {
            base_id: model.base_id.clone(),
            dialect: self.dialect,
            query,
            sql,
            plan,
            columns,
            column_errors,
            relation_fetches,
            page: PageInfo {
                page_size,
                offset,
                query_hash,
            },
        })
    }
}
