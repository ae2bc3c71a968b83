//! Rollup, lookup and relation-count compilation.
//!
//! Every relation column becomes a correlated subquery over the related rows
//! of the outer row, so formulas and filters that reference relation data stay
//! a single SQL expression. Relations whose rows live in another base cannot
//! be correlated; those are planned as [`RelationFetch`] follow-up steps and
//! folded in memory with [`aggregate_values`].

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Number, Value};

use crate::error::{MetaqueryError, Result};
use crate::formula::{ColumnResolver, FormulaCompiler, FormulaError, FormulaType};
use crate::links::{find_column, get_link_info, LinkInfo};
use crate::meta_cache::ModelLookup;
use crate::models::{ColOptions, Column, Model, RelationType, RollupFunction, Uidt};
use crate::sql_ast::{Join, SelectItem, SelectQuery, SqlExpr, SqlJoinType, TableRef};

const MAX_RELATION_DEPTH: usize = 8;

/// Output aliases of a relation fetch step.
pub const FETCH_KEY: &str = "__key";
pub const FETCH_VALUE: &str = "__value";

/// Per-query generator of unique table aliases.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    next: Cell<usize>,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, prefix: &str) -> String {
        let n = self.next.get() + 1;
        self.next.set(n);
        format!("{prefix}{n}")
    }
}

/// How the many values of a has-many or many-to-many relation become one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListShape {
    Aggregate(RollupFunction),
    JsonArray,
    Concat,
}

impl ListShape {
    fn fold(self, expr: SqlExpr) -> SqlExpr {
        match self {
            ListShape::Aggregate(func) => SqlExpr::Aggregate {
                func,
                expr: Box::new(expr),
            },
            ListShape::JsonArray => SqlExpr::JsonArrayAgg(Box::new(expr)),
            ListShape::Concat => SqlExpr::GroupConcat(Box::new(expr)),
        }
    }

    /// Shape for a nested many-valued column inside an already folded list.
    fn nested(self) -> ListShape {
        match self {
            ListShape::JsonArray => ListShape::Concat,
            other => other,
        }
    }
}

/// Builds SQL for computed columns of already-resolved models.
pub struct RelationCompiler<'a> {
    models: &'a dyn ModelLookup,
    aliases: &'a AliasGenerator,
    depth: Cell<usize>,
}

impl<'a> RelationCompiler<'a> {
    pub fn new(models: &'a dyn ModelLookup, aliases: &'a AliasGenerator) -> Self {
        Self {
            models,
            aliases,
            depth: Cell::new(0),
        }
    }

    pub fn aliases(&self) -> &'a AliasGenerator {
        self.aliases
    }

    pub fn link_info(&self, model: &Arc<Model>, column: &Column) -> Result<LinkInfo> {
        get_link_info(self.models, model, column)
    }

    /// The relation a lookup or rollup goes through.
    pub fn relation_of(&self, model: &Arc<Model>, column: &Column) -> Result<LinkInfo> {
        let relation_id = match &column.options {
            ColOptions::Lookup(opts) => &opts.relation_column_id,
            ColOptions::Rollup(opts) => &opts.relation_column_id,
            ColOptions::Link(_) => return self.link_info(model, column),
            _ => {
                return Err(MetaqueryError::Validation(format!(
                    "field '{}' is not a relation",
                    column.title
                )))
            }
        };
        let relation = find_column(model, relation_id)?;
        self.link_info(model, relation)
    }

    /// SQL value of `column` for the row of `model` aliased as `alias`.
    /// `shape` folds many-valued relation columns.
    pub fn column_expr(
        &self,
        model: &Arc<Model>,
        alias: &str,
        column: &Column,
        shape: ListShape,
    ) -> Result<SqlExpr> {
        match &column.options {
            ColOptions::Plain | ColOptions::AiField(_) => Ok(SqlExpr::column(alias, &column.column_name)),
            ColOptions::Formula(_) => {
                let scope = FormulaScope {
                    compiler: self,
                    model,
                    alias,
                };
                FormulaCompiler::new(model, &scope)
                    .compile_column(column)
                    .map_err(MetaqueryError::Formula)
            }
            ColOptions::Rollup(_) => self.rollup_expr(model, alias, column),
            ColOptions::Lookup(_) => self.lookup_expr(model, alias, column, shape),
            ColOptions::Link(_) if column.uidt == Uidt::Links => {
                self.links_count_expr(model, alias, column)
            }
            ColOptions::Link(_) => self.ltar_expr(model, alias, column, shape),
            ColOptions::QrCode(opts) => {
                let value = find_column(model, &opts.value_column_id)?;
                self.column_expr(model, alias, value, shape)
            }
            ColOptions::Barcode(opts) => {
                let value = find_column(model, &opts.value_column_id)?;
                self.column_expr(model, alias, value, shape)
            }
            ColOptions::Button(_) => Err(MetaqueryError::Validation(format!(
                "button field '{}' has no value",
                column.title
            ))),
        }
    }

    /// `FROM related [JOIN junction]` correlated to the outer row, plus the
    /// alias of the related table.
    pub fn related_rows(&self, info: &LinkInfo, outer_alias: &str) -> Result<(SelectQuery, String)> {
        let r = self.aliases.next("r");
        let mut query = SelectQuery {
            from: TableRef::new(&info.related.table_name, &r),
            ..Default::default()
        };
        let join = &info.join;
        match info.relation_type {
            RelationType::HasMany => query.filters.push(SqlExpr::eq(
                SqlExpr::column(&r, &join.child.column_name),
                SqlExpr::column(outer_alias, &join.parent.column_name),
            )),
            RelationType::BelongsTo => query.filters.push(SqlExpr::eq(
                SqlExpr::column(&r, &join.parent.column_name),
                SqlExpr::column(outer_alias, &join.child.column_name),
            )),
            RelationType::ManyToMany => {
                let junction = info.junction()?;
                let (Some(jchild), Some(jparent)) = (&join.junction_child, &join.junction_parent) else {
                    return Err(MetaqueryError::Sql(format!(
                        "many-to-many column '{}' is missing its junction columns",
                        info.column.title
                    )));
                };
                let j = self.aliases.next("j");
                query.joins.push(Join {
                    join_type: SqlJoinType::Inner,
                    table: TableRef::new(&junction.table_name, &j),
                    on: vec![SqlExpr::eq(
                        SqlExpr::column(&j, &jparent.column_name),
                        SqlExpr::column(&r, &join.parent.column_name),
                    )],
                });
                query.filters.push(SqlExpr::eq(
                    SqlExpr::column(&j, &jchild.column_name),
                    SqlExpr::column(outer_alias, &join.child.column_name),
                ));
            }
        }
        Ok((query, r))
    }

    /// Inferred result type of a formula column; `None` for non-formulas and
    /// formulas that failed to parse.
    pub fn formula_type(&self, model: &Arc<Model>, alias: &str, column: &Column) -> Option<FormulaType> {
        let ColOptions::Formula(opts) = &column.options else {
            return None;
        };
        let parsed = opts.parsed.as_ref()?;
        let scope = FormulaScope {
            compiler: self,
            model,
            alias,
        };
        Some(FormulaCompiler::new(model, &scope).infer_type(parsed))
    }

    /// `LEFT JOIN related ON related.key = outer.fk` for a top-level belongs-to.
    pub fn belongs_to_join(&self, info: &LinkInfo, outer_alias: &str) -> (Join, String) {
        let r = self.aliases.next("bt");
        let join = Join {
            join_type: SqlJoinType::Left,
            table: TableRef::new(&info.related.table_name, &r),
            on: vec![SqlExpr::eq(
                SqlExpr::column(&r, &info.join.parent.column_name),
                SqlExpr::column(outer_alias, &info.join.child.column_name),
            )],
        };
        (join, r)
    }

    /// `buildRollupSelect`: `(SELECT agg(target) FROM related ... )`.
    pub fn rollup_expr(&self, model: &Arc<Model>, alias: &str, column: &Column) -> Result<SqlExpr> {
        let ColOptions::Rollup(opts) = &column.options else {
            return Err(MetaqueryError::Sql(format!("field '{}' is not a rollup", column.title)));
        };
        let info = self.relation_of(model, column)?;
        if info.relation_type == RelationType::BelongsTo {
            return Err(MetaqueryError::Sql(format!(
                "rollup field '{}' goes through a belongs-to relation, which has a single related row; use a lookup instead",
                column.title
            )));
        }
        self.ensure_same_base(&info, column)?;
        let target = find_column(&info.related, &opts.target_column_id)?;
        self.nested(column, || {
            let (mut query, r) = self.related_rows(&info, alias)?;
            let value = self.column_expr(&info.related, &r, target, ListShape::Concat)?;
            query.select = vec![SelectItem {
                expr: SqlExpr::Aggregate {
                    func: opts.function,
                    expr: Box::new(value),
                },
                alias: None,
            }];
            Ok(SqlExpr::subquery(query))
        })
    }

    /// Number of linked records.
    pub fn links_count_expr(&self, model: &Arc<Model>, alias: &str, column: &Column) -> Result<SqlExpr> {
        let info = self.link_info(model, column)?;
        self.ensure_same_base(&info, column)?;
        if info.relation_type == RelationType::BelongsTo {
            return Ok(SqlExpr::Case {
                branches: vec![(
                    SqlExpr::is_not_null(SqlExpr::column(alias, &info.join.child.column_name)),
                    SqlExpr::literal(1),
                )],
                else_expr: Some(Box::new(SqlExpr::literal(0))),
            });
        }
        let (mut query, _) = self.related_rows(&info, alias)?;
        query.select = vec![SelectItem {
            expr: SqlExpr::CountAll,
            alias: None,
        }];
        Ok(SqlExpr::subquery(query))
    }

    /// Projection of a related column. A belongs-to lookup is a scalar
    /// subquery; a has-many or many-to-many lookup is folded with `shape`.
    pub fn lookup_expr(
        &self,
        model: &Arc<Model>,
        alias: &str,
        column: &Column,
        shape: ListShape,
    ) -> Result<SqlExpr> {
        let ColOptions::Lookup(opts) = &column.options else {
            return Err(MetaqueryError::Sql(format!("field '{}' is not a lookup", column.title)));
        };
        let info = self.relation_of(model, column)?;
        self.ensure_same_base(&info, column)?;
        let target = find_column(&info.related, &opts.target_column_id)?;
        self.nested(column, || self.related_value(&info, alias, target, shape))
    }

    /// Display value of the linked record(s).
    pub fn ltar_expr(&self, model: &Arc<Model>, alias: &str, column: &Column, shape: ListShape) -> Result<SqlExpr> {
        let info = self.link_info(model, column)?;
        self.ensure_same_base(&info, column)?;
        let display = display_column(&info)?;
        self.nested(column, || self.related_value(&info, alias, &display, shape))
    }

    fn related_value(&self, info: &LinkInfo, alias: &str, target: &Column, shape: ListShape) -> Result<SqlExpr> {
        let (mut query, r) = self.related_rows(info, alias)?;
        let value = if info.is_many() {
            let inner = self.column_expr(&info.related, &r, target, shape.nested())?;
            shape.fold(inner)
        } else {
            query.limit = Some(1);
            self.column_expr(&info.related, &r, target, shape)?
        };
        query.select = vec![SelectItem { expr: value, alias: None }];
        Ok(SqlExpr::subquery(query))
    }

    fn ensure_same_base(&self, info: &LinkInfo, column: &Column) -> Result<()> {
        if info.is_cross_base() {
            return Err(MetaqueryError::Validation(format!(
                "field '{}' reads from another base and cannot be inlined into this query",
                column.title
            )));
        }
        Ok(())
    }

    fn nested<T>(&self, column: &Column, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let depth = self.depth.get();
        if depth >= MAX_RELATION_DEPTH {
            return Err(MetaqueryError::Sql(format!(
                "field '{}' nests relations more than {MAX_RELATION_DEPTH} levels deep",
                column.title
            )));
        }
        self.depth.set(depth + 1);
        let out = f();
        self.depth.set(depth);
        out
    }

    /// Plans the follow-up fetch for a relation column that cannot be inlined:
    /// every cross-base relation, and list relations on the portable plan.
    /// The outer query must select the returned key expression as `outer_key`.
    pub fn relation_fetch(
        &self,
        model: &Arc<Model>,
        alias: &str,
        column: &Column,
        outer_key: &str,
    ) -> Result<(RelationFetch, SqlExpr)> {
        let info = self.relation_of(model, column)?;
        let (kind, target) = match &column.options {
            ColOptions::Rollup(opts) => {
                if info.relation_type == RelationType::BelongsTo {
                    return Err(MetaqueryError::Sql(format!(
                        "rollup field '{}' goes through a belongs-to relation, which has a single related row; use a lookup instead",
                        column.title
                    )));
                }
                (
                    FetchKind::Rollup(opts.function),
                    find_column(&info.related, &opts.target_column_id)?.clone(),
                )
            }
            ColOptions::Lookup(opts) => (
                FetchKind::for_relation(&info),
                find_column(&info.related, &opts.target_column_id)?.clone(),
            ),
            ColOptions::Link(_) if column.uidt == Uidt::Links => (
                FetchKind::Count,
                info.related
                    .primary_key()
                    .cloned()
                    .unwrap_or_else(|| info.join.parent.clone()),
            ),
            _ => (FetchKind::for_relation(&info), display_column(&info)?),
        };

        let join = &info.join;
        let outer_expr = match info.relation_type {
            RelationType::HasMany => SqlExpr::column(alias, &join.parent.column_name),
            RelationType::BelongsTo | RelationType::ManyToMany => {
                SqlExpr::column(alias, &join.child.column_name)
            }
        };

        let r = self.aliases.next("f");
        let value = self.column_expr(&info.related, &r, &target, ListShape::Concat)?;
        let related_step = |key: SqlExpr, query: SelectQuery| FetchStep {
            base_id: info.related.base_id.clone(),
            select: vec![
                SelectItem::aliased(key.clone(), FETCH_KEY),
                SelectItem::aliased(value.clone(), FETCH_VALUE),
            ],
            query,
            key,
        };
        let from_related = SelectQuery {
            from: TableRef::new(&info.related.table_name, &r),
            ..Default::default()
        };

        let steps = match info.relation_type {
            RelationType::HasMany => vec![related_step(SqlExpr::column(&r, &join.child.column_name), from_related)],
            RelationType::BelongsTo => {
                vec![related_step(SqlExpr::column(&r, &join.parent.column_name), from_related)]
            }
            RelationType::ManyToMany => {
                let junction = info.junction()?;
                let (Some(jchild), Some(jparent)) = (&join.junction_child, &join.junction_parent) else {
                    return Err(MetaqueryError::Sql(format!(
                        "many-to-many column '{}' is missing its junction columns",
                        column.title
                    )));
                };
                let j = self.aliases.next("j");
                if junction.base_id == info.related.base_id {
                    let mut query = from_related;
                    query.joins.push(Join {
                        join_type: SqlJoinType::Inner,
                        table: TableRef::new(&junction.table_name, &j),
                        on: vec![SqlExpr::eq(
                            SqlExpr::column(&j, &jparent.column_name),
                            SqlExpr::column(&r, &join.parent.column_name),
                        )],
                    });
                    vec![related_step(SqlExpr::column(&j, &jchild.column_name), query)]
                } else {
                    let key = SqlExpr::column(&j, &jchild.column_name);
                    vec![
                        FetchStep {
                            base_id: junction.base_id.clone(),
                            select: vec![
                                SelectItem::aliased(key.clone(), FETCH_KEY),
                                SelectItem::aliased(SqlExpr::column(&j, &jparent.column_name), FETCH_VALUE),
                            ],
                            query: SelectQuery {
                                from: TableRef::new(&junction.table_name, &j),
                                ..Default::default()
                            },
                            key,
                        },
                        related_step(SqlExpr::column(&r, &join.parent.column_name), from_related),
                    ]
                }
            }
        };

        Ok((
            RelationFetch {
                column_id: column.id.clone(),
                title: column.title.clone(),
                kind,
                outer_key: outer_key.to_string(),
                steps,
            },
            outer_expr,
        ))
    }
}

fn display_column(info: &LinkInfo) -> Result<Column> {
    info.related.display_value().cloned().ok_or_else(|| {
        MetaqueryError::Sql(format!(
            "related table '{}' of field '{}' has no display column",
            info.related.title, info.column.title
        ))
    })
}

/// Formula identifiers resolved against one model row.
struct FormulaScope<'c, 'a> {
    compiler: &'c RelationCompiler<'a>,
    model: &'c Arc<Model>,
    alias: &'c str,
}

impl ColumnResolver for FormulaScope<'_, '_> {
    fn resolve_column(
        &self,
        column: &Column,
        aggregate: Option<RollupFunction>,
    ) -> std::result::Result<SqlExpr, FormulaError> {
        let shape = aggregate.map(ListShape::Aggregate).unwrap_or(ListShape::Concat);
        self.compiler
            .column_expr(self.model, self.alias, column, shape)
            .map_err(|err| match err {
                MetaqueryError::Formula(inner) => inner,
                other => FormulaError::Unsupported(other.to_string()),
            })
    }

    fn primary_key(&self) -> std::result::Result<SqlExpr, FormulaError> {
        self.model
            .primary_key()
            .map(|pk| SqlExpr::column(self.alias, &pk.column_name))
            .ok_or_else(|| {
                FormulaError::Unsupported(format!("table '{}' has no primary key", self.model.title))
            })
    }
}

/// How fetched related values fold into the outer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// All values as a JSON array.
    List,
    /// The first value, or null.
    Single,
    Count,
    Rollup(RollupFunction),
}

impl FetchKind {
    fn for_relation(info: &LinkInfo) -> Self {
        if info.is_many() {
            FetchKind::List
        } else {
            FetchKind::Single
        }
    }
}

/// One query of a relation fetch. Its rows map `__key` to `__value`; the
/// keys to look up are bound at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchStep {
    pub base_id: String,
    pub select: Vec<SelectItem>,
    pub query: SelectQuery,
    pub key: SqlExpr,
}

impl FetchStep {
    pub fn query_for(&self, keys: &[Value]) -> SelectQuery {
        let mut query = self.query.clone();
        query.select = self.select.clone();
        query.filters.push(SqlExpr::InList {
            expr: Box::new(self.key.clone()),
            list: keys.iter().cloned().map(SqlExpr::Literal).collect(),
            negated: false,
        });
        query
    }
}

/// Follow-up step of the portable plan: related values for a relation
/// column, keyed by an outer-row value, possibly through a junction on
/// another source.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationFetch {
    pub column_id: String,
    pub title: String,
    pub kind: FetchKind,
    /// Alias of the outer-row value the first step is keyed by.
    pub outer_key: String,
    pub steps: Vec<FetchStep>,
}

/// Normalized join key of a fetched value; drivers disagree on integer vs text.
pub fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Folds fetched values the way the SQL aggregate would.
pub fn fold_fetched(kind: FetchKind, values: Vec<Value>) -> Value {
    match kind {
        FetchKind::List => Value::Array(values),
        FetchKind::Single => values.into_iter().next().unwrap_or(Value::Null),
        FetchKind::Count => Value::from(values.len() as u64),
        FetchKind::Rollup(func) => aggregate_values(func, &values),
    }
}

/// SQL aggregate semantics over JSON values: nulls are ignored, an empty
/// input gives 0 for counts and null otherwise.
pub fn aggregate_values(func: RollupFunction, values: &[Value]) -> Value {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    let distinct = |items: &[&Value]| -> Vec<Value> {
        let mut seen = HashSet::new();
        items
            .iter()
            .filter(|v| seen.insert(v.to_string()))
            .map(|v| (*v).clone())
            .collect()
    };
    let numbers = |items: Vec<Value>| -> Vec<f64> {
        items
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                Value::Bool(b) => Some(f64::from(u8::from(*b))),
                _ => None,
            })
            .collect()
    };
    let all: Vec<Value> = present.iter().map(|v| (*v).clone()).collect();
    match func {
        RollupFunction::Count => Value::from(present.len() as u64),
        RollupFunction::CountDistinct => Value::from(distinct(&present).len() as u64),
        RollupFunction::Sum => sum(&numbers(all)),
        RollupFunction::SumDistinct => sum(&numbers(distinct(&present))),
        RollupFunction::Avg => avg(&numbers(all)),
        RollupFunction::AvgDistinct => avg(&numbers(distinct(&present))),
        RollupFunction::Min => extreme(&numbers(all), f64::min),
        RollupFunction::Max => extreme(&numbers(all), f64::max),
    }
}

fn number(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::from(x as i64)
    } else {
        Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn sum(xs: &[f64]) -> Value {
    if xs.is_empty() {
        Value::Null
    } else {
        number(xs.iter().sum())
    }
}

fn avg(xs: &[f64]) -> Value {
    if xs.is_empty() {
        Value::Null
    } else {
        number(xs.iter().sum::<f64>() / xs.len() as f64)
    }
}

fn extreme(xs: &[f64], pick: fn(f64, f64) -> f64) -> Value {
    xs.iter().copied().reduce(pick).map(number).unwrap_or(Value::Null)
}
