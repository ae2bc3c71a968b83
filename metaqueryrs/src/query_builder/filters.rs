//! ResolveFilters: verifies every condition, then lowers the filter tree.
//!
//! Verification problems are collected across the whole tree and returned as
//! one `FilterVerificationError`. An unknown column id stops immediately.

use std::sync::Arc;

use crate::dialect::DialectKind;
use crate::error::{FilterVerificationError, MetaqueryError, Result};
use crate::field_handler::{formula_filter_uidt, FieldHandler, FilterContext, HandlerRegistry};
use crate::formula::FormulaType;
use crate::links::find_column;
use crate::models::{ColOptions, Column, ComparisonOp, Filter, FilterCondition, LogicalOp, Model, Uidt};
use crate::rollup::{ListShape, RelationCompiler};
use crate::sql_ast::SqlExpr;

const MAX_FILTER_DEPTH: usize = 8;

pub(crate) struct FilterCompiler<'c, 'a> {
    relations: &'c RelationCompiler<'a>,
    handlers: &'c HandlerRegistry,
    dialect: DialectKind,
    ctx: FilterContext<'static>,
    errors: Vec<String>,
    depth: usize,
}

impl<'c, 'a> FilterCompiler<'c, 'a> {
    pub fn new(
        relations: &'c RelationCompiler<'a>,
        handlers: &'c HandlerRegistry,
        dialect: DialectKind,
        ctx: FilterContext<'static>,
    ) -> Self {
        Self {
            relations,
            handlers,
            dialect,
            ctx,
            errors: Vec::new(),
            depth: 0,
        }
    }

    /// One WHERE conjunct per top-level filter, in input order.
    pub fn compile(mut self, model: &Arc<Model>, alias: &str, filters: &[&Filter]) -> Result<Vec<SqlExpr>> {
        let mut out = Vec::new();
        for filter in filters {
            if let Some(expr) = self.node(model, alias, filter)? {
                out.push(expr);
            }
        }
        if !self.errors.is_empty() {
            tracing::debug!(errors = self.errors.len(), "filter verification failed");
            return Err(FilterVerificationError::new(self.errors).into());
        }
        Ok(out)
    }

    fn node(&mut self, model: &Arc<Model>, alias: &str, filter: &Filter) -> Result<Option<SqlExpr>> {
        match filter {
            Filter::Group {
                logical_op,
                children,
            } => {
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    if let Some(expr) = self.node(model, alias, child)? {
                        parts.push(expr);
                    }
                }
                if parts.is_empty() {
                    return Ok(None);
                }
                Ok(Some(match logical_op {
                    LogicalOp::And => SqlExpr::and(parts),
                    LogicalOp::Or => SqlExpr::or(parts),
                    LogicalOp::Not => SqlExpr::not(SqlExpr::and(parts)),
                }))
            }
            Filter::Condition(cond) => {
                let column = model
                    .column(&cond.column_id)
                    .ok_or_else(|| MetaqueryError::not_found("column", cond.column_id.clone()))?;
                let expr = self.condition(model, alias, cond, column)?;
                Ok(expr.map(|e| if cond.negate { SqlExpr::not(e) } else { e }))
            }
        }
    }

    /// `None` when the condition failed verification; the problem is recorded.
    fn condition(
        &mut self,
        model: &Arc<Model>,
        alias: &str,
        cond: &FilterCondition,
        column: &Column,
    ) -> Result<Option<SqlExpr>> {
        match &column.options {
            ColOptions::QrCode(opts) => {
                let Some(value) = self.soft(find_column(model, &opts.value_column_id).cloned())? else {
                    return Ok(None);
                };
                self.condition(model, alias, cond, &value)
            }
            ColOptions::Barcode(opts) => {
                let Some(value) = self.soft(find_column(model, &opts.value_column_id).cloned())? else {
                    return Ok(None);
                };
                self.condition(model, alias, cond, &value)
            }
            ColOptions::Formula(_) => {
                if let Some(error) = column.formula_error() {
                    self.errors
                        .push(format!("formula field '{}' is invalid: {error}", column.title));
                    return Ok(None);
                }
                let ty = self
                    .relations
                    .formula_type(model, alias, column)
                    .unwrap_or(FormulaType::Unknown);
                let handler = self.handlers.handler(formula_filter_uidt(ty), self.dialect);
                self.scalar(handler, model, alias, cond, column)
            }
            ColOptions::Lookup(_) => self.relation_condition(model, alias, cond, column),
            ColOptions::Link(_) if column.uidt != Uidt::Links => {
                self.relation_condition(model, alias, cond, column)
            }
            _ => {
                let handler = self.handlers.handler_for(column, self.dialect);
                self.scalar(handler, model, alias, cond, column)
            }
        }
    }

    fn scalar(
        &mut self,
        handler: &dyn FieldHandler,
        model: &Arc<Model>,
        alias: &str,
        cond: &FilterCondition,
        column: &Column,
    ) -> Result<Option<SqlExpr>> {
        let verification = handler.verify_filter(cond, column);
        if !verification.is_valid {
            self.errors.extend(verification.errors);
            return Ok(None);
        }
        let Some(field) = self.soft(
            self.relations
                .column_expr(model, alias, column, ListShape::Concat),
        )?
        else {
            return Ok(None);
        };
        self.soft(handler.to_sql_condition(cond, column, field, &self.ctx))
    }

    /// Lookup and LTAR conditions become `EXISTS` over the related rows.
    /// Excluding operators test that no related row matches the positive form.
    fn relation_condition(
        &mut self,
        model: &Arc<Model>,
        alias: &str,
        cond: &FilterCondition,
        column: &Column,
    ) -> Result<Option<SqlExpr>> {
        if self.depth >= MAX_FILTER_DEPTH {
            return Err(MetaqueryError::Sql(format!(
                "filter on '{}' nests relations more than {MAX_FILTER_DEPTH} levels deep",
                column.title
            )));
        }
        let Some(info) = self.soft(self.relations.relation_of(model, column))? else {
            return Ok(None);
        };
        if info.is_cross_base() {
            self.errors.push(format!(
                "field '{}' reads from another base and cannot be filtered",
                column.title
            ));
            return Ok(None);
        }
        let target = match &column.options {
            ColOptions::Lookup(opts) => find_column(&info.related, &opts.target_column_id).cloned(),
            _ => info.related.display_value().cloned().ok_or_else(|| {
                MetaqueryError::Validation(format!(
                    "related table '{}' of field '{}' has no display column",
                    info.related.title, column.title
                ))
            }),
        };
        let Some(target) = self.soft(target)? else {
            return Ok(None);
        };
        let Some((mut query, r)) = self.soft(self.relations.related_rows(&info, alias))? else {
            return Ok(None);
        };

        let (inner, negated) = match emptiness(&cond.op) {
            // "has no links" / "has links" for the relation itself.
            Some(wants_empty) if matches!(column.options, ColOptions::Link(_)) => (None, wants_empty),
            Some(wants_empty) => (Some(with_op(cond, ComparisonOp::NotBlank)), wants_empty),
            None => match cond.op.positive_counterpart() {
                Some(positive) => (Some(with_op(cond, positive)), true),
                None => (Some(cond.clone()), false),
            },
        };

        if let Some(inner) = inner {
            self.depth += 1;
            let lowered = self.condition(&info.related, &r, &inner, &target);
            self.depth -= 1;
            let Some(expr) = lowered? else {
                return Ok(None);
            };
            query.filters.push(expr);
        }
        Ok(Some(SqlExpr::Exists {
            query: Box::new(query),
            negated,
        }))
    }

    /// Keeps fatal errors fatal and records the rest as verification problems.
    fn soft<T>(&mut self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err @ MetaqueryError::Sql(_)) => Err(err),
            Err(MetaqueryError::FilterVerification(inner)) => {
                self.errors.extend(inner.errors);
                Ok(None)
            }
            Err(other) => {
                self.errors.push(other.to_string());
                Ok(None)
            }
        }
    }
}

/// `Some(true)` for operators asking for an empty value, `Some(false)` for
/// their negations.
fn emptiness(op: &ComparisonOp) -> Option<bool> {
    match op {
        ComparisonOp::Blank | ComparisonOp::Empty | ComparisonOp::Null => Some(true),
        ComparisonOp::NotBlank | ComparisonOp::NotEmpty | ComparisonOp::NotNull => Some(false),
        _ => None,
    }
}

fn with_op(cond: &FilterCondition, op: ComparisonOp) -> FilterCondition {
    FilterCondition {
        op,
        negate: false,
        ..cond.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::fixtures;
    use crate::rollup::AliasGenerator;
    use crate::sql_ast::SqlRenderer;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn compile(model_id: &str, filters: &[Filter], kind: DialectKind) -> Result<Vec<String>> {
        let models = fixtures::lookup();
        let aliases = AliasGenerator::new();
        let relations = RelationCompiler::new(&models, &aliases);
        let handlers = HandlerRegistry::standard();
        let ctx = FilterContext::new(kind.dialect());
        let refs: Vec<&Filter> = filters.iter().collect();
        let exprs = FilterCompiler::new(&relations, &handlers, kind, ctx).compile(&models[model_id], "t", &refs)?;
        let renderer = SqlRenderer::new(kind.dialect());
        Ok(exprs.iter().map(|e| renderer.render_expr(e)).collect())
    }

    #[test]
    fn three_invalid_filters_give_three_errors() {
        let filters = vec![
            Filter::condition("cu_total", "like", json!("x")),
            Filter::condition("cu_name", "near", json!("x")),
            Filter::condition("cu_total", "gt", json!("abc")),
        ];
        match compile("m_cust", &filters, DialectKind::Pg) {
            Err(MetaqueryError::FilterVerification(err)) => assert_eq!(err.errors.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_column_is_not_found() {
        let filters = vec![
            Filter::condition("cu_name", "near", json!("x")),
            Filter::condition("missing", "eq", json!(1)),
        ];
        assert!(matches!(
            compile("m_cust", &filters, DialectKind::Pg),
            Err(MetaqueryError::NotFound { kind: "column", id }) if id == "missing"
        ));
    }

    #[test]
    fn groups_keep_their_nesting() {
        let filters = vec![Filter::and(vec![
            Filter::condition("cu_name", "eq", json!("a")),
            Filter::or(vec![
                Filter::condition("cu_name", "eq", json!("b")),
                Filter::condition("cu_name", "eq", json!("c")),
            ]),
        ])];
        let sql = compile("m_cust", &filters, DialectKind::Sqlite3).unwrap();
        assert_eq!(
            sql,
            vec!["((\"t\".\"name\" = 'a') AND ((\"t\".\"name\" = 'b') OR (\"t\".\"name\" = 'c')))"]
        );
    }

    #[test]
    fn rollup_filter_compares_subquery() {
        let filters = vec![Filter::condition("cu_total", "gt", json!(100))];
        let sql = compile("m_cust", &filters, DialectKind::Pg).unwrap();
        assert_eq!(
            sql,
            vec!["((SELECT SUM(\"r1\".\"amount\") FROM \"orders\" \"r1\" WHERE (\"r1\".\"customer_id\" = \"t\".\"id\")) > 100)"]
        );
    }

    #[test]
    fn excluding_lookup_filter_is_not_exists() {
        let filters = vec![Filter::condition("cu_amounts", "neq", json!(5))];
        let sql = compile("m_cust", &filters, DialectKind::Pg).unwrap();
        assert_eq!(sql.len(), 1);
        assert!(sql[0].starts_with("NOT EXISTS (SELECT 1 FROM \"orders\" \"r1\""), "{}", sql[0]);
    }

    #[test]
    fn blank_link_filter_means_no_links() {
        let filters = vec![Filter::condition("fi_actors", "blank", json!(null))];
        let sql = compile("m_film", &filters, DialectKind::Mysql).unwrap();
        assert_eq!(
            sql,
            vec!["NOT EXISTS (SELECT 1 FROM `actors` `r1` INNER JOIN `film_actors` `j2` ON (`j2`.`actor_id` = `r1`.`id`) WHERE (`j2`.`film_id` = `t`.`id`))"]
        );
    }

    #[test]
    fn cross_base_filter_fails_verification() {
        let filters = vec![Filter::condition("cu_reviews", "like", json!("good"))];
        match compile("m_cust", &filters, DialectKind::Pg) {
            Err(MetaqueryError::FilterVerification(err)) => {
                assert!(err.errors[0].contains("another base"), "{:?}", err.errors)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
