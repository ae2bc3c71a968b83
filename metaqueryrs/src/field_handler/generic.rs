use super::conditions::{scalar_condition, verify_scalar, ORDER_OPS, PATTERN_OPS, SCALAR_OPS};
use super::{FieldHandler, FilterContext, FilterVerification};
use crate::error::Result;
use crate::models::{Column, ComparisonOp, FilterCondition};
use crate::sql_ast::SqlExpr;

/// Text-like columns and the fallback for anything without a dedicated handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericHandler;

const TEXT_EXTRA: &[ComparisonOp] = &[ComparisonOp::In];

impl FieldHandler for GenericHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        FilterVerification::from_errors(verify_scalar(
            filter,
            column,
            &[SCALAR_OPS, PATTERN_OPS, ORDER_OPS, TEXT_EXTRA],
            &|_| None,
        ))
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        _ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        scalar_condition(filter, column, field, true, &|v| Ok(SqlExpr::literal(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::models::{Filter, Uidt};
    use crate::sql_ast::SqlRenderer;
    use serde_json::{json, Value};

    fn render(op: &str, value: Value, kind: DialectKind) -> String {
        let column = Column::plain("c1", "m1", "Name", "name", Uidt::SingleLineText);
        let Filter::Condition(filter) = Filter::condition("c1", op, value) else {
            unreachable!()
        };
        let ctx = FilterContext::new(kind.dialect());
        let expr = GenericHandler
            .to_sql_condition(&filter, &column, SqlExpr::column("t", "name"), &ctx)
            .unwrap();
        SqlRenderer::new(kind.dialect()).render_expr(&expr)
    }

    #[test]
    fn neq_includes_nulls() {
        assert_eq!(
            render("neq", json!("bob"), DialectKind::Sqlite3),
            "((\"t\".\"name\" <> 'bob') OR \"t\".\"name\" IS NULL)"
        );
    }

    #[test]
    fn like_is_case_insensitive_on_pg() {
        assert_eq!(
            render("like", json!("bo"), DialectKind::Pg),
            "(\"t\".\"name\")::text ILIKE '%bo%'"
        );
    }

    #[test]
    fn blank_covers_empty_string() {
        assert_eq!(
            render("blank", Value::Null, DialectKind::Mysql),
            "(`t`.`name` IS NULL OR (`t`.`name` = ''))"
        );
    }

    #[test]
    fn eq_without_value_means_blank() {
        assert_eq!(
            render("eq", json!(""), DialectKind::Sqlite3),
            "(\"t\".\"name\" IS NULL OR (\"t\".\"name\" = ''))"
        );
    }

    #[test]
    fn like_requires_value() {
        let column = Column::plain("c1", "m1", "Name", "name", Uidt::SingleLineText);
        let Filter::Condition(filter) = Filter::condition("c1", "like", Value::Null) else {
            unreachable!()
        };
        let result = GenericHandler.verify_filter(&filter, &column);
        assert_eq!(result.errors, vec!["'like' on field 'Name' requires a value"]);
    }
}
