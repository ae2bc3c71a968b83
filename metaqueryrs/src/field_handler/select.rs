use serde_json::Value;

use super::conditions::{
    apply_negate, blank, not_blank, scalar_condition, unsupported, unsupported_op_message,
    values_of, verify_scalar, PATTERN_OPS, SCALAR_OPS,
};
use super::{FieldHandler, FilterContext, FilterVerification};
use crate::error::{MetaqueryError, Result};
use crate::models::{Column, ComparisonOp, FilterCondition};
use crate::sql_ast::SqlExpr;

const MEMBERSHIP_OPS: &[ComparisonOp] = &[
    ComparisonOp::AnyOf,
    ComparisonOp::NAnyOf,
    ComparisonOp::AllOf,
    ComparisonOp::NAllOf,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct SingleSelectHandler;

impl FieldHandler for SingleSelectHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        if matches!(filter.op, ComparisonOp::AllOf | ComparisonOp::NAllOf) {
            return FilterVerification::from_errors(vec![unsupported_op_message(
                column, &filter.op,
            )]);
        }
        FilterVerification::from_errors(verify_scalar(
            filter,
            column,
            &[SCALAR_OPS, PATTERN_OPS, MEMBERSHIP_OPS],
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
        match filter.op {
            ComparisonOp::AnyOf | ComparisonOp::NAnyOf => {
                let list = values_of(&filter.value)
                    .into_iter()
                    .map(SqlExpr::literal)
                    .collect();
                let expr = if filter.op == ComparisonOp::AnyOf {
                    SqlExpr::InList {
                        expr: Box::new(field),
                        list,
                        negated: false,
                    }
                } else {
                    SqlExpr::or(vec![
                        SqlExpr::InList {
                            expr: Box::new(field.clone()),
                            list,
                            negated: true,
                        },
                        SqlExpr::is_null(field),
                    ])
                };
                Ok(apply_negate(filter, expr))
            }
            _ => scalar_condition(filter, column, field, true, &|v| Ok(SqlExpr::literal(v))),
        }
    }
}

/// Comma-joined option lists. Only membership and emptiness operators apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiSelectHandler;

impl MultiSelectHandler {
    /// `(',' || field || ',') LIKE '%,option,%'`
    fn contains(field: &SqlExpr, option: &str) -> SqlExpr {
        SqlExpr::Like {
            expr: Box::new(SqlExpr::Concat(vec![
                SqlExpr::literal(","),
                field.clone(),
                SqlExpr::literal(","),
            ])),
            pattern: Box::new(SqlExpr::literal(format!("%,{option},%"))),
            negated: false,
        }
    }
}

impl FieldHandler for MultiSelectHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        let allowed: &[&[ComparisonOp]] = &[
            MEMBERSHIP_OPS,
            &[
                ComparisonOp::Empty,
                ComparisonOp::NotEmpty,
                ComparisonOp::Null,
                ComparisonOp::NotNull,
                ComparisonOp::Blank,
                ComparisonOp::NotBlank,
            ],
        ];
        FilterVerification::from_errors(verify_scalar(filter, column, allowed, &|option| {
            option
                .contains(',')
                .then(|| format!("option '{option}' of field '{}' contains a comma", column.title))
        }))
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        match raw {
            Value::String(s) if s.is_empty() => Value::Null,
            Value::String(_) => Value::Array(values_of(raw).into_iter().map(Value::String).collect()),
            other => other.clone(),
        }
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(_) | Value::Array(_) => {
                let options = values_of(value);
                if options.is_empty() {
                    Ok(Value::Null)
                } else {
                    Ok(Value::String(options.join(",")))
                }
            }
            other => Err(MetaqueryError::Validation(format!(
                "value {other} for field '{}' is not a list of options",
                column.title
            ))),
        }
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        _ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        let options = values_of(&filter.value);
        let matches: Vec<SqlExpr> = options
            .iter()
            .map(|option| Self::contains(&field, option))
            .collect();
        let expr = match filter.op {
            ComparisonOp::AnyOf => SqlExpr::or(matches),
            ComparisonOp::AllOf => SqlExpr::and(matches),
            ComparisonOp::NAnyOf => SqlExpr::or(vec![
                SqlExpr::not(SqlExpr::or(matches)),
                SqlExpr::is_null(field),
            ]),
            ComparisonOp::NAllOf => SqlExpr::or(vec![
                SqlExpr::not(SqlExpr::and(matches)),
                SqlExpr::is_null(field),
            ]),
            ComparisonOp::Empty | ComparisonOp::Blank => blank(field, true),
            ComparisonOp::NotEmpty | ComparisonOp::NotBlank => not_blank(field, true),
            ComparisonOp::Null => SqlExpr::is_null(field),
            ComparisonOp::NotNull => SqlExpr::is_not_null(field),
            _ => return Err(unsupported(filter, column)),
        };
        Ok(apply_negate(filter, expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::models::{Filter, Uidt};
    use crate::sql_ast::SqlRenderer;
    use serde_json::json;

    fn tags() -> Column {
        Column::plain("c1", "m1", "Tags", "tags", Uidt::MultiSelect)
    }

    fn render(op: &str, value: Value, kind: DialectKind) -> String {
        let Filter::Condition(filter) = Filter::condition("c1", op, value) else {
            unreachable!()
        };
        let ctx = FilterContext::new(kind.dialect());
        let expr = MultiSelectHandler
            .to_sql_condition(&filter, &tags(), SqlExpr::column("t", "tags"), &ctx)
            .unwrap();
        SqlRenderer::new(kind.dialect()).render_expr(&expr)
    }

    #[test]
    fn allof_requires_every_option() {
        assert_eq!(
            render("allof", json!("a,b"), DialectKind::Sqlite3),
            "((',' || \"t\".\"tags\" || ',') LIKE '%,a,%' AND (',' || \"t\".\"tags\" || ',') LIKE '%,b,%')"
        );
    }

    #[test]
    fn mysql_uses_concat() {
        assert_eq!(
            render("anyof", json!(["x"]), DialectKind::Mysql2),
            "CONCAT(',', `t`.`tags`, ',') LIKE '%,x,%'"
        );
    }

    #[test]
    fn storage_round_trip() {
        let stored = MultiSelectHandler
            .serialize_value(&json!(["a", "b"]), &tags())
            .unwrap();
        assert_eq!(stored, json!("a,b"));
        assert_eq!(MultiSelectHandler.parse_value(&stored, &tags()), json!(["a", "b"]));
    }

    #[test]
    fn single_select_anyof_is_in_list() {
        let status = Column::plain("c1", "m1", "Status", "status", Uidt::SingleSelect);
        let Filter::Condition(filter) = Filter::condition("c1", "anyof", json!("open,done")) else {
            unreachable!()
        };
        let ctx = FilterContext::new(DialectKind::Pg.dialect());
        let expr = SingleSelectHandler
            .to_sql_condition(&filter, &status, SqlExpr::column("t", "status"), &ctx)
            .unwrap();
        assert_eq!(
            SqlRenderer::new(DialectKind::Pg.dialect()).render_expr(&expr),
            "\"t\".\"status\" IN ('open', 'done')"
        );
    }
}
