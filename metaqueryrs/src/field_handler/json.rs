use serde_json::Value;

use super::conditions::{
    apply_negate, blank, like, missing_value, not_blank, unsupported, verify_scalar,
    PATTERN_OPS, SCALAR_OPS,
};
use super::{FieldHandler, FilterContext, FilterVerification};
use crate::error::{MetaqueryError, Result};
use crate::models::{Column, ComparisonOp, FilterCondition};
use crate::sql_ast::{SqlBinaryOperator, SqlExpr, SqlRenderer};

/// JSON documents. Postgres compares structurally through `jsonb`; other
/// backends compare the text form.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHandler {
    pub jsonb: bool,
}

impl JsonHandler {
    fn normalize(text: &str) -> String {
        serde_json::from_str::<Value>(text)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| text.to_string())
    }

    fn equality_sides(
        &self,
        field: SqlExpr,
        text: &str,
        ctx: &FilterContext<'_>,
    ) -> (SqlExpr, SqlExpr) {
        let literal = SqlExpr::literal(Self::normalize(text));
        if self.jsonb {
            let renderer = SqlRenderer::new(ctx.dialect);
            (
                SqlExpr::Raw(format!("({})::jsonb", renderer.render_expr(&field))),
                SqlExpr::Raw(format!("({})::jsonb", renderer.render_expr(&literal))),
            )
        } else {
            (SqlExpr::CastText(Box::new(field)), literal)
        }
    }
}

impl FieldHandler for JsonHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        let check_json = |v: &str| -> Option<String> {
            if !self.jsonb || serde_json::from_str::<Value>(v).is_ok() {
                return None;
            }
            Some(format!("value '{v}' for field '{}' is not valid JSON", column.title))
        };
        FilterVerification::from_errors(verify_scalar(
            filter,
            column,
            &[SCALAR_OPS, PATTERN_OPS],
            &check_json,
        ))
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        match raw {
            Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| raw.clone()),
            other => other.clone(),
        }
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) => serde_json::from_str::<Value>(s)
                .map(|v| Value::String(v.to_string()))
                .map_err(|e| {
                    MetaqueryError::Validation(format!(
                        "value for field '{}' is not valid JSON: {e}",
                        column.title
                    ))
                }),
            other => Ok(Value::String(other.to_string())),
        }
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        let value = filter.value_str();
        let expr = match &filter.op {
            ComparisonOp::Eq => match value {
                None => blank(SqlExpr::CastText(Box::new(field)), true),
                Some(v) => {
                    let (lhs, rhs) = self.equality_sides(field, &v, ctx);
                    SqlExpr::eq(lhs, rhs)
                }
            },
            ComparisonOp::Neq | ComparisonOp::Not => match value {
                None => not_blank(SqlExpr::CastText(Box::new(field)), true),
                Some(v) => {
                    let (lhs, rhs) = self.equality_sides(field.clone(), &v, ctx);
                    SqlExpr::or(vec![
                        SqlExpr::binary(SqlBinaryOperator::Neq, lhs, rhs),
                        SqlExpr::is_null(field),
                    ])
                }
            },
            ComparisonOp::Like | ComparisonOp::Nlike => {
                let v = value.ok_or_else(|| missing_value(filter, column))?;
                like(
                    SqlExpr::CastText(Box::new(field)),
                    &v,
                    filter.op == ComparisonOp::Nlike,
                )
            }
            ComparisonOp::Null | ComparisonOp::Empty => SqlExpr::is_null(field),
            ComparisonOp::NotNull | ComparisonOp::NotEmpty => SqlExpr::is_not_null(field),
            ComparisonOp::Blank => blank(SqlExpr::CastText(Box::new(field)), true),
            ComparisonOp::NotBlank => not_blank(SqlExpr::CastText(Box::new(field)), true),
            _ => return Err(unsupported(filter, column)),
        };
        Ok(apply_negate(filter, expr))
    }
}
