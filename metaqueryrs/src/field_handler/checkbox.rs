use serde_json::Value;

use super::conditions::{apply_negate, unsupported, unsupported_op_message};
use super::{FieldHandler, FilterContext, FilterVerification};
use crate::error::{MetaqueryError, Result};
use crate::models::{Column, ComparisonOp, FilterCondition};
use crate::sql_ast::SqlExpr;

/// Boolean columns. `numeric` backends store 0/1 instead of a boolean type.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckboxHandler {
    pub numeric: bool,
}

fn truthiness(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "checked" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        Value::Null => Some(false),
        _ => None,
    }
}

impl CheckboxHandler {
    fn literal(&self, b: bool) -> SqlExpr {
        if self.numeric {
            SqlExpr::literal(i64::from(b))
        } else {
            SqlExpr::literal(b)
        }
    }

    fn checked(&self, field: SqlExpr, wanted: bool) -> SqlExpr {
        if wanted {
            SqlExpr::eq(field, self.literal(true))
        } else {
            SqlExpr::or(vec![
                SqlExpr::eq(field.clone(), self.literal(false)),
                SqlExpr::is_null(field),
            ])
        }
    }
}

impl FieldHandler for CheckboxHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        let errors = match &filter.op {
            ComparisonOp::Checked
            | ComparisonOp::NotChecked
            | ComparisonOp::Null
            | ComparisonOp::NotNull
            | ComparisonOp::Blank
            | ComparisonOp::NotBlank => Vec::new(),
            ComparisonOp::Eq | ComparisonOp::Neq | ComparisonOp::Not => {
                if truthiness(&filter.value).is_some() {
                    Vec::new()
                } else {
                    vec![format!(
                        "value {} for checkbox field '{}' is not a boolean",
                        filter.value, column.title
                    )]
                }
            }
            op => vec![unsupported_op_message(column, op)],
        };
        FilterVerification::from_errors(errors)
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        match raw {
            Value::Null => Value::Null,
            other => truthiness(other).map(Value::Bool).unwrap_or_else(|| other.clone()),
        }
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        let b = truthiness(value).ok_or_else(|| {
            MetaqueryError::Validation(format!(
                "value {value} for checkbox field '{}' is not a boolean",
                column.title
            ))
        })?;
        Ok(if self.numeric {
            Value::from(i64::from(b))
        } else {
            Value::Bool(b)
        })
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        _ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        let expr = match &filter.op {
            ComparisonOp::Checked => self.checked(field, true),
            ComparisonOp::NotChecked | ComparisonOp::Blank => self.checked(field, false),
            ComparisonOp::NotBlank => self.checked(field, true),
            ComparisonOp::Null => SqlExpr::is_null(field),
            ComparisonOp::NotNull => SqlExpr::is_not_null(field),
            ComparisonOp::Eq => self.checked(field, truthiness(&filter.value).unwrap_or(false)),
            ComparisonOp::Neq | ComparisonOp::Not => {
                self.checked(field, !truthiness(&filter.value).unwrap_or(false))
            }
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

    fn done() -> Column {
        Column::plain("c1", "m1", "Done", "done", Uidt::Checkbox)
    }

    fn render(handler: CheckboxHandler, op: &str, kind: DialectKind) -> String {
        let Filter::Condition(filter) = Filter::condition("c1", op, Value::Null) else {
            unreachable!()
        };
        let ctx = FilterContext::new(kind.dialect());
        let expr = handler
            .to_sql_condition(&filter, &done(), SqlExpr::column("t", "done"), &ctx)
            .unwrap();
        SqlRenderer::new(kind.dialect()).render_expr(&expr)
    }

    #[test]
    fn not_checked_includes_nulls() {
        assert_eq!(
            render(CheckboxHandler { numeric: true }, "notchecked", DialectKind::Sqlite3),
            "((\"t\".\"done\" = 0) OR \"t\".\"done\" IS NULL)"
        );
        assert_eq!(
            render(CheckboxHandler::default(), "checked", DialectKind::Pg),
            "(\"t\".\"done\" = true)"
        );
    }

    #[test]
    fn storage_representation() {
        let numeric = CheckboxHandler { numeric: true };
        assert_eq!(numeric.serialize_value(&json!(true), &done()).unwrap(), json!(1));
        assert_eq!(numeric.parse_value(&json!(0), &done()), json!(false));
        assert!(numeric.serialize_value(&json!("maybe"), &done()).is_err());
    }
}
