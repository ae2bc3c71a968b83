use serde_json::{Number, Value};

use super::conditions::{scalar_condition, verify_scalar, ORDER_OPS, RANGE_OPS, SCALAR_OPS};
use super::{FieldHandler, FilterContext, FilterVerification};
use crate::error::{MetaqueryError, Result};
use crate::models::{Column, ComparisonOp, FilterCondition};
use crate::sql_ast::SqlExpr;

const NUMBER_EXTRA: &[ComparisonOp] = &[ComparisonOp::In];

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Number::from(i));
    }
    text.parse::<f64>().ok().and_then(Number::from_f64)
}

fn number_literal(column: &Column, text: &str) -> Result<SqlExpr> {
    parse_number(text)
        .map(|n| SqlExpr::Literal(Value::Number(n)))
        .ok_or_else(|| {
            MetaqueryError::Validation(format!(
                "value '{text}' for field '{}' is not a number",
                column.title
            ))
        })
}

fn verify_numeric(filter: &FilterCondition, column: &Column) -> FilterVerification {
    FilterVerification::from_errors(verify_scalar(
        filter,
        column,
        &[SCALAR_OPS, ORDER_OPS, RANGE_OPS, NUMBER_EXTRA],
        &|v| {
            parse_number(v).is_none().then(|| {
                format!("value '{v}' for field '{}' is not a number", column.title)
            })
        },
    ))
}

/// Numbers read back from drivers as strings (pg numeric, mysql DECIMAL).
fn parse_numeric_value(raw: &Value) -> Value {
    match raw {
        Value::String(s) => parse_number(s).map(Value::Number).unwrap_or_else(|| raw.clone()),
        other => other.clone(),
    }
}

fn serialize_numeric(value: &Value, column: &Column) -> Result<Value> {
    match value {
        Value::Null | Value::Number(_) => Ok(value.clone()),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => parse_number(s).map(Value::Number).ok_or_else(|| {
            MetaqueryError::Validation(format!(
                "value '{s}' for field '{}' is not a number",
                column.title
            ))
        }),
        other => Err(MetaqueryError::Validation(format!(
            "value {other} for field '{}' is not a number",
            column.title
        ))),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NumberHandler;

impl FieldHandler for NumberHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        verify_numeric(filter, column)
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        parse_numeric_value(raw)
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        serialize_numeric(value, column)
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        _ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        scalar_condition(filter, column, field, false, &|v| number_literal(column, v))
    }
}

/// Decimal columns. SQLite stores them with text affinity in some schemas,
/// so comparisons there cast the column to REAL first.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecimalHandler {
    pub cast_real: bool,
}

impl FieldHandler for DecimalHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        verify_numeric(filter, column)
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        parse_numeric_value(raw)
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        serialize_numeric(value, column)
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        _ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        let field = if self.cast_real {
            SqlExpr::CastNumeric(Box::new(field))
        } else {
            field
        };
        scalar_condition(filter, column, field, false, &|v| number_literal(column, v))
    }
}
