//! Comparison building blocks shared by the handlers.

use serde_json::Value;

use crate::error::{MetaqueryError, Result};
use crate::models::{Column, ComparisonOp, FilterCondition};
use crate::sql_ast::{SqlBinaryOperator, SqlExpr};

/// Operators every scalar handler understands.
pub(crate) const SCALAR_OPS: &[ComparisonOp] = &[
    ComparisonOp::Eq,
    ComparisonOp::Neq,
    ComparisonOp::Not,
    ComparisonOp::Empty,
    ComparisonOp::NotEmpty,
    ComparisonOp::Null,
    ComparisonOp::NotNull,
    ComparisonOp::Blank,
    ComparisonOp::NotBlank,
];

pub(crate) const ORDER_OPS: &[ComparisonOp] = &[
    ComparisonOp::Gt,
    ComparisonOp::Lt,
    ComparisonOp::Gte,
    ComparisonOp::Lte,
    ComparisonOp::Ge,
    ComparisonOp::Le,
];

pub(crate) const RANGE_OPS: &[ComparisonOp] = &[ComparisonOp::Btw, ComparisonOp::Nbtw];

pub(crate) const PATTERN_OPS: &[ComparisonOp] = &[ComparisonOp::Like, ComparisonOp::Nlike];

pub(crate) fn unsupported_op_message(column: &Column, op: &ComparisonOp) -> String {
    format!(
        "{} field '{}' does not support the '{}' operation",
        column.uidt, column.title, op
    )
}

pub(crate) fn unsupported(filter: &FilterCondition, column: &Column) -> MetaqueryError {
    MetaqueryError::Validation(unsupported_op_message(column, &filter.op))
}

/// Splits a list-valued filter: a JSON array, or a comma-separated string.
pub(crate) fn values_of(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        other => vec![other.to_string()],
    }
}

/// Wraps a bare term in `%..%` unless the caller already placed wildcards.
pub(crate) fn like_pattern(term: &str) -> String {
    if term.starts_with('%') || term.ends_with('%') {
        term.to_string()
    } else {
        format!("%{term}%")
    }
}

pub(crate) fn order_operator(op: &ComparisonOp) -> Option<SqlBinaryOperator> {
    Some(match op {
        ComparisonOp::Gt => SqlBinaryOperator::Gt,
        ComparisonOp::Lt => SqlBinaryOperator::Lt,
        ComparisonOp::Gte | ComparisonOp::Ge => SqlBinaryOperator::Gte,
        ComparisonOp::Lte | ComparisonOp::Le => SqlBinaryOperator::Lte,
        _ => return None,
    })
}

/// NULL, or the empty string for text-like columns.
pub(crate) fn blank(field: SqlExpr, text: bool) -> SqlExpr {
    if text {
        SqlExpr::or(vec![
            SqlExpr::is_null(field.clone()),
            SqlExpr::eq(field, SqlExpr::literal("")),
        ])
    } else {
        SqlExpr::is_null(field)
    }
}

pub(crate) fn not_blank(field: SqlExpr, text: bool) -> SqlExpr {
    if text {
        SqlExpr::and(vec![
            SqlExpr::is_not_null(field.clone()),
            SqlExpr::binary(SqlBinaryOperator::Neq, field, SqlExpr::literal("")),
        ])
    } else {
        SqlExpr::is_not_null(field)
    }
}

/// `field <> v OR field IS NULL`; exclusions keep rows with no value.
pub(crate) fn neq_or_null(field: SqlExpr, value: SqlExpr) -> SqlExpr {
    SqlExpr::or(vec![
        SqlExpr::binary(SqlBinaryOperator::Neq, field.clone(), value),
        SqlExpr::is_null(field),
    ])
}

pub(crate) fn like(field: SqlExpr, term: &str, negated: bool) -> SqlExpr {
    let matched = SqlExpr::Like {
        expr: Box::new(field.clone()),
        pattern: Box::new(SqlExpr::literal(like_pattern(term))),
        negated,
    };
    if negated {
        SqlExpr::or(vec![matched, SqlExpr::is_null(field)])
    } else {
        matched
    }
}

pub(crate) fn apply_negate(filter: &FilterCondition, expr: SqlExpr) -> SqlExpr {
    if filter.negate {
        SqlExpr::not(expr)
    } else {
        expr
    }
}

pub(crate) fn requires_value(op: &ComparisonOp) -> bool {
    matches!(
        op,
        ComparisonOp::Gt
            | ComparisonOp::Lt
            | ComparisonOp::Gte
            | ComparisonOp::Lte
            | ComparisonOp::Ge
            | ComparisonOp::Le
            | ComparisonOp::Like
            | ComparisonOp::Nlike
            | ComparisonOp::In
            | ComparisonOp::Btw
            | ComparisonOp::Nbtw
            | ComparisonOp::AllOf
            | ComparisonOp::AnyOf
            | ComparisonOp::NAllOf
            | ComparisonOp::NAnyOf
    )
}

/// Operator, sub-op and value-shape checks common to the scalar handlers.
/// `check_value` validates each individual value and returns a message on failure.
pub(crate) fn verify_scalar(
    filter: &FilterCondition,
    column: &Column,
    allowed: &[&[ComparisonOp]],
    check_value: &dyn Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut errors = Vec::new();
    if !allowed.iter().any(|ops| ops.contains(&filter.op)) {
        errors.push(unsupported_op_message(column, &filter.op));
        return errors;
    }
    if let Some(sub_op) = &filter.sub_op {
        errors.push(format!(
            "{} field '{}' does not support the '{}' sub-operation",
            column.uidt, column.title, sub_op
        ));
    }
    if filter.op.ignores_value() {
        return errors;
    }
    let values = match filter.op {
        ComparisonOp::In
        | ComparisonOp::Btw
        | ComparisonOp::Nbtw
        | ComparisonOp::AllOf
        | ComparisonOp::AnyOf
        | ComparisonOp::NAllOf
        | ComparisonOp::NAnyOf => values_of(&filter.value),
        _ => filter.value_str().into_iter().collect(),
    };
    if values.is_empty() && requires_value(&filter.op) {
        errors.push(format!(
            "'{}' on field '{}' requires a value",
            filter.op, column.title
        ));
        return errors;
    }
    if RANGE_OPS.contains(&filter.op) && values.len() != 2 {
        errors.push(format!(
            "'{}' on field '{}' requires exactly two values, got {}",
            filter.op,
            column.title,
            values.len()
        ));
    }
    if !PATTERN_OPS.contains(&filter.op) {
        errors.extend(values.iter().filter_map(|v| check_value(v)));
    }
    errors
}

/// Shared WHERE generation for scalar columns. `convert` turns one textual
/// value into its SQL literal; `text` selects blank-string semantics.
pub(crate) fn scalar_condition(
    filter: &FilterCondition,
    column: &Column,
    field: SqlExpr,
    text: bool,
    convert: &dyn Fn(&str) -> Result<SqlExpr>,
) -> Result<SqlExpr> {
    let value = filter.value_str();
    let expr = match &filter.op {
        ComparisonOp::Eq => match value {
            None => blank(field, text),
            Some(v) => SqlExpr::eq(field, convert(&v)?),
        },
        ComparisonOp::Neq | ComparisonOp::Not => match value {
            None => not_blank(field, text),
            Some(v) => neq_or_null(field, convert(&v)?),
        },
        op if order_operator(op).is_some() => {
            let v = value.ok_or_else(|| missing_value(filter, column))?;
            let sql_op = order_operator(op).ok_or_else(|| unsupported(filter, column))?;
            SqlExpr::binary(sql_op, field, convert(&v)?)
        }
        ComparisonOp::Like | ComparisonOp::Nlike => {
            let v = value.ok_or_else(|| missing_value(filter, column))?;
            like(field, &v, filter.op == ComparisonOp::Nlike)
        }
        ComparisonOp::Empty => {
            if text {
                SqlExpr::eq(field, SqlExpr::literal(""))
            } else {
                SqlExpr::is_null(field)
            }
        }
        ComparisonOp::NotEmpty => not_blank(field, text),
        ComparisonOp::Null => SqlExpr::is_null(field),
        ComparisonOp::NotNull => SqlExpr::is_not_null(field),
        ComparisonOp::Blank => blank(field, text),
        ComparisonOp::NotBlank => not_blank(field, text),
        ComparisonOp::In => {
            let list = values_of(&filter.value)
                .iter()
                .map(|v| convert(v))
                .collect::<Result<Vec<_>>>()?;
            SqlExpr::InList {
                expr: Box::new(field),
                list,
                negated: false,
            }
        }
        ComparisonOp::Btw | ComparisonOp::Nbtw => {
            let bounds = values_of(&filter.value);
            let [low, high] = bounds.as_slice() else {
                return Err(MetaqueryError::Validation(format!(
                    "'{}' on field '{}' requires exactly two values",
                    filter.op, column.title
                )));
            };
            SqlExpr::Between {
                expr: Box::new(field),
                low: Box::new(convert(low)?),
                high: Box::new(convert(high)?),
                negated: filter.op == ComparisonOp::Nbtw,
            }
        }
        _ => return Err(unsupported(filter, column)),
    };
    Ok(apply_negate(filter, expr))
}

pub(crate) fn missing_value(filter: &FilterCondition, column: &Column) -> MetaqueryError {
    MetaqueryError::Validation(format!(
        "'{}' on field '{}' requires a value",
        filter.op, column.title
    ))
}
