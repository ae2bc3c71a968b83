use super::{FieldHandler, FilterContext, FilterVerification};
use crate::error::{MetaqueryError, Result};
use crate::formula::FormulaType;
use crate::models::{Column, FilterCondition, Uidt};
use crate::sql_ast::SqlExpr;

/// The uidt whose handler filters a formula column, chosen by its inferred result type.
pub fn formula_filter_uidt(ty: FormulaType) -> Uidt {
    match ty {
        FormulaType::Numeric => Uidt::Decimal,
        FormulaType::Boolean => Uidt::Checkbox,
        FormulaType::Date => Uidt::DateTime,
        FormulaType::String | FormulaType::Unknown => Uidt::SingleLineText,
    }
}

/// Buttons carry no value, so they can never appear in a filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonHandler;

impl FieldHandler for ButtonHandler {
    fn verify_filter(&self, _filter: &FilterCondition, column: &Column) -> FilterVerification {
        FilterVerification::from_errors(vec![format!(
            "button field '{}' cannot be used in filters",
            column.title
        )])
    }

    fn to_sql_condition(
        &self,
        _filter: &FilterCondition,
        column: &Column,
        _field: SqlExpr,
        _ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        Err(MetaqueryError::Validation(format!(
            "button field '{}' cannot be used in filters",
            column.title
        )))
    }
}
