//! ResolveSorts: request sorts first, then the view's sorts on columns the
//! request did not already sort by. Falls back to the primary key.

use std::collections::HashSet;

use crate::error::{MetaqueryError, Result};
use crate::models::{Model, Sort, SortDirection, View};
use crate::sql_ast::{OrderItem, SqlExpr};

use super::columns::{Projected, Projection};

pub(crate) fn resolve_sorts(
    projection: &mut Projection<'_, '_>,
    model: &Model,
    view: Option<&View>,
    request_sorts: &[Sort],
    visible: &HashSet<String>,
    alias: &str,
) -> Result<Vec<OrderItem>> {
    let mut seen = HashSet::new();
    let view_sorts = view.map(|v| v.sorts.as_slice()).unwrap_or_default();
    let pk_id = model.primary_key().map(|pk| pk.id.as_str());

    let mut order_by = Vec::new();
    for (sort, from_request) in request_sorts
        .iter()
        .map(|s| (s, true))
        .chain(view_sorts.iter().map(|s| (s, false)))
    {
        if !seen.insert(sort.column_id.as_str()) {
            if !from_request {
                tracing::trace!(column = %sort.column_id, "view sort shadowed by request sort");
            }
            continue;
        }
        let column = model
            .column(&sort.column_id)
            .ok_or_else(|| MetaqueryError::not_found("column", sort.column_id.clone()))?;
        if !visible.contains(&column.id) && Some(column.id.as_str()) != pk_id {
            return Err(MetaqueryError::Validation(format!(
                "cannot sort by hidden field '{}'",
                column.title
            )));
        }
        if projection.is_list(column)? {
            return Err(MetaqueryError::Validation(format!(
                "cannot sort by field '{}': it holds more than one value per row",
                column.title
            )));
        }
        let expr = match projection.value(column)? {
            Projected::Sql(expr) => expr,
            Projected::Fetch(..) => {
                return Err(MetaqueryError::Validation(format!(
                    "cannot sort by field '{}': it reads from another base",
                    column.title
                )))
            }
        };
        order_by.push(OrderItem {
            expr,
            direction: sort.direction,
        });
    }

    if order_by.is_empty() {
        if let Some(pk) = model.primary_key() {
            order_by.push(OrderItem {
                expr: SqlExpr::column(alias, &pk.column_name),
                direction: SortDirection::Asc,
            });
        }
    }
    Ok(order_by)
}
