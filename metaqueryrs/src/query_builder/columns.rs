//! Column resolution and projection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{MetaqueryError, Result};
use crate::links::{find_column, LinkInfo};
use crate::models::{ColOptions, Column, Model, RelationType, Uidt, View};
use crate::rollup::{ListShape, RelationCompiler, RelationFetch};
use crate::sql_ast::{Join, SqlExpr};

use super::PlanKind;

/// A column chosen for output, in output order.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedColumn<'m> {
    pub column: &'m Column,
    pub hidden: bool,
}

/// ResolveColumns: the view's shown columns in view order, or every
/// non-system column in model order. The primary key is always selected.
pub(crate) fn resolve_columns<'m>(
    model: &'m Model,
    view: Option<&View>,
    fields: Option<&[String]>,
) -> Result<Vec<ResolvedColumn<'m>>> {
    let mut columns: Vec<&'m Column> = match view {
        Some(view) => view
            .ordered_columns()
            .into_iter()
            .filter(|vc| vc.show)
            .filter_map(|vc| {
                let column = model.column(&vc.column_id);
                if column.is_none() {
                    tracing::debug!(view = %view.meta.id, column = %vc.column_id, "skipping view column with no model column");
                }
                column
            })
            .collect(),
        None => model.columns.iter().filter(|c| !c.system).collect(),
    };

    if let Some(fields) = fields {
        let mut wanted = HashSet::new();
        for field in fields {
            let column = model
                .column(field)
                .or_else(|| model.column_by_title(field))
                .ok_or_else(|| MetaqueryError::not_found("column", field.clone()))?;
            wanted.insert(column.id.as_str());
        }
        columns.retain(|c| wanted.contains(c.id.as_str()));
    }

    let mut resolved: Vec<ResolvedColumn<'m>> = columns
        .into_iter()
        .map(|column| ResolvedColumn {
            column,
            hidden: false,
        })
        .collect();
    if let Some(pk) = model.primary_key() {
        if !resolved.iter().any(|rc| rc.column.id == pk.id) {
            resolved.push(ResolvedColumn {
                column: pk,
                hidden: true,
            });
        }
    }
    Ok(resolved)
}

/// Columns a user may see, and therefore filter or sort by.
pub(crate) fn visible_columns(model: &Model, view: Option<&View>) -> HashSet<String> {
    match view {
        Some(view) => view
            .columns
            .iter()
            .filter(|vc| vc.show)
            .map(|vc| vc.column_id.clone())
            .collect(),
        None => model
            .columns
            .iter()
            .filter(|c| !c.system)
            .map(|c| c.id.clone())
            .collect(),
    }
}

/// Where a projected column's value comes from.
pub(crate) enum Projected {
    Sql(SqlExpr),
    /// A follow-up fetch keyed by an outer-row expression.
    Fetch(RelationFetch, SqlExpr),
}

/// Builds the value expression of each root column, sharing one LEFT JOIN
/// per belongs-to relation column.
pub(crate) struct Projection<'c, 'a> {
    relations: &'c RelationCompiler<'a>,
    model: &'c Arc<Model>,
    alias: &'c str,
    plan: PlanKind,
    joins: Vec<Join>,
    join_aliases: HashMap<String, String>,
    fetches: usize,
}

impl<'c, 'a> Projection<'c, 'a> {
    pub fn new(relations: &'c RelationCompiler<'a>, model: &'c Arc<Model>, alias: &'c str, plan: PlanKind) -> Self {
        Self {
            relations,
            model,
            alias,
            plan,
            joins: Vec::new(),
            join_aliases: HashMap::new(),
            fetches: 0,
        }
    }

    pub fn into_joins(self) -> Vec<Join> {
        self.joins
    }

    /// True when the column yields many values per row.
    pub fn is_list(&self, column: &Column) -> Result<bool> {
        let mut model = self.model.clone();
        let mut column = column.clone();
        for _ in 0..8 {
            let target = match &column.options {
                ColOptions::Link(_) if column.uidt == Uidt::Links => return Ok(false),
                ColOptions::Link(_) => return Ok(self.relations.link_info(&model, &column)?.is_many()),
                ColOptions::Lookup(opts) => {
                    let info = self.relations.relation_of(&model, &column)?;
                    if info.is_many() {
                        return Ok(true);
                    }
                    let target = find_column(&info.related, &opts.target_column_id)?.clone();
                    model = info.related.clone();
                    target
                }
                _ => return Ok(false),
            };
            column = target;
        }
        Ok(false)
    }

    pub fn value(&mut self, column: &Column) -> Result<Projected> {
        match &column.options {
            ColOptions::Button(_) => Err(MetaqueryError::Validation(format!(
                "button field '{}' has no value",
                column.title
            ))),
            ColOptions::Formula(_) => {
                if let Some(error) = column.formula_error() {
                    return Err(MetaqueryError::Validation(format!(
                        "formula '{}' is invalid: {error}",
                        column.title
                    )));
                }
                self.inline(column)
            }
            ColOptions::Rollup(_) | ColOptions::Lookup(_) | ColOptions::Link(_) => {
                let info = self.relations.relation_of(self.model, column)?;
                if info.is_cross_base() {
                    return self.fetch(column);
                }
                if info.relation_type == RelationType::BelongsTo
                    && matches!(column.options, ColOptions::Lookup(_) | ColOptions::Link(_))
                    && column.uidt != Uidt::Links
                {
                    return self.through_join(&info, column);
                }
                let list = matches!(column.options, ColOptions::Lookup(_) | ColOptions::Link(_))
                    && self.is_list(column)?;
                if list && self.plan == PlanKind::Portable {
                    return self.fetch(column);
                }
                self.inline(column)
            }
            ColOptions::Plain | ColOptions::AiField(_) | ColOptions::QrCode(_) | ColOptions::Barcode(_) => {
                self.inline(column)
            }
        }
    }

    fn inline(&self, column: &Column) -> Result<Projected> {
        self.relations
            .column_expr(self.model, self.alias, column, ListShape::JsonArray)
            .map(Projected::Sql)
    }

    fn fetch(&mut self, column: &Column) -> Result<Projected> {
        let outer_key = format!("__k{}", self.fetches);
        let (fetch, outer) = self
            .relations
            .relation_fetch(self.model, self.alias, column, &outer_key)?;
        self.fetches += 1;
        Ok(Projected::Fetch(fetch, outer))
    }

    /// Belongs-to LTARs and lookups read the related row through a LEFT JOIN
    /// registered once per relation column.
    fn through_join(&mut self, info: &LinkInfo, column: &Column) -> Result<Projected> {
        let alias = match self.join_aliases.get(&info.column.id) {
            Some(alias) => alias.clone(),
            None => {
                let (join, alias) = self.relations.belongs_to_join(info, self.alias);
                self.joins.push(join);
                self.join_aliases.insert(info.column.id.clone(), alias.clone());
                alias
            }
        };
        let target = match &column.options {
            ColOptions::Lookup(opts) => find_column(&info.related, &opts.target_column_id)?.clone(),
            _ => info.related.display_value().cloned().ok_or_else(|| {
                MetaqueryError::Sql(format!(
                    "related table '{}' of field '{}' has no display column",
                    info.related.title, column.title
                ))
            })?,
        };
        self.relations
            .column_expr(&info.related, &alias, &target, ListShape::JsonArray)
            .map(Projected::Sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::fixtures;
    use crate::models::{ViewColumn, ViewMeta, ViewType};

    fn view(columns: Vec<ViewColumn>) -> View {
        View {
            meta: ViewMeta {
                id: "v1".into(),
                model_id: "m_cust".into(),
                title: "Grid".into(),
                view_type: ViewType::Grid,
            },
            columns,
            filters: vec![],
            sorts: vec![],
        }
    }

    #[test]
    fn view_order_wins_over_model_order() {
        let model = fixtures::customers();
        let v = view(vec![
            ViewColumn::new("cu_total", 1.0),
            ViewColumn::new("cu_name", 2.0),
            ViewColumn::new("cu_count", 0.5).hidden(),
        ]);
        let resolved = resolve_columns(&model, Some(&v), None).unwrap();
        let ids: Vec<(&str, bool)> = resolved
            .iter()
            .map(|rc| (rc.column.id.as_str(), rc.hidden))
            .collect();
        assert_eq!(ids, vec![("cu_total", false), ("cu_name", false), ("cu_id", true)]);
    }

    #[test]
    fn fields_restrict_by_id_or_title() {
        let model = fixtures::customers();
        let fields = vec!["Name".to_string(), "cu_total".to_string()];
        let resolved = resolve_columns(&model, None, Some(&fields)).unwrap();
        let ids: Vec<&str> = resolved.iter().map(|rc| rc.column.id.as_str()).collect();
        assert_eq!(ids, vec!["cu_name", "cu_total", "cu_id"]);

        let missing = vec!["Nope".to_string()];
        assert!(matches!(
            resolve_columns(&model, None, Some(&missing)),
            Err(MetaqueryError::NotFound { kind: "column", .. })
        ));
    }

    #[test]
    fn system_columns_hidden_without_view() {
        let model = fixtures::orders();
        let visible = visible_columns(&model, None);
        assert!(!visible.contains("or_cust"));
        assert!(visible.contains("or_amount"));
    }
}
