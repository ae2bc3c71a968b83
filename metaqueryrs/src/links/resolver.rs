//! Link and unlink mutations.
//!
//! Every mutation first checks that the owning rows and the linked rows
//! exist, each against its own source, and reads the key values the foreign
//! key or junction columns store. The statements then run in one transaction
//! on the source that owns the written table.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{MetaqueryError, Result};
use crate::fanout::try_for_each_bounded;
use crate::models::{Column, LinkRow, Model, RecordId, RelationType};
use crate::rollup::key_of;
use crate::sources::SourceRegistry;
use crate::sql_ast::{
    DeleteStatement, InsertStatement, SelectItem, SelectQuery, SqlExpr, SqlRenderer, Statement, TableRef,
    UpdateStatement,
};

use super::LinkInfo;

const ID_ALIAS: &str = "__id";
const KEY_ALIAS: &str = "__key";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkOutcome {
    pub statements: usize,
    pub affected_rows: u64,
}

/// Statements for one source, run as a single transaction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MutationPlan {
    pub base_id: String,
    pub statements: Vec<Statement>,
}

/// Stored key values by record id, for both sides of a relation.
#[derive(Debug, Default)]
pub(crate) struct Keys {
    owner: HashMap<String, Value>,
    related: HashMap<String, Value>,
}

impl Keys {
    fn owner(&self, id: &RecordId) -> Result<SqlExpr> {
        lookup_key(&self.owner, id)
    }

    fn related(&self, id: &RecordId) -> Result<SqlExpr> {
        lookup_key(&self.related, id)
    }
}

fn lookup_key(keys: &HashMap<String, Value>, id: &RecordId) -> Result<SqlExpr> {
    keys.get(&id.key())
        .cloned()
        .map(SqlExpr::Literal)
        .ok_or_else(|| MetaqueryError::not_found("record", id.key()))
}

pub struct LinkResolver<'a> {
    sources: &'a SourceRegistry,
    concurrency: usize,
}

impl<'a> LinkResolver<'a> {
    pub fn new(sources: &'a SourceRegistry, concurrency: usize) -> Self {
        Self {
            sources,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn link(&self, info: &LinkInfo, rows: &[LinkRow]) -> Result<LinkOutcome> {
        let rows = non_empty(rows);
        if rows.is_empty() {
            return Ok(LinkOutcome::default());
        }
        let keys = self.load_keys(info, &rows).await?;
        let existing = match info.relation_type {
            RelationType::ManyToMany => self.existing_pairs(info, &rows, &keys).await?,
            _ => HashSet::new(),
        };
        let plan = plan_link(info, &rows, &keys, &existing)?;
        self.execute(plan).await
    }

    pub async fn unlink(&self, info: &LinkInfo, rows: &[LinkRow]) -> Result<LinkOutcome> {
        let rows = non_empty(rows);
        if rows.is_empty() {
            return Ok(LinkOutcome::default());
        }
        let keys = self.load_keys(info, &rows).await?;
        let plan = plan_unlink(info, &rows, &keys)?;
        self.execute(plan).await
    }

    /// Existence check for both sides, concurrently. Any missing id is
    /// `NotFound` with that id.
    async fn load_keys(&self, info: &LinkInfo, rows: &[&LinkRow]) -> Result<Keys> {
        let owner_ids: Vec<RecordId> = rows.iter().map(|r| r.row_id.clone()).collect();
        let related_ids: Vec<RecordId> = rows.iter().flat_map(|r| r.link_ids.iter().cloned()).collect();
        let (owner_key, related_key) = key_columns(info)?;
        let sides = vec![
            (info.model.clone(), owner_key, owner_ids),
            (info.related.clone(), related_key, related_ids),
        ];
        let mut found = try_for_each_bounded(self.concurrency, sides, |(model, key, ids)| async move {
            self.fetch_keys(&model, &key, &ids).await
        })
        .await?
        .into_iter();
        Ok(Keys {
            owner: found.next().unwrap_or_default(),
            related: found.next().unwrap_or_default(),
        })
    }

    async fn fetch_keys(&self, model: &Arc<Model>, key: &Column, ids: &[RecordId]) -> Result<HashMap<String, Value>> {
        let pk = primary_key(model)?;
        let mut seen = HashSet::new();
        let unique: Vec<&RecordId> = ids.iter().filter(|id| seen.insert(id.key())).collect();
        let query = SelectQuery {
            select: vec![
                SelectItem::aliased(bare(pk), ID_ALIAS),
                SelectItem::aliased(bare(key), KEY_ALIAS),
            ],
            from: TableRef {
                name: model.table_name.clone(),
                alias: None,
            },
            filters: vec![in_list(bare(pk), unique.iter().map(|id| SqlExpr::Literal(id.to_value())))],
            ..Default::default()
        };
        let conn = self.sources.get(&model.base_id)?;
        let sql = SqlRenderer::new(conn.dialect()).render_select(&query);
        let result = conn.execute_sql(&sql).await?;

        let keys: HashMap<String, Value> = result
            .rows
            .into_iter()
            .filter_map(|mut row| {
                let id = row.get(ID_ALIAS).and_then(key_of)?;
                Some((id, row.remove(KEY_ALIAS).unwrap_or(Value::Null)))
            })
            .collect();
        if let Some(missing) = unique.iter().find(|id| !keys.contains_key(&id.key())) {
            tracing::debug!(table = %model.title, id = %missing, "link target does not exist");
            return Err(MetaqueryError::not_found("record", missing.key()));
        }
        Ok(keys)
    }

    /// Junction pairs already present among the requested ones.
    async fn existing_pairs(&self, info: &LinkInfo, rows: &[&LinkRow], keys: &Keys) -> Result<HashSet<(String, String)>> {
        let junction = info.junction()?;
        let (jchild, jparent) = junction_columns(info)?;
        let mut owners = Vec::new();
        let mut related = Vec::new();
        for row in rows {
            owners.push(keys.owner(&row.row_id)?);
            for link in &row.link_ids {
                related.push(keys.related(link)?);
            }
        }
        let query = SelectQuery {
            select: vec![
                SelectItem::aliased(bare(jchild), ID_ALIAS),
                SelectItem::aliased(bare(jparent), KEY_ALIAS),
            ],
            from: TableRef {
                name: junction.table_name.clone(),
                alias: None,
            },
            filters: vec![in_list(bare(jchild), owners), in_list(bare(jparent), related)],
            ..Default::default()
        };
        let conn = self.sources.get(&junction.base_id)?;
        let sql = SqlRenderer::new(conn.dialect()).render_select(&query);
        let result = conn.execute_sql(&sql).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| Some((key_of(row.get(ID_ALIAS)?)?, key_of(row.get(KEY_ALIAS)?)?)))
            .collect())
    }

    async fn execute(&self, plan: MutationPlan) -> Result<LinkOutcome> {
        if plan.statements.is_empty() {
            return Ok(LinkOutcome::default());
        }
        let conn = self.sources.get(&plan.base_id)?;
        let renderer = SqlRenderer::new(conn.dialect());
        let statements: Vec<String> = plan
            .statements
            .iter()
            .map(|s| renderer.render_statement(s))
            .collect();
        let affected_rows = conn.execute_batch(&statements).await?;
        tracing::debug!(
            base = %plan.base_id,
            statements = statements.len(),
            affected_rows,
            "link mutation committed"
        );
        Ok(LinkOutcome {
            statements: statements.len(),
            affected_rows,
        })
    }
}

fn non_empty(rows: &[LinkRow]) -> Vec<&LinkRow> {
    rows.iter().filter(|r| !r.link_ids.is_empty()).collect()
}

fn bare(column: &Column) -> SqlExpr {
    SqlExpr::Column {
        table: None,
        name: column.column_name.clone(),
    }
}

fn in_list(expr: SqlExpr, values: impl IntoIterator<Item = SqlExpr>) -> SqlExpr {
    SqlExpr::InList {
        expr: Box::new(expr),
        list: values.into_iter().collect(),
        negated: false,
    }
}

fn primary_key(model: &Model) -> Result<&Column> {
    model
        .primary_key()
        .ok_or_else(|| MetaqueryError::Validation(format!("table '{}' has no primary key", model.title)))
}

/// Columns whose values the written side stores: (owner side, related side).
fn key_columns(info: &LinkInfo) -> Result<(Column, Column)> {
    let owner_pk = primary_key(&info.model)?.clone();
    let related_pk = primary_key(&info.related)?.clone();
    Ok(match info.relation_type {
        RelationType::HasMany => (info.join.parent.clone(), related_pk),
        RelationType::BelongsTo => (owner_pk, info.join.parent.clone()),
        RelationType::ManyToMany => (info.join.child.clone(), info.join.parent.clone()),
    })
}

fn junction_columns(info: &LinkInfo) -> Result<(&Column, &Column)> {
    match (&info.join.junction_child, &info.join.junction_parent) {
        (Some(child), Some(parent)) => Ok((child, parent)),
        _ => Err(MetaqueryError::Sql(format!(
            "many-to-many column '{}' is missing its junction columns",
            info.column.title
        ))),
    }
}

/// Has-many and belongs-to links overwrite: when one batch links the same
/// child row twice, the last link wins and the overwrite is logged.
pub(crate) fn plan_link(
    info: &LinkInfo,
    rows: &[&LinkRow],
    keys: &Keys,
    existing: &HashSet<(String, String)>,
) -> Result<MutationPlan> {
    let child = info.child_model();
    let mut statements = Vec::new();
    match info.relation_type {
        RelationType::HasMany | RelationType::BelongsTo => {
            // child row key -> (child id, parent id)
            let mut assigned: HashMap<String, (RecordId, RecordId)> = HashMap::new();
            let mut order = Vec::new();
            for row in rows {
                for link in &row.link_ids {
                    let (child_id, parent_id) = match info.relation_type {
                        RelationType::HasMany => (link.clone(), row.row_id.clone()),
                        _ => (row.row_id.clone(), link.clone()),
                    };
                    let slot = child_id.key();
                    match assigned.insert(slot.clone(), (child_id, parent_id.clone())) {
                        Some((_, previous)) if previous.key() != parent_id.key() => {
                            tracing::warn!(
                                column = %info.column.title,
                                row = %slot,
                                previous = %previous,
                                winner = %parent_id,
                                "row linked twice in one batch, keeping the last link"
                            );
                        }
                        Some(_) => {}
                        None => order.push(slot),
                    }
                }
            }
            let fk = &info.join.child;
            let child_pk = primary_key(child)?;
            let mut by_parent: BTreeMap<String, (RecordId, Vec<RecordId>)> = BTreeMap::new();
            for slot in &order {
                let Some((child_id, parent_id)) = assigned.get(slot) else {
                    continue;
                };
                by_parent
                    .entry(parent_id.key())
                    .or_insert_with(|| (parent_id.clone(), Vec::new()))
                    .1
                    .push(child_id.clone());
            }
            for (parent_id, children) in by_parent.into_values() {
                let parent_key = match info.relation_type {
                    RelationType::HasMany => keys.owner(&parent_id)?,
                    _ => keys.related(&parent_id)?,
                };
                statements.push(Statement::Update(UpdateStatement {
                    table: child.table_name.clone(),
                    assignments: vec![(fk.column_name.clone(), parent_key)],
                    filters: vec![in_list(
                        bare(child_pk),
                        children.iter().map(|c| SqlExpr::Literal(c.to_value())),
                    )],
                }));
            }
        }
        RelationType::ManyToMany => {
            let junction = info.junction()?;
            let (jchild, jparent) = junction_columns(info)?;
            let mut seen = existing.clone();
            let mut values = Vec::new();
            for row in rows {
                let owner = keys.owner(&row.row_id)?;
                for link in &row.link_ids {
                    let related = keys.related(link)?;
                    let pair = match (&owner, &related) {
                        (SqlExpr::Literal(a), SqlExpr::Literal(b)) => (key_of(a), key_of(b)),
                        _ => (None, None),
                    };
                    if let (Some(a), Some(b)) = pair {
                        if !seen.insert((a, b)) {
                            continue;
                        }
                    }
                    values.push(vec![owner.clone(), related]);
                }
            }
            if !values.is_empty() {
                statements.push(Statement::Insert(InsertStatement {
                    table: junction.table_name.clone(),
                    columns: vec![jchild.column_name.clone(), jparent.column_name.clone()],
                    rows: values,
                }));
            }
        }
    }
    Ok(MutationPlan {
        base_id: child.base_id.clone(),
        statements,
    })
}

/// Has-many and belongs-to unlinks clear the foreign key only where it
/// still points at the given parent. Missing junction pairs are a no-op.
pub(crate) fn plan_unlink(info: &LinkInfo, rows: &[&LinkRow], keys: &Keys) -> Result<MutationPlan> {
    let child = info.child_model();
    let mut statements = Vec::new();
    for row in rows {
        let statement = match info.relation_type {
            RelationType::HasMany => {
                let fk = bare(&info.join.child);
                Statement::Update(UpdateStatement {
                    table: child.table_name.clone(),
                    assignments: vec![(info.join.child.column_name.clone(), SqlExpr::null())],
                    filters: vec![
                        in_list(
                            bare(primary_key(child)?),
                            row.link_ids.iter().map(|l| SqlExpr::Literal(l.to_value())),
                        ),
                        SqlExpr::eq(fk, keys.owner(&row.row_id)?),
                    ],
                })
            }
            RelationType::BelongsTo => {
                let parents = row
                    .link_ids
                    .iter()
                    .map(|l| keys.related(l))
                    .collect::<Result<Vec<_>>>()?;
                Statement::Update(UpdateStatement {
                    table: child.table_name.clone(),
                    assignments: vec![(info.join.child.column_name.clone(), SqlExpr::null())],
                    filters: vec![
                        SqlExpr::eq(bare(primary_key(child)?), SqlExpr::Literal(row.row_id.to_value())),
                        in_list(bare(&info.join.child), parents),
                    ],
                })
            }
            RelationType::ManyToMany => {
                let (jchild, jparent) = junction_columns(info)?;
                let related = row
                    .link_ids
                    .iter()
                    .map(|l| keys.related(l))
                    .collect::<Result<Vec<_>>>()?;
                Statement::Delete(DeleteStatement {
                    table: info.junction()?.table_name.clone(),
                    filters: vec![
                        SqlExpr::eq(bare(jchild), keys.owner(&row.row_id)?),
                        in_list(bare(jparent), related),
                    ],
                })
            }
        };
        statements.push(statement);
    }
    Ok(MutationPlan {
        base_id: child.base_id.clone(),
        statements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::links::{fixtures, get_link_info};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn info(model_id: &str, column_id: &str) -> LinkInfo {
        let models = fixtures::lookup();
        let model = models[model_id].clone();
        let column = model.column(column_id).unwrap().clone();
        get_link_info(&models, &model, &column).unwrap()
    }

    /// Keys equal to ids, as when the relation references primary keys.
    fn identity_keys(owner: &[i64], related: &[i64]) -> Keys {
        Keys {
            owner: owner.iter().map(|i| (i.to_string(), json!(i))).collect(),
            related: related.iter().map(|i| (i.to_string(), json!(i))).collect(),
        }
    }

    fn render(plan: &MutationPlan) -> Vec<String> {
        let renderer = SqlRenderer::new(DialectKind::Sqlite3.dialect());
        plan.statements.iter().map(|s| renderer.render_statement(s)).collect()
    }

    fn ids(values: &[i64]) -> Vec<RecordId> {
        values.iter().map(|v| RecordId::Int(*v)).collect()
    }

    #[test]
    fn has_many_link_is_last_write_wins() {
        let info = info("m_cust", "cu_orders");
        let rows = [LinkRow::new(1i64, ids(&[10, 11])), LinkRow::new(2i64, ids(&[10]))];
        let refs: Vec<&LinkRow> = rows.iter().collect();
        let plan = plan_link(&info, &refs, &identity_keys(&[1, 2], &[10, 11]), &HashSet::new()).unwrap();
        assert_eq!(plan.base_id, "b1");
        assert_eq!(
            render(&plan),
            vec![
                "UPDATE \"orders\" SET \"customer_id\" = 1 WHERE \"id\" IN (11)",
                "UPDATE \"orders\" SET \"customer_id\" = 2 WHERE \"id\" IN (10)",
            ]
        );
    }

    #[test]
    fn many_to_many_link_skips_present_pairs() {
        let info = info("m_film", "fi_actors");
        let rows = [LinkRow::new(1i64, ids(&[5, 6, 5]))];
        let refs: Vec<&LinkRow> = rows.iter().collect();
        let existing: HashSet<(String, String)> = [("1".to_string(), "6".to_string())].into_iter().collect();
        let plan = plan_link(&info, &refs, &identity_keys(&[1], &[5, 6]), &existing).unwrap();
        assert_eq!(
            render(&plan),
            vec!["INSERT INTO \"film_actors\" (\"film_id\", \"actor_id\") VALUES (1, 5)"]
        );

        let all_present: HashSet<(String, String)> =
            [("1".to_string(), "5".to_string()), ("1".to_string(), "6".to_string())]
                .into_iter()
                .collect();
        let plan = plan_link(&info, &refs, &identity_keys(&[1], &[5, 6]), &all_present).unwrap();
        assert!(plan.statements.is_empty());
    }

    #[test]
    fn has_many_unlink_guards_on_parent() {
        let info = info("m_cust", "cu_orders");
        let rows = [LinkRow::new(1i64, ids(&[10]))];
        let refs: Vec<&LinkRow> = rows.iter().collect();
        let plan = plan_unlink(&info, &refs, &identity_keys(&[1], &[10])).unwrap();
        assert_eq!(
            render(&plan),
            vec!["UPDATE \"orders\" SET \"customer_id\" = NULL WHERE \"id\" IN (10) AND (\"customer_id\" = 1)"]
        );
    }

    #[test]
    fn belongs_to_link_writes_the_child_row() {
        let info = info("m_ord", "or_customer");
        let rows = [LinkRow::new(10i64, ids(&[1, 2]))];
        let refs: Vec<&LinkRow> = rows.iter().collect();
        let plan = plan_link(&info, &refs, &identity_keys(&[10], &[1, 2]), &HashSet::new()).unwrap();
        assert_eq!(
            render(&plan),
            vec!["UPDATE \"orders\" SET \"customer_id\" = 2 WHERE \"id\" IN (10)"]
        );
    }

    #[test]
    fn missing_key_is_not_found() {
        let keys = identity_keys(&[1], &[]);
        assert!(matches!(
            keys.related(&RecordId::Int(99)),
            Err(MetaqueryError::NotFound { kind: "record", id }) if id == "99"
        ));
    }
}
