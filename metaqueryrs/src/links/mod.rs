//! Relation metadata and link/unlink mutations.

mod resolver;

use std::sync::Arc;

use crate::error::{MetaqueryError, Result};
use crate::meta_cache::{MetaResolver, ModelLookup};
use crate::models::{Column, LinkOptions, Model, RelationType};

pub use resolver::{LinkOutcome, LinkResolver};

/// Physical columns joining the two sides of a relation.
///
/// For has-many and belongs-to, `child` is the foreign key on the child table
/// and `parent` the key it references. For many-to-many, `child` is this
/// model's key, `parent` the related model's key, and the junction columns
/// point at each of them.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinColumns {
    pub child: Column,
    pub parent: Column,
    pub junction_child: Option<Column>,
    pub junction_parent: Option<Column>,
}

/// A relation column resolved against the models on both sides.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub relation_type: RelationType,
    pub column: Column,
    pub model: Arc<Model>,
    pub related: Arc<Model>,
    pub junction: Option<Arc<Model>>,
    pub join: JoinColumns,
}

impl LinkInfo {
    /// True when the related rows live in a different base than `model`, so
    /// no single statement can join both sides.
    pub fn is_cross_base(&self) -> bool {
        self.related.base_id != self.model.base_id
            || self
                .junction
                .as_ref()
                .is_some_and(|j| j.base_id != self.model.base_id)
    }

    /// Relations whose far side can hold many rows.
    pub fn is_many(&self) -> bool {
        self.relation_type != RelationType::BelongsTo
    }

    /// The table holding the foreign key that a link writes.
    pub fn child_model(&self) -> &Arc<Model> {
        match self.relation_type {
            RelationType::HasMany => &self.related,
            RelationType::BelongsTo => &self.model,
            RelationType::ManyToMany => self.junction.as_ref().unwrap_or(&self.related),
        }
    }

    pub fn junction(&self) -> Result<&Arc<Model>> {
        self.junction.as_ref().ok_or_else(|| {
            MetaqueryError::Sql(format!(
                "many-to-many column '{}' has no junction table",
                self.column.title
            ))
        })
    }
}

pub(crate) fn find_column<'m>(model: &'m Model, id: &str) -> Result<&'m Column> {
    model
        .column(id)
        .ok_or_else(|| MetaqueryError::not_found("column", id))
}

fn options(column: &Column) -> Result<&LinkOptions> {
    column.link_options().ok_or_else(|| {
        MetaqueryError::Validation(format!("field '{}' is not a relation", column.title))
    })
}

fn pinned(models: &dyn ModelLookup, id: &str) -> Result<Arc<Model>> {
    models
        .lookup_model(id)
        .ok_or_else(|| MetaqueryError::not_found("model", id))
}

/// `getLinkInfo`: relation type, related model and join columns, derived from
/// the column options. Related models must already be resolved in `models`.
/// A base id recorded on the link must name the base the target model lives in.
fn check_base(column: &Column, declared: Option<&str>, target: &Model) -> Result<()> {
    match declared {
        Some(base_id) if base_id != target.base_id => Err(MetaqueryError::Sql(format!(
            "link column '{}' expects model '{}' in base '{base_id}', found it in base '{}'",
            column.title, target.id, target.base_id
        ))),
        _ => Ok(()),
    }
}

pub fn get_link_info(models: &dyn ModelLookup, model: &Arc<Model>, column: &Column) -> Result<LinkInfo> {
    let opts = options(column)?;
    let related = pinned(models, &opts.related_model_id)?;
    check_base(column, opts.related_base_id.as_deref(), &related)?;
    let (junction, join) = match opts.relation_type {
        RelationType::HasMany => (
            None,
            JoinColumns {
                child: find_column(&related, &opts.child_column_id)?.clone(),
                parent: find_column(model, &opts.parent_column_id)?.clone(),
                junction_child: None,
                junction_parent: None,
            },
        ),
        RelationType::BelongsTo => (
            None,
            JoinColumns {
                child: find_column(model, &opts.child_column_id)?.clone(),
                parent: find_column(&related, &opts.parent_column_id)?.clone(),
                junction_child: None,
                junction_parent: None,
            },
        ),
        RelationType::ManyToMany => {
            let junction_id = opts.junction_model_id.as_deref().ok_or_else(|| {
                MetaqueryError::Sql(format!(
                    "many-to-many column '{}' has no junction table",
                    column.title
                ))
            })?;
            let junction = pinned(models, junction_id)?;
            check_base(column, opts.junction_base_id.as_deref(), &junction)?;
            let junction_column = |id: &Option<String>, side: &str| -> Result<Column> {
                let id = id.as_deref().ok_or_else(|| {
                    MetaqueryError::Sql(format!(
                        "many-to-many column '{}' is missing its junction {side} column",
                        column.title
                    ))
                })?;
                Ok(find_column(&junction, id)?.clone())
            };
            let join = JoinColumns {
                child: find_column(model, &opts.child_column_id)?.clone(),
                parent: find_column(&related, &opts.parent_column_id)?.clone(),
                junction_child: Some(junction_column(&opts.junction_child_column_id, "child")?),
                junction_parent: Some(junction_column(&opts.junction_parent_column_id, "parent")?),
            };
            (Some(junction), join)
        }
    };
    Ok(LinkInfo {
        relation_type: opts.relation_type,
        column: column.clone(),
        model: model.clone(),
        related,
        junction,
        join,
    })
}

/// Resolves the related and junction models through the resolver, then
/// builds the link info. A deleted target surfaces here as `NotFound`.
pub async fn resolve_link_info(resolver: &MetaResolver, model: &Arc<Model>, column: &Column) -> Result<LinkInfo> {
    let opts = options(column)?;
    let mut ids = vec![opts.related_model_id.clone()];
    ids.extend(opts.junction_model_id.clone());
    resolver.prefetch(ids).await?;
    get_link_info(resolver, model, column)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Customers (b1) have many Orders (b1); Films (b1) and Actors (b1) are
    //! many-to-many through FilmActors; Reviews live in another base (b2).

    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::models::{
        ColOptions, Column, LinkOptions, LookupOptions, Model, RelationType, RollupFunction,
        RollupOptions, TableMeta, Uidt,
    };

    fn model(id: &str, base: &str, table: &str, columns: Vec<Column>) -> Model {
        Model::new(
            TableMeta {
                id: id.into(),
                base_id: base.into(),
                title: table.into(),
                table_name: table.into(),
            },
            columns,
        )
    }

    pub fn link(
        relation_type: RelationType,
        related: &str,
        child: &str,
        parent: &str,
        junction: Option<(&str, &str, &str)>,
    ) -> ColOptions {
        ColOptions::Link(LinkOptions {
            relation_type,
            related_model_id: related.into(),
            child_column_id: child.into(),
            parent_column_id: parent.into(),
            junction_model_id: junction.map(|j| j.0.to_string()),
            junction_child_column_id: junction.map(|j| j.1.to_string()),
            junction_parent_column_id: junction.map(|j| j.2.to_string()),
            related_base_id: None,
            junction_base_id: None,
        })
    }

    pub fn customers() -> Model {
        model(
            "m_cust",
            "b1",
            "customers",
            vec![
                Column::plain("cu_id", "m_cust", "Id", "id", Uidt::ID).primary(),
                Column::plain("cu_name", "m_cust", "Name", "name", Uidt::SingleLineText).display(),
                Column::plain("cu_orders", "m_cust", "Orders", "orders", Uidt::LinkToAnotherRecord)
                    .with_options(link(RelationType::HasMany, "m_ord", "or_cust", "cu_id", None)),
                Column::plain("cu_count", "m_cust", "Order Count", "order_count", Uidt::Links)
                    .with_options(link(RelationType::HasMany, "m_ord", "or_cust", "cu_id", None)),
                Column::plain("cu_total", "m_cust", "Total", "total", Uidt::Rollup).with_options(
                    ColOptions::Rollup(RollupOptions {
                        relation_column_id: "cu_orders".into(),
                        target_column_id: "or_amount".into(),
                        function: RollupFunction::Sum,
                    }),
                ),
                Column::plain("cu_amounts", "m_cust", "Amounts", "amounts", Uidt::Lookup).with_options(
                    ColOptions::Lookup(LookupOptions {
                        relation_column_id: "cu_orders".into(),
                        target_column_id: "or_amount".into(),
                    }),
                ),
                Column::plain("cu_reviews", "m_cust", "Reviews", "reviews", Uidt::LinkToAnotherRecord)
                    .with_options(link(RelationType::HasMany, "m_rev", "rv_cust", "cu_id", None)),
            ],
        )
    }

    pub fn orders() -> Model {
        model(
            "m_ord",
            "b1",
            "orders",
            vec![
                Column::plain("or_id", "m_ord", "Id", "id", Uidt::ID).primary(),
                Column::plain("or_amount", "m_ord", "Amount", "amount", Uidt::Decimal),
                Column::plain("or_cust", "m_ord", "customer_id", "customer_id", Uidt::ForeignKey).system(),
                Column::plain("or_customer", "m_ord", "Customer", "customer", Uidt::LinkToAnotherRecord)
                    .with_options(link(RelationType::BelongsTo, "m_cust", "or_cust", "cu_id", None)),
                Column::plain("or_cname", "m_ord", "Customer Name", "customer_name", Uidt::Lookup)
                    .with_options(ColOptions::Lookup(LookupOptions {
                        relation_column_id: "or_customer".into(),
                        target_column_id: "cu_name".into(),
                    })),
                Column::plain("or_bad", "m_ord", "Bad Rollup", "bad_rollup", Uidt::Rollup).with_options(
                    ColOptions::Rollup(RollupOptions {
                        relation_column_id: "or_customer".into(),
                        target_column_id: "cu_id".into(),
                        function: RollupFunction::Count,
                    }),
                ),
            ],
        )
    }

    pub fn films() -> Model {
        model(
            "m_film",
            "b1",
            "films",
            vec![
                Column::plain("fi_id", "m_film", "Id", "id", Uidt::ID).primary(),
                Column::plain("fi_title", "m_film", "Title", "title", Uidt::SingleLineText).display(),
                Column::plain("fi_actors", "m_film", "Actors", "actors", Uidt::LinkToAnotherRecord)
                    .with_options(link(
                        RelationType::ManyToMany,
                        "m_actor",
                        "fi_id",
                        "ac_id",
                        Some(("m_fa", "fa_film", "fa_actor")),
                    )),
                Column::plain("fi_cast", "m_film", "Cast Size", "cast_size", Uidt::Rollup).with_options(
                    ColOptions::Rollup(RollupOptions {
                        relation_column_id: "fi_actors".into(),
                        target_column_id: "ac_id".into(),
                        function: RollupFunction::Count,
                    }),
                ),
            ],
        )
    }

    pub fn actors() -> Model {
        model(
            "m_actor",
            "b1",
            "actors",
            vec![
                Column::plain("ac_id", "m_actor", "Id", "id", Uidt::ID).primary(),
                Column::plain("ac_name", "m_actor", "Name", "name", Uidt::SingleLineText).display(),
            ],
        )
    }

    pub fn film_actors() -> Model {
        model(
            "m_fa",
            "b1",
            "film_actors",
            vec![
                Column::plain("fa_film", "m_fa", "film_id", "film_id", Uidt::ForeignKey),
                Column::plain("fa_actor", "m_fa", "actor_id", "actor_id", Uidt::ForeignKey),
            ],
        )
    }

    pub fn reviews() -> Model {
        model(
            "m_rev",
            "b2",
            "reviews",
            vec![
                Column::plain("rv_id", "m_rev", "Id", "id", Uidt::ID).primary(),
                Column::plain("rv_text", "m_rev", "Text", "body", Uidt::LongText).display(),
                Column::plain("rv_cust", "m_rev", "customer_id", "customer_id", Uidt::ForeignKey),
            ],
        )
    }

    pub fn all() -> Vec<Model> {
        vec![customers(), orders(), films(), actors(), film_actors(), reviews()]
    }

    pub fn lookup() -> HashMap<String, Arc<Model>> {
        all().into_iter().map(|m| (m.id.clone(), Arc::new(m))).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures;
    use super::*;
    use crate::models::ColOptions;

    #[test]
    fn has_many_join_columns() {
        let models = fixtures::lookup();
        let customers = models["m_cust"].clone();
        let info = get_link_info(&models, &customers, customers.column("cu_orders").unwrap()).unwrap();
        assert_eq!(info.relation_type, RelationType::HasMany);
        assert_eq!(info.related.table_name, "orders");
        assert_eq!(info.join.child.column_name, "customer_id");
        assert_eq!(info.join.parent.column_name, "id");
        assert!(!info.is_cross_base());
        assert_eq!(info.child_model().id, "m_ord");
    }

    #[test]
    fn many_to_many_uses_junction() {
        let models = fixtures::lookup();
        let films = models["m_film"].clone();
        let info = get_link_info(&models, &films, films.column("fi_actors").unwrap()).unwrap();
        assert_eq!(info.junction.as_ref().map(|j| j.table_name.as_str()), Some("film_actors"));
        assert_eq!(
            info.join.junction_parent.as_ref().map(|c| c.column_name.as_str()),
            Some("actor_id")
        );
    }

    #[test]
    fn cross_base_is_detected() {
        let models = fixtures::lookup();
        let customers = models["m_cust"].clone();
        let info = get_link_info(&models, &customers, customers.column("cu_reviews").unwrap()).unwrap();
        assert!(info.is_cross_base());
    }

    #[test]
    fn declared_base_ids_must_match() {
        let models = fixtures::lookup();
        let customers = models["m_cust"].clone();
        let mut column = customers.column("cu_reviews").unwrap().clone();
        let ColOptions::Link(opts) = &mut column.options else {
            unreachable!()
        };
        opts.related_base_id = Some("b2".into());
        assert!(get_link_info(&models, &customers, &column).is_ok());

        let ColOptions::Link(opts) = &mut column.options else {
            unreachable!()
        };
        opts.related_base_id = Some("b1".into());
        let err = get_link_info(&models, &customers, &column).unwrap_err();
        assert!(matches!(err, MetaqueryError::Sql(msg) if msg.contains("base 'b1'")));

        let films = models["m_film"].clone();
        let mut actors = films.column("fi_actors").unwrap().clone();
        let ColOptions::Link(opts) = &mut actors.options else {
            unreachable!()
        };
        opts.junction_base_id = Some("b2".into());
        assert!(matches!(
            get_link_info(&models, &films, &actors),
            Err(MetaqueryError::Sql(_))
        ));
    }

    #[test]
    fn deleted_target_is_not_found() {
        let mut models = fixtures::lookup();
        models.remove("m_ord");
        let customers = models["m_cust"].clone();
        let err = get_link_info(&models, &customers, customers.column("cu_orders").unwrap()).unwrap_err();
        assert!(matches!(err, MetaqueryError::NotFound { kind: "model", id } if id == "m_ord"));
    }
}
