//! Shared fixtures: customers and orders, films and actors in base `b1`,
//! reviews in base `b2`, each base backed by its own SQLite file.

#![allow(dead_code)]

use std::sync::Arc;

use metaquery::backends::SqliteConnection;
use metaquery::models::{
    ColOptions, Column, FormulaOptions, LinkOptions, LookupOptions, Model, RelationType, RollupFunction,
    RollupOptions, TableMeta, Uidt,
};
use metaquery::{BackendConnection, DataService, InMemoryMetaStore, MetaStore, MetaqueryConfig, SourceRegistry};
use tempfile::TempDir;

pub const MAIN: &str = "b1";
pub const OTHER: &str = "b2";

const MAIN_SCHEMA: &[&str] = &[
    "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)",
    "CREATE TABLE orders (id INTEGER PRIMARY KEY, amount REAL, customer_id INTEGER)",
    "CREATE TABLE films (id INTEGER PRIMARY KEY, title TEXT)",
    "CREATE TABLE actors (id INTEGER PRIMARY KEY, name TEXT)",
    "CREATE TABLE film_actors (film_id INTEGER, actor_id INTEGER)",
    "INSERT INTO customers (id, name) VALUES (1, 'Ada'), (2, 'Grace'), (3, 'Linus')",
    "INSERT INTO orders (id, amount, customer_id) VALUES (10, 5.5, 1), (11, 4.5, 1), (12, 20.0, 2)",
    "INSERT INTO films (id, title) VALUES (1, 'Alien'), (2, 'Heat')",
    "INSERT INTO actors (id, name) VALUES (1, 'Sigourney'), (2, 'Tom'), (3, 'Al')",
    "INSERT INTO film_actors (film_id, actor_id) VALUES (1, 1)",
];

const OTHER_SCHEMA: &[&str] = &[
    "CREATE TABLE reviews (id INTEGER PRIMARY KEY, body TEXT, customer_id INTEGER)",
    "INSERT INTO reviews (id, body, customer_id) VALUES (100, 'great', 1), (101, 'ok', 1)",
];

pub struct Fixture {
    pub service: DataService,
    pub store: Arc<InMemoryMetaStore>,
    pub main: Arc<SqliteConnection>,
    _dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(MetaqueryConfig::default()).await
    }

    pub async fn with_config(config: MetaqueryConfig) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let main = Arc::new(SqliteConnection::open(dir.path().join("main.db")).expect("open main"));
        let other = Arc::new(SqliteConnection::open(dir.path().join("other.db")).expect("open other"));
        seed(main.as_ref(), MAIN_SCHEMA).await;
        seed(other.as_ref(), OTHER_SCHEMA).await;

        let mut sources = SourceRegistry::new();
        sources.insert(MAIN, main.clone());
        sources.insert(OTHER, other);

        let store = Arc::new(InMemoryMetaStore::with_models(models()));
        let service = DataService::new(store.clone() as Arc<dyn MetaStore>, sources, config);
        Self {
            service,
            store,
            main,
            _dir: dir,
        }
    }

    /// First column of the first row of `sql` against base `b1`.
    pub async fn scalar(&self, sql: &str) -> serde_json::Value {
        let result = self.main.execute_sql(sql).await.expect("scalar query");
        result
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next().map(|(_, v)| v))
            .unwrap_or(serde_json::Value::Null)
    }
}

async fn seed(conn: &dyn BackendConnection, statements: &[&str]) {
    let statements: Vec<String> = statements.iter().map(|s| s.to_string()).collect();
    conn.execute_batch(&statements).await.expect("seed");
}

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

fn link(relation_type: RelationType, related: &str, child: &str, parent: &str) -> ColOptions {
    ColOptions::Link(LinkOptions {
        relation_type,
        related_model_id: related.into(),
        child_column_id: child.into(),
        parent_column_id: parent.into(),
        junction_model_id: None,
        junction_child_column_id: None,
        junction_parent_column_id: None,
        related_base_id: None,
        junction_base_id: None,
    })
}

pub fn models() -> Vec<Model> {
    let customers = model(
        "m_cust",
        MAIN,
        "customers",
        vec![
            Column::plain("cu_id", "m_cust", "Id", "id", Uidt::ID).primary(),
            Column::plain("cu_name", "m_cust", "Name", "name", Uidt::SingleLineText).display(),
            Column::plain("cu_orders", "m_cust", "Orders", "orders", Uidt::LinkToAnotherRecord)
                .with_options(link(RelationType::HasMany, "m_ord", "or_cust", "cu_id")),
            Column::plain("cu_count", "m_cust", "Order Count", "order_count", Uidt::Links)
                .with_options(link(RelationType::HasMany, "m_ord", "or_cust", "cu_id")),
            Column::plain("cu_total", "m_cust", "Total", "total", Uidt::Rollup).with_options(ColOptions::Rollup(
                RollupOptions {
                    relation_column_id: "cu_orders".into(),
                    target_column_id: "or_amount".into(),
                    function: RollupFunction::Sum,
                },
            )),
            Column::plain("cu_amounts", "m_cust", "Amounts", "amounts", Uidt::Lookup).with_options(ColOptions::Lookup(
                LookupOptions {
                    relation_column_id: "cu_orders".into(),
                    target_column_id: "or_amount".into(),
                },
            )),
            Column::plain("cu_reviews", "m_cust", "Reviews", "reviews", Uidt::LinkToAnotherRecord)
                .with_options(link(RelationType::HasMany, "m_rev", "rv_cust", "cu_id")),
            Column::plain("cu_label", "m_cust", "Label", "label", Uidt::Formula)
                .with_options(ColOptions::Formula(FormulaOptions::new("CONCAT({Name}, \"!\")"))),
            Column::plain("cu_broken", "m_cust", "Broken", "broken", Uidt::Formula)
                .with_options(ColOptions::Formula(FormulaOptions::new("CONCAT({Name}"))),
        ],
    );

    let orders = model(
        "m_ord",
        MAIN,
        "orders",
        vec![
            Column::plain("or_id", "m_ord", "Id", "id", Uidt::ID).primary(),
            Column::plain("or_amount", "m_ord", "Amount", "amount", Uidt::Decimal),
            Column::plain("or_cust", "m_ord", "customer_id", "customer_id", Uidt::ForeignKey).system(),
            Column::plain("or_customer", "m_ord", "Customer", "customer", Uidt::LinkToAnotherRecord)
                .with_options(link(RelationType::BelongsTo, "m_cust", "or_cust", "cu_id")),
            Column::plain("or_cname", "m_ord", "Customer Name", "customer_name", Uidt::Lookup).with_options(
                ColOptions::Lookup(LookupOptions {
                    relation_column_id: "or_customer".into(),
                    target_column_id: "cu_name".into(),
                }),
            ),
        ],
    );

    let films = model(
        "m_film",
        MAIN,
        "films",
        vec![
            Column::plain("fi_id", "m_film", "Id", "id", Uidt::ID).primary(),
            Column::plain("fi_title", "m_film", "Title", "title", Uidt::SingleLineText).display(),
            Column::plain("fi_actors", "m_film", "Actors", "actors", Uidt::LinkToAnotherRecord).with_options(
                ColOptions::Link(LinkOptions {
                    relation_type: RelationType::ManyToMany,
                    related_model_id: "m_actor".into(),
                    child_column_id: "fi_id".into(),
                    parent_column_id: "ac_id".into(),
                    junction_model_id: Some("m_fa".into()),
                    junction_child_column_id: Some("fa_film".into()),
                    junction_parent_column_id: Some("fa_actor".into()),
                    related_base_id: None,
                    junction_base_id: None,
                }),
            ),
        ],
    );

    let actors = model(
        "m_actor",
        MAIN,
        "actors",
        vec![
            Column::plain("ac_id", "m_actor", "Id", "id", Uidt::ID).primary(),
            Column::plain("ac_name", "m_actor", "Name", "name", Uidt::SingleLineText).display(),
        ],
    );

    let film_actors = model(
        "m_fa",
        MAIN,
        "film_actors",
        vec![
            Column::plain("fa_film", "m_fa", "film_id", "film_id", Uidt::ForeignKey),
            Column::plain("fa_actor", "m_fa", "actor_id", "actor_id", Uidt::ForeignKey),
        ],
    );

    let reviews = model(
        "m_rev",
        OTHER,
        "reviews",
        vec![
            Column::plain("rv_id", "m_rev", "Id", "id", Uidt::ID).primary(),
            Column::plain("rv_text", "m_rev", "Body", "body", Uidt::LongText).display(),
            Column::plain("rv_cust", "m_rev", "customer_id", "customer_id", Uidt::ForeignKey).system(),
        ],
    );

    vec![customers, orders, films, actors, film_actors, reviews]
}
