use std::sync::Arc;

use metaquery::backends::SqliteConnection;
use metaquery::models::{
    ColOptions, Column, LinkOptions, LookupOptions, Model, RelationType, TableMeta, Uidt,
};
use metaquery::{
    BackendConnection, DataService, InMemoryMetaStore, LinkRequest, LinkRow, ListRequest, MetaqueryConfig,
    SourceRegistry,
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT, country TEXT)",
    "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER, amount REAL)",
    "INSERT INTO customers VALUES (1, 'Alice', 'US'), (2, 'Bob', 'UK'), (3, 'Carla', 'US')",
    "INSERT INTO orders VALUES (1, 1, 100.0), (2, 1, 50.0), (3, 2, 25.0)",
];

fn table(id: &str, title: &str, columns: Vec<Column>) -> Model {
    Model::new(
        TableMeta {
            id: id.into(),
            base_id: "shop".into(),
            title: title.into(),
            table_name: id.into(),
        },
        columns,
    )
}

fn models() -> Vec<Model> {
    let belongs_to = ColOptions::Link(LinkOptions {
        relation_type: RelationType::BelongsTo,
        related_model_id: "customers".into(),
        child_column_id: "o_customer_id".into(),
        parent_column_id: "c_id".into(),
        junction_model_id: None,
        junction_child_column_id: None,
        junction_parent_column_id: None,
        related_base_id: None,
        junction_base_id: None,
    });
    vec![
        table(
            "customers",
            "Customers",
            vec![
                Column::plain("c_id", "customers", "Id", "id", Uidt::ID).primary(),
                Column::plain("c_name", "customers", "Name", "name", Uidt::SingleLineText).display(),
                Column::plain("c_country", "customers", "Country", "country", Uidt::SingleSelect),
            ],
        ),
        table(
            "orders",
            "Orders",
            vec![
                Column::plain("o_id", "orders", "Id", "id", Uidt::ID).primary(),
                Column::plain("o_amount", "orders", "Amount", "amount", Uidt::Currency),
                Column::plain("o_customer_id", "orders", "customer_id", "customer_id", Uidt::ForeignKey).system(),
                Column::plain("o_customer", "orders", "Customer", "customer", Uidt::LinkToAnotherRecord)
                    .with_options(belongs_to),
                Column::plain("o_country", "orders", "Country", "country", Uidt::Lookup).with_options(
                    ColOptions::Lookup(LookupOptions {
                        relation_column_id: "o_customer".into(),
                        target_column_id: "c_country".into(),
                    }),
                ),
            ],
        ),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    metaquery::telemetry::init_tracing();

    let dir = tempfile::tempdir()?;
    let conn = Arc::new(SqliteConnection::open(dir.path().join("shop.db"))?);
    conn.execute_batch(&SCHEMA.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .await?;

    let mut sources = SourceRegistry::new();
    sources.insert("shop", conn);
    let store = Arc::new(InMemoryMetaStore::with_models(models()));
    let service = DataService::new(store, sources, MetaqueryConfig::load_default());

    service
        .link(&LinkRequest {
            model_id: "orders".into(),
            column_id: "o_customer".into(),
            links: vec![LinkRow::new(3i64, vec![3i64.into()])],
            unlinks: Vec::new(),
        })
        .await?;

    let response = service.list(&ListRequest::new("orders")).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
