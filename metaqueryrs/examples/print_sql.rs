use std::{env, fs, sync::Arc};

use metaquery::config::QueryConfig;
use metaquery::models::{
    ColOptions, Column, LinkOptions, Model, RelationType, RollupFunction, RollupOptions, TableMeta, Uidt,
};
use metaquery::query_builder::resolve_view;
use metaquery::{DialectKind, HandlerRegistry, InMemoryMetaStore, ListRequest, MetaCache, MetaResolver, QueryCompiler};

fn usage() {
    eprintln!("Usage: print_sql <dialect> [request_json]");
    eprintln!("Example: cargo run --example print_sql -- pg '{{\"modelId\":\"customers\",\"pageSize\":5}}'");
}

fn shop() -> Vec<Model> {
    let has_many = ColOptions::Link(LinkOptions {
        relation_type: RelationType::HasMany,
        related_model_id: "orders".into(),
        child_column_id: "orders.customer_id".into(),
        parent_column_id: "customers.id".into(),
        junction_model_id: None,
        junction_child_column_id: None,
        junction_parent_column_id: None,
        related_base_id: None,
        junction_base_id: None,
    });
    let customers = Model::new(
        TableMeta {
            id: "customers".into(),
            base_id: "shop".into(),
            title: "Customers".into(),
            table_name: "customers".into(),
        },
        vec![
            Column::plain("customers.id", "customers", "Id", "id", Uidt::ID).primary(),
            Column::plain("customers.name", "customers", "Name", "name", Uidt::SingleLineText).display(),
            Column::plain("customers.orders", "customers", "Orders", "orders", Uidt::LinkToAnotherRecord)
                .with_options(has_many),
            Column::plain("customers.spent", "customers", "Spent", "spent", Uidt::Rollup).with_options(
                ColOptions::Rollup(RollupOptions {
                    relation_column_id: "customers.orders".into(),
                    target_column_id: "orders.amount".into(),
                    function: RollupFunction::Sum,
                }),
            ),
        ],
    );
    let orders = Model::new(
        TableMeta {
            id: "orders".into(),
            base_id: "shop".into(),
            title: "Orders".into(),
            table_name: "orders".into(),
        },
        vec![
            Column::plain("orders.id", "orders", "Id", "id", Uidt::ID).primary(),
            Column::plain("orders.amount", "orders", "Amount", "amount", Uidt::Currency),
            Column::plain("orders.customer_id", "orders", "customer_id", "customer_id", Uidt::ForeignKey).system(),
        ],
    );
    vec![customers, orders]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    metaquery::telemetry::init_tracing();
    let args = env::args().skip(1).collect::<Vec<_>>();
    let Some(dialect) = args.first() else {
        usage();
        std::process::exit(1);
    };
    let dialect: DialectKind = dialect.parse()?;

    let request: ListRequest = match args.get(1) {
        Some(arg) if arg.trim_start().starts_with('{') => serde_json::from_str(arg)?,
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => ListRequest::new("customers"),
    };

    let store = Arc::new(InMemoryMetaStore::with_models(shop()));
    let cache = Arc::new(MetaCache::new("demo", &Default::default()));
    let resolver = MetaResolver::new(cache, store);
    let (model, view) = resolve_view(&resolver, &request).await?;

    let handlers = HandlerRegistry::standard();
    let config = QueryConfig::default();
    let compiled = QueryCompiler::new(&resolver, &handlers, dialect, &config).compile(&model, view.as_deref(), &request)?;
    println!("{}", compiled.sql);
    for fetch in &compiled.relation_fetches {
        println!("-- then fetch '{}' in {} step(s)", fetch.title, fetch.steps.len());
    }
    for error in &compiled.column_errors {
        eprintln!("skipped {}: {}", error.title, error.message);
    }
    Ok(())
}
