pub mod backends;
pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod field_handler;
pub mod formula;
pub mod links;
pub mod meta_cache;
pub mod meta_store;
pub mod models;
pub mod pagination;
pub mod query_builder;
pub mod rollup;
pub mod runtime;
pub mod sources;
pub mod sql_ast;
pub mod telemetry;

pub use backends::BackendConnection;
pub use config::MetaqueryConfig;
pub use dialect::DialectKind;
pub use error::{MetaqueryError, Result};
pub use executor::{QueryExecutor, QueryResult};
pub use field_handler::HandlerRegistry;
pub use links::{LinkOutcome, LinkResolver};
pub use meta_cache::{Invalidation, MetaCache, MetaResolver};
pub use meta_store::{InMemoryMetaStore, MetaStore};
pub use models::{Column, Filter, LinkRequest, LinkRow, Model, Sort, View};
pub use query_builder::{CompiledQuery, ListRequest, QueryCompiler};
pub use runtime::{DataService, ListResponse};
pub use sources::{connect, SourceClient, SourceRegistry};
