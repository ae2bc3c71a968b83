//! Cached metadata stays consistent with committed schema changes.
#![cfg(feature = "sqlite")]

mod support;

use metaquery::{Invalidation, ListRequest, MetaqueryError};
use pretty_assertions::assert_eq;
use support::Fixture;

fn rename_name_column(fx: &Fixture, title: &str) {
    let title = title.to_string();
    assert!(fx.store.update_model("m_cust", move |model| {
        if let Some(column) = model.columns.iter_mut().find(|c| c.id == "cu_name") {
            column.title = title;
        }
    }));
}

fn first_keys(list: &[serde_json::Map<String, serde_json::Value>]) -> Vec<String> {
    list[0].keys().cloned().collect()
}

#[tokio::test]
async fn repeated_lists_read_the_store_once() {
    let fx = Fixture::new().await;
    fx.service.list(&ListRequest::new("m_cust")).await.unwrap();
    let reads = fx.store.model_reads();
    fx.service.list(&ListRequest::new("m_cust")).await.unwrap();
    assert_eq!(fx.store.model_reads(), reads);
}

#[tokio::test]
async fn committed_change_invalidates_cached_model() {
    let fx = Fixture::new().await;
    fx.service.list(&ListRequest::new("m_cust")).await.unwrap();

    let store = fx.store.clone();
    fx.service
        .invalidate_after_commit(
            async move {
                store.update_model("m_cust", |model| {
                    if let Some(column) = model.columns.iter_mut().find(|c| c.id == "cu_name") {
                        column.title = "Full Name".into();
                    }
                });
                Ok(())
            },
            &[Invalidation::Model("m_cust".into())],
        )
        .await
        .unwrap();

    let response = fx.service.list(&ListRequest::new("m_cust")).await.unwrap();
    assert!(first_keys(&response.list).contains(&"Full Name".to_string()));
}

#[tokio::test]
async fn failed_commit_keeps_cache() {
    let fx = Fixture::new().await;
    fx.service.list(&ListRequest::new("m_cust")).await.unwrap();
    rename_name_column(&fx, "Renamed");

    let result: metaquery::Result<()> = fx
        .service
        .invalidate_after_commit(
            async { Err(MetaqueryError::Execution("rolled back".into())) },
            &[Invalidation::Model("m_cust".into())],
        )
        .await;
    assert!(result.is_err());

    // Uncommitted from the cache's point of view: readers keep the old snapshot.
    let response = fx.service.list(&ListRequest::new("m_cust")).await.unwrap();
    let keys = first_keys(&response.list);
    assert!(keys.contains(&"Name".to_string()), "{keys:?}");
    assert!(!keys.contains(&"Renamed".to_string()));
}

#[tokio::test]
async fn base_invalidation_drops_every_model_of_the_base() {
    let fx = Fixture::new().await;
    fx.service.list(&ListRequest::new("m_cust")).await.unwrap();
    fx.service.list(&ListRequest::new("m_ord")).await.unwrap();
    assert!(fx.service.cache().cached_model("m_ord").is_some());

    fx.service.cache().invalidate(&Invalidation::Base(support::MAIN.into()));
    assert!(fx.service.cache().cached_model("m_cust").is_none());
    assert!(fx.service.cache().cached_model("m_ord").is_none());
}

#[tokio::test]
async fn resolver_pins_snapshots_for_a_request() {
    let fx = Fixture::new().await;
    let resolver = fx.service.resolver();
    let before = resolver.model("m_cust").await.unwrap();

    rename_name_column(&fx, "Pinned");
    fx.service.cache().invalidate(&Invalidation::Model("m_cust".into()));

    let again = resolver.model("m_cust").await.unwrap();
    assert_eq!(before.column("cu_name").unwrap().title, "Name");
    assert_eq!(again.column("cu_name").unwrap().title, "Name");

    let fresh = fx.service.resolver().model("m_cust").await.unwrap();
    assert_eq!(fresh.column("cu_name").unwrap().title, "Pinned");
}
