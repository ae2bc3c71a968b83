//! Linking and unlinking records through relation columns.
#![cfg(feature = "sqlite")]

mod support;

use metaquery::models::RecordId;
use metaquery::{LinkRequest, LinkRow, MetaqueryError};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::Fixture;

fn request(model: &str, column: &str, links: Vec<LinkRow>, unlinks: Vec<LinkRow>) -> LinkRequest {
    LinkRequest {
        model_id: model.into(),
        column_id: column.into(),
        links,
        unlinks,
    }
}

fn ids(ids: &[i64]) -> Vec<RecordId> {
    ids.iter().copied().map(RecordId::from).collect()
}

#[tokio::test]
async fn many_to_many_link_is_idempotent() {
    let fx = Fixture::new().await;
    let req = request("m_film", "fi_actors", vec![LinkRow::new(1i64, ids(&[1, 2]))], Vec::new());

    let first = fx.service.link(&req).await.unwrap();
    assert_eq!(first.affected_rows, 1);
    let second = fx.service.link(&req).await.unwrap();
    assert_eq!(second.affected_rows, 0);

    assert_eq!(
        fx.scalar("SELECT COUNT(*) AS n FROM film_actors WHERE film_id = 1").await,
        json!(2)
    );
}

#[tokio::test]
async fn unlinking_a_missing_pair_is_a_no_op() {
    let fx = Fixture::new().await;
    let req = request("m_film", "fi_actors", Vec::new(), vec![LinkRow::new(2i64, ids(&[3]))]);
    let outcome = fx.service.unlink(&req).await.unwrap();
    assert_eq!(outcome.affected_rows, 0);

    let req = request("m_film", "fi_actors", Vec::new(), vec![LinkRow::new(1i64, ids(&[1]))]);
    let outcome = fx.service.unlink(&req).await.unwrap();
    assert_eq!(outcome.affected_rows, 1);
    assert_eq!(fx.scalar("SELECT COUNT(*) AS n FROM film_actors").await, json!(0));
}

#[tokio::test]
async fn has_many_last_write_wins() {
    let fx = Fixture::new().await;
    let req = request(
        "m_cust",
        "cu_orders",
        vec![LinkRow::new(1i64, ids(&[12])), LinkRow::new(3i64, ids(&[12]))],
        Vec::new(),
    );
    fx.service.link(&req).await.unwrap();

    assert_eq!(
        fx.scalar("SELECT customer_id FROM orders WHERE id = 12").await,
        json!(3)
    );
}

#[tokio::test]
async fn has_many_unlink_only_clears_own_children() {
    let fx = Fixture::new().await;
    // Order 12 belongs to customer 2, so unlinking it from customer 1 leaves it alone.
    let req = request(
        "m_cust",
        "cu_orders",
        Vec::new(),
        vec![LinkRow::new(1i64, ids(&[10, 12]))],
    );
    let outcome = fx.service.unlink(&req).await.unwrap();
    assert_eq!(outcome.affected_rows, 1);

    assert_eq!(fx.scalar("SELECT customer_id FROM orders WHERE id = 10").await, json!(null));
    assert_eq!(fx.scalar("SELECT customer_id FROM orders WHERE id = 12").await, json!(2));
}

#[tokio::test]
async fn belongs_to_link_sets_foreign_key() {
    let fx = Fixture::new().await;
    let req = request("m_ord", "or_customer", vec![LinkRow::new(12i64, ids(&[3]))], Vec::new());
    fx.service.link(&req).await.unwrap();
    assert_eq!(fx.scalar("SELECT customer_id FROM orders WHERE id = 12").await, json!(3));
}

#[tokio::test]
async fn linking_unknown_record_fails_without_writes() {
    let fx = Fixture::new().await;
    let req = request("m_film", "fi_actors", vec![LinkRow::new(1i64, ids(&[2, 99]))], Vec::new());
    let err = fx.service.link(&req).await.unwrap_err();
    assert!(
        matches!(&err, MetaqueryError::NotFound { kind: "record", id } if id == "99"),
        "{err:?}"
    );
    assert_eq!(fx.scalar("SELECT COUNT(*) AS n FROM film_actors").await, json!(1));
}

#[tokio::test]
async fn links_show_up_in_the_next_list() {
    let fx = Fixture::new().await;
    let req = request("m_film", "fi_actors", vec![LinkRow::new(2i64, ids(&[2, 3]))], Vec::new());
    fx.service.link(&req).await.unwrap();

    let mut list = metaquery::ListRequest::new("m_film");
    list.sorts = vec![metaquery::Sort::asc("fi_id")];
    let response = fx.service.list(&list).await.unwrap();
    let mut heat: Vec<String> = response.list[1]["Actors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    heat.sort();
    assert_eq!(heat, vec!["Al".to_string(), "Tom".to_string()]);
}
