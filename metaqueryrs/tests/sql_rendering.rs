//! Rendering of the SQL AST across dialects.

use metaquery::dialect::DialectKind;
use metaquery::models::SortDirection;
use metaquery::sql_ast::{
    DeleteStatement, InsertStatement, Join, OrderItem, SelectItem, SelectQuery, SqlExpr, SqlJoinType,
    SqlRenderer, Statement, TableRef, UpdateStatement,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn orders_query() -> SelectQuery {
    SelectQuery {
        select: vec![
            SelectItem::aliased(SqlExpr::column("t", "amount"), "Amount"),
            SelectItem::aliased(SqlExpr::column("bt1", "name"), "Customer"),
        ],
        from: TableRef::new("orders", "t"),
        joins: vec![Join {
            join_type: SqlJoinType::Left,
            table: TableRef::new("customers", "bt1"),
            on: vec![SqlExpr::eq(
                SqlExpr::column("bt1", "id"),
                SqlExpr::column("t", "customer_id"),
            )],
        }],
        order_by: vec![OrderItem {
            expr: SqlExpr::column("t", "id"),
            direction: SortDirection::Desc,
        }],
        limit: Some(26),
        ..Default::default()
    }
}

#[test]
fn renders_left_join_order_and_limit() {
    let sql = SqlRenderer::new(DialectKind::Pg.dialect()).render_select(&orders_query());
    assert_eq!(
        sql,
        "SELECT \"t\".\"amount\" AS \"Amount\", \"bt1\".\"name\" AS \"Customer\" \
         FROM \"orders\" \"t\" LEFT JOIN \"customers\" \"bt1\" ON (\"bt1\".\"id\" = \"t\".\"customer_id\") \
         ORDER BY \"t\".\"id\" DESC LIMIT 26"
    );
}

#[test]
fn mixed_and_or_keeps_nesting() {
    let mut query = orders_query();
    query.joins.clear();
    query.select.truncate(1);
    query.order_by.clear();
    query.limit = None;
    query.filters = vec![
        SqlExpr::or(vec![
            SqlExpr::eq(SqlExpr::column("t", "status"), SqlExpr::literal("open")),
            SqlExpr::and(vec![
                SqlExpr::eq(SqlExpr::column("t", "status"), SqlExpr::literal("closed")),
                SqlExpr::is_null(SqlExpr::column("t", "closed_at")),
            ]),
        ]),
        SqlExpr::not(SqlExpr::eq(SqlExpr::column("t", "amount"), SqlExpr::literal(0))),
    ];

    let sql = SqlRenderer::new(DialectKind::Pg.dialect()).render_select(&query);
    assert!(
        sql.contains(
            "WHERE ((\"t\".\"status\" = 'open') OR ((\"t\".\"status\" = 'closed') AND \"t\".\"closed_at\" IS NULL))"
        ),
        "{sql}"
    );
    assert!(sql.contains("NOT"), "{sql}");
}

#[test]
fn identifiers_quote_per_dialect() {
    let expr = SqlExpr::column("t", "order`s");
    assert_eq!(
        SqlRenderer::new(DialectKind::Mysql2.dialect()).render_expr(&expr),
        "`t`.`order``s`"
    );
    assert_eq!(
        SqlRenderer::new(DialectKind::Mssql.dialect()).render_expr(&SqlExpr::column("t", "a]b")),
        "[t].[a]]b]"
    );
    assert_eq!(
        SqlRenderer::new(DialectKind::Sqlite3.dialect()).render_expr(&SqlExpr::column("t", "a\"b")),
        "\"t\".\"a\"\"b\""
    );
}

#[test]
fn mssql_pages_with_fetch_next() {
    let mut query = orders_query();
    query.order_by.clear();
    query.offset = Some(50);
    let sql = SqlRenderer::new(DialectKind::Mssql.dialect()).render_select(&query);
    assert!(
        sql.ends_with(" ORDER BY (SELECT NULL) OFFSET 50 ROWS FETCH NEXT 26 ROWS ONLY"),
        "{sql}"
    );
}

#[test]
fn string_literals_are_escaped() {
    let sql = SqlRenderer::new(DialectKind::Pg.dialect()).render_expr(&SqlExpr::literal("O'Brien"));
    assert_eq!(sql, "'O''Brien'");
}

#[test]
fn renders_mutation_statements() {
    let renderer = SqlRenderer::new(DialectKind::Pg.dialect());

    let insert = Statement::Insert(InsertStatement {
        table: "film_actors".into(),
        columns: vec!["film_id".into(), "actor_id".into()],
        rows: vec![
            vec![SqlExpr::literal(1), SqlExpr::literal(2)],
            vec![SqlExpr::literal(1), SqlExpr::literal(3)],
        ],
    });
    assert_eq!(
        renderer.render_statement(&insert),
        "INSERT INTO \"film_actors\" (\"film_id\", \"actor_id\") VALUES (1, 2), (1, 3)"
    );

    let update = Statement::Update(UpdateStatement {
        table: "orders".into(),
        assignments: vec![("customer_id".into(), SqlExpr::null())],
        filters: vec![SqlExpr::eq(SqlExpr::Raw("\"id\"".into()), SqlExpr::literal(json!(10)))],
    });
    assert_eq!(
        renderer.render_statement(&update),
        "UPDATE \"orders\" SET \"customer_id\" = NULL WHERE (\"id\" = 10)"
    );

    let delete = Statement::Delete(DeleteStatement {
        table: "film_actors".into(),
        filters: Vec::new(),
    });
    assert_eq!(renderer.render_statement(&delete), "DELETE FROM \"film_actors\"");
}
