//! End-to-end tests against in-memory SQLite.
//!
//! These exercise the full stack: connection state machine, statement
//! pagination, error classification and the schema platform, all through
//! the public API.

use std::sync::Arc;

use strata_core::prelude::*;
use strata_core::sqlite::SqliteDriver;

async fn connection() -> Connection {
    let driver = SqliteDriver::connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");
    let conn = Connection::new(Arc::new(driver));
    conn.set_prefix("app_");
    conn
}

async fn names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn.prepare("SELECT `name` FROM `#__t` ORDER BY `name`");
    stmt.execute().await.unwrap();
    stmt.fetch_columns("name")
        .await
        .unwrap()
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

#[tokio::test]
async fn test_three_level_savepoint_round_trip() {
    let conn = connection().await;
    conn.execute("CREATE TABLE `#__t` (name TEXT)").await.unwrap();

    conn.begin_transaction().await.unwrap();
    conn.insert("#__t", &[("name", "foo".into())]).await.unwrap();

    conn.begin_transaction().await.unwrap();
    conn.insert("#__t", &[("name", "bar".into())]).await.unwrap();

    conn.begin_transaction().await.unwrap();
    conn.insert("#__t", &[("name", "baz".into())]).await.unwrap();
    assert_eq!(conn.transaction_depth(), 3);

    // Innermost rolls back, middle commits, outermost commits.
    conn.roll_back().await.unwrap();
    conn.commit().await.unwrap();
    conn.commit().await.unwrap();

    assert!(!conn.in_transaction());
    assert_eq!(names(&conn).await, vec!["bar", "foo"]);
}

#[tokio::test]
async fn test_outer_rollback_discards_committed_inner_level() {
    let conn = connection().await;
    conn.execute("CREATE TABLE `#__t` (name TEXT)").await.unwrap();

    conn.begin_transaction().await.unwrap();
    conn.begin_transaction().await.unwrap();
    conn.insert("#__t", &[("name", "inner".into())])
        .await
        .unwrap();
    conn.commit().await.unwrap();
    conn.roll_back().await.unwrap();

    assert!(names(&conn).await.is_empty());
}

#[tokio::test]
async fn test_pagination_window_live() {
    let conn = connection().await;
    conn.execute("CREATE TABLE `#__t` (id INTEGER PRIMARY KEY, name TEXT)")
        .await
        .unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        conn.insert("#__t", &[("name", name.into())]).await.unwrap();
    }

    let mut stmt = conn.prepare("SELECT `name` FROM `#__t` ORDER BY `id`");
    stmt.set_limit(2).set_offset(1);
    stmt.execute().await.unwrap();
    let window = stmt.fetch_columns("name").await.unwrap();
    assert_eq!(
        window,
        vec![SqlValue::from("b"), SqlValue::from("c")]
    );

    // Moving the window recompiles and fetches the new slice.
    stmt.set_offset(3);
    stmt.execute().await.unwrap();
    let window = stmt.fetch_columns("name").await.unwrap();
    assert_eq!(
        window,
        vec![SqlValue::from("d"), SqlValue::from("e")]
    );
}

#[tokio::test]
async fn test_error_classification_live() {
    let conn = connection().await;
    let platform = conn.platform().unwrap();

    let mut users = Table::new("#__users");
    users
        .add_column(Column::new("id", ColumnType::Int).identity())
        .add_column(Column::new("name", ColumnType::VarChar).limit(50))
        .add_index(Index::new(["name"]).unique());
    users.create(platform.as_ref()).await.unwrap();

    let mut posts = Table::new("#__posts");
    posts
        .add_column(Column::new("id", ColumnType::Int).identity())
        .add_column(Column::new("uid", ColumnType::Int))
        .add_foreign_key(ForeignKey::new(["uid"], "#__users", ["id"]));
    posts.create(platform.as_ref()).await.unwrap();

    conn.insert("#__users", &[("name", "a".into())]).await.unwrap();

    let err = conn
        .insert("#__users", &[("name", "a".into())])
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UniqueConstraintViolation(_)));

    let err = conn
        .insert("#__posts", &[("uid", 42.into())])
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::ForeignKeyConstraintViolation(_)));
}

#[tokio::test]
async fn test_upsert_failure_rolls_back_cleanly() {
    let conn = connection().await;
    let platform = conn.platform().unwrap();

    let mut table = Table::new("#__t");
    table
        .add_column(Column::new("id", ColumnType::Int).primary_key())
        .add_column(Column::new("name", ColumnType::VarChar).limit(20))
        .add_index(Index::new(["name"]).unique());
    table.create(platform.as_ref()).await.unwrap();

    conn.insert("#__t", &[("id", 1.into()), ("name", "a".into())])
        .await
        .unwrap();

    // Updating row 2 to a name that collides with row 1 must fail and
    // leave no transaction behind.
    conn.insert("#__t", &[("id", 2.into()), ("name", "b".into())])
        .await
        .unwrap();
    let err = conn
        .upsert("#__t", &[("id", 2.into())], &[("name", "a".into())])
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::UniqueConstraintViolation(_)));
    assert!(!conn.in_transaction());

    let mut stmt = conn.prepare("SELECT `name` FROM `#__t` WHERE `id` = :id");
    stmt.bind_value("id", 2);
    stmt.execute().await.unwrap();
    assert_eq!(
        stmt.fetch_next_column("name").await.unwrap(),
        Some(SqlValue::from("b"))
    );
}

#[tokio::test]
async fn test_table_save_creates_then_extends() {
    let conn = connection().await;
    let platform = conn.platform().unwrap();

    let mut table = Table::new("#__docs");
    table
        .add_column(Column::new("id", ColumnType::Int).identity())
        .add_column(Column::new("title", ColumnType::VarChar).limit(100));
    table.save(platform.as_ref()).await.unwrap();
    assert!(platform.has_table("#__docs").await.unwrap());

    // Second save with a fresh pending column updates in place.
    table.add_column(Column::new("body", ColumnType::Text).nullable());
    table.save(platform.as_ref()).await.unwrap();

    conn.insert(
        "#__docs",
        &[("title", "t".into()), ("body", "hello".into())],
    )
    .await
    .unwrap();

    let mut stmt = conn.prepare("SELECT `body` FROM `#__docs`");
    stmt.execute().await.unwrap();
    assert_eq!(
        stmt.fetch_next_column("body").await.unwrap(),
        Some(SqlValue::from("hello"))
    );
}

#[tokio::test]
async fn test_prefix_is_invisible_to_sql() {
    let conn = connection().await;
    conn.execute("CREATE TABLE `#__t` (name TEXT)").await.unwrap();

    // The physical table carries the prefix even though no statement
    // ever names it directly.
    let mut stmt = conn.prepare(
        "SELECT `name` FROM `sqlite_master` WHERE `type` = 'table' AND `name` = 'app_t'",
    );
    stmt.execute().await.unwrap();
    assert!(stmt.fetch_next_column(0).await.unwrap().is_some());
}
