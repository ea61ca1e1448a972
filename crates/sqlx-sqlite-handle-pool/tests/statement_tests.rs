use serde_json::json;
use sqlx_sqlite_handle_pool::{Error, SqliteHandlePool, StatementRegistry};
use tempfile::TempDir;

const INSERT_ITEM: &str = "INSERT INTO items (name, score) VALUES (?, ?)";

async fn create_test_pool() -> (SqliteHandlePool, TempDir) {
   let temp_dir = TempDir::new().unwrap();
   let pool = SqliteHandlePool::open(temp_dir.path().join("statements.db"), None)
      .await
      .unwrap();

   let mut writer = pool.acquire_write().await.unwrap();
   sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, score INTEGER)")
      .execute(&mut *writer)
      .await
      .unwrap();
   drop(writer);

   (pool, temp_dir)
}

#[tokio::test]
async fn test_compile_and_execute() {
   let (pool, _temp) = create_test_pool().await;
   let registry = StatementRegistry::new();
   let mut writer = pool.acquire_write().await.unwrap();

   registry
      .compile(&mut writer, "insert_item", INSERT_ITEM)
      .await
      .unwrap();
   assert!(registry.contains("insert_item"));
   assert_eq!(registry.sql("insert_item").as_deref(), Some(INSERT_ITEM));

   let first = registry
      .execute(&mut writer, "insert_item", vec![json!("a"), json!(1)])
      .await
      .unwrap();
   let second = registry
      .execute(&mut writer, "insert_item", vec![json!("b"), json!(2)])
      .await
      .unwrap();

   assert_eq!(first.rows_affected, 1);
   assert_eq!(second.last_insert_id, first.last_insert_id + 1);

   drop(writer);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_failed_compile_leaves_name_unregistered() {
   let (pool, _temp) = create_test_pool().await;
   let registry = StatementRegistry::new();
   let mut writer = pool.acquire_write().await.unwrap();

   let result = registry
      .compile(&mut writer, "broken", "INSERT INTO nowhere (x) VALUES (?)")
      .await;
   assert!(result.is_err());
   assert!(!registry.contains("broken"));

   let result = registry.execute(&mut writer, "broken", vec![json!(1)]).await;
   assert!(matches!(result, Err(Error::StatementUnavailable(name)) if name == "broken"));

   drop(writer);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_failed_execution_does_not_leak_into_next_call() {
   let (pool, _temp) = create_test_pool().await;
   let registry = StatementRegistry::new();
   let mut writer = pool.acquire_write().await.unwrap();
   registry
      .compile(&mut writer, "insert_item", INSERT_ITEM)
      .await
      .unwrap();

   registry
      .execute(&mut writer, "insert_item", vec![json!("dup"), json!(1)])
      .await
      .unwrap();
   let duplicate = registry
      .execute(&mut writer, "insert_item", vec![json!("dup"), json!(99)])
      .await;
   assert!(duplicate.is_err());

   registry
      .execute(&mut writer, "insert_item", vec![json!("fresh"), json!(null)])
      .await
      .unwrap();

   let score: Option<i64> = sqlx::query_scalar("SELECT score FROM items WHERE name = 'fresh'")
      .fetch_one(&mut *writer)
      .await
      .unwrap();
   assert_eq!(score, None);

   drop(writer);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_remove_and_close() {
   let (pool, _temp) = create_test_pool().await;
   let registry = StatementRegistry::new();
   let mut writer = pool.acquire_write().await.unwrap();

   registry.compile(&mut writer, "a", INSERT_ITEM).await.unwrap();
   registry
      .compile(&mut writer, "b", "UPDATE items SET score = ? WHERE name = ?")
      .await
      .unwrap();
   assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);

   assert!(registry.remove("a"));
   assert!(!registry.remove("a"));
   assert_eq!(registry.len(), 1);

   registry.close();
   assert!(registry.is_empty());

   drop(writer);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_statement_runs_on_a_different_handle() {
   let (pool, _temp) = create_test_pool().await;
   let registry = StatementRegistry::new();

   let mut first = pool.acquire_write().await.unwrap();
   registry
      .compile(&mut first, "insert_item", INSERT_ITEM)
      .await
      .unwrap();
   first.discard();
   drop(first);

   // Compiled on a handle that no longer exists
   let mut second = pool.acquire_write().await.unwrap();
   registry
      .execute(&mut second, "insert_item", vec![json!("moved"), json!(5)])
      .await
      .unwrap();

   drop(second);
   pool.remove().await.unwrap();
}
