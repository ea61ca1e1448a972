use sqlx::SqliteConnection;
use sqlx_sqlite_handle_pool::{Error, HandleMode, PoolConfig, SqliteHandlePool};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn create_test_pool(config: Option<PoolConfig>) -> (SqliteHandlePool, TempDir) {
   let temp_dir = TempDir::new().unwrap();
   let pool = SqliteHandlePool::open(temp_dir.path().join("test.db"), config)
      .await
      .unwrap();

   let mut writer = pool.acquire_write().await.unwrap();
   sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
      .execute(&mut *writer)
      .await
      .unwrap();
   drop(writer);

   (pool, temp_dir)
}

async fn count_items(conn: &mut SqliteConnection) -> i64 {
   sqlx::query_scalar("SELECT COUNT(*) FROM items")
      .fetch_one(conn)
      .await
      .unwrap()
}

// ============================================================================
// Reuse and idle bound
// ============================================================================

#[tokio::test]
async fn test_released_handle_is_reused() {
   let (pool, _temp) = create_test_pool(None).await;
   let opened_before = pool.stats().opened;

   let reader = pool.acquire_read().await.unwrap();
   pool.release(reader);
   let reader = pool.acquire_read().await.unwrap();
   drop(reader);

   assert_eq!(pool.stats().opened, opened_before + 1);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_excess_released_handles_are_closed() {
   let (pool, _temp) = create_test_pool(None).await;

   let mut readers = Vec::new();
   for _ in 0..5 {
      readers.push(pool.acquire_read().await.unwrap());
   }
   assert_eq!(pool.stats().in_use, 5);

   drop(readers);

   let stats = pool.stats();
   assert_eq!(stats.in_use, 0);
   assert_eq!(stats.idle, 3, "idle set must be capped at max_idle_handles");
   // The setup writer occupies one idle slot
   assert_eq!(stats.closed, 3);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_custom_idle_limit() {
   let config = PoolConfig {
      max_idle_handles: 1,
      ..Default::default()
   };
   let (pool, _temp) = create_test_pool(Some(config)).await;

   let a = pool.acquire_read().await.unwrap();
   let b = pool.acquire_read().await.unwrap();
   drop(a);
   drop(b);

   // The setup writer already fills the only idle slot
   assert_eq!(pool.stats().idle, 1);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_checkout_bound_waits_for_release() {
   let config = PoolConfig {
      max_open_handles: 1,
      ..Default::default()
   };
   let (pool, _temp) = create_test_pool(Some(config)).await;

   let held = pool.acquire_read().await.unwrap();
   let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire_read()).await;
   assert!(blocked.is_err(), "second acquisition should wait while the only slot is held");

   drop(held);
   let reader = tokio::time::timeout(Duration::from_secs(1), pool.acquire_read())
      .await
      .expect("slot should free up after release")
      .unwrap();
   drop(reader);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_readers() {
   use std::sync::atomic::{AtomicUsize, Ordering};
   use tokio::sync::Barrier;

   let (pool, _temp) = create_test_pool(None).await;
   let barrier = Arc::new(Barrier::new(3));
   let (active, max_seen) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));

   let tasks: Vec<_> = (0..3)
      .map(|_| {
         let (pool, barrier, active, max_seen) = (
            pool.clone(),
            Arc::clone(&barrier),
            Arc::clone(&active),
            Arc::clone(&max_seen),
         );

         tokio::spawn(async move {
            let mut reader = pool.acquire_read().await.unwrap();
            barrier.wait().await;
            max_seen.fetch_max(active.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(count_items(&mut reader).await, 0);

            active.fetch_sub(1, Ordering::SeqCst);
         })
      })
      .collect();

   for task in tasks {
      task.await.unwrap();
   }

   assert_eq!(max_seen.load(Ordering::SeqCst), 3);
   assert_eq!(pool.stats().idle, 3);
   pool.remove().await.unwrap();
}

// ============================================================================
// Scoped operations
// ============================================================================

#[tokio::test]
async fn test_with_handle_closes_handle_on_error() {
   let (pool, _temp) = create_test_pool(None).await;
   assert_eq!(pool.stats().idle, 1);

   let result: Result<(), Error> = pool
      .with_handle(HandleMode::ReadWrite, |conn| {
         Box::pin(async move {
            sqlx::query("SELECT * FROM missing_table")
               .fetch_all(conn)
               .await?;
            Ok(())
         })
      })
      .await;

   assert!(matches!(result, Err(Error::Sqlx(_))));
   let stats = pool.stats();
   assert_eq!(stats.in_use, 0);
   assert_eq!(stats.idle, 0);
   assert_eq!(stats.closed, 1);

   // A successful scoped call keeps its handle
   pool
      .with_handle(HandleMode::ReadWrite, |conn| {
         Box::pin(async move { Ok::<_, Error>(count_items(conn).await) })
      })
      .await
      .unwrap();
   assert_eq!(pool.stats().idle, 1);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_with_transaction_commits() {
   let (pool, _temp) = create_test_pool(None).await;

   let inserted: i64 = pool
      .with_transaction(|conn| {
         Box::pin(async move {
            sqlx::query("INSERT INTO items (name) VALUES ('a'), ('b')")
               .execute(&mut *conn)
               .await?;
            Ok::<_, Error>(count_items(conn).await)
         })
      })
      .await
      .unwrap();
   assert_eq!(inserted, 2);

   let mut reader = pool.acquire_read().await.unwrap();
   assert_eq!(count_items(&mut reader).await, 2);
   drop(reader);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_with_transaction_rolls_back_on_error() {
   let (pool, _temp) = create_test_pool(None).await;

   let result: Result<(), Error> = pool
      .with_transaction(|conn| {
         Box::pin(async move {
            sqlx::query("INSERT INTO items (name) VALUES ('a')")
               .execute(&mut *conn)
               .await?;
            // NOT NULL violation aborts the whole batch
            sqlx::query("INSERT INTO items (name) VALUES (NULL)")
               .execute(&mut *conn)
               .await?;
            Ok(())
         })
      })
      .await;
   assert!(result.is_err());

   // The failed transaction's handle was closed after rolling back
   let stats = pool.stats();
   assert_eq!(stats.idle, 0);
   assert_eq!(stats.closed, 1);

   let mut writer = pool.acquire_write().await.unwrap();
   assert_eq!(count_items(&mut writer).await, 0);
   drop(writer);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_dropped_transaction_discards_work_and_handle() {
   let (pool, _temp) = create_test_pool(None).await;
   let closed_before = pool.stats().closed;

   let mut tx = pool.begin().await.unwrap();
   sqlx::query("INSERT INTO items (name) VALUES ('lost')")
      .execute(&mut *tx)
      .await
      .unwrap();
   drop(tx);

   assert_eq!(pool.stats().closed, closed_before + 1);

   let mut reader = pool.acquire_read().await.unwrap();
   assert_eq!(count_items(&mut reader).await, 0);
   drop(reader);
   pool.remove().await.unwrap();
}

#[tokio::test]
async fn test_committed_transaction_returns_handle() {
   let (pool, _temp) = create_test_pool(None).await;

   let mut tx = pool.begin().await.unwrap();
   sqlx::query("INSERT INTO items (name) VALUES ('kept')")
      .execute(&mut *tx)
      .await
      .unwrap();
   tx.commit().await.unwrap();

   let stats = pool.stats();
   assert_eq!(stats.idle, 1);
   assert_eq!(stats.closed, 0);
   pool.remove().await.unwrap();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_acquire_after_shutdown_fails() {
   let (pool, _temp) = create_test_pool(None).await;
   pool.shutdown().await.unwrap();

   assert!(matches!(pool.acquire_read().await, Err(Error::PoolClosed)));
   assert!(matches!(pool.acquire_write().await, Err(Error::PoolClosed)));
   assert!(matches!(pool.begin().await, Err(Error::PoolClosed)));

   let stats = pool.stats();
   assert!(stats.is_closed);
   assert_eq!(stats.idle, 0);
}

#[tokio::test]
async fn test_handle_released_after_shutdown_is_closed() {
   let (pool, _temp) = create_test_pool(None).await;

   let reader = pool.acquire_read().await.unwrap();
   pool.shutdown().await.unwrap();
   let closed_before = pool.stats().closed;
   drop(reader);

   let stats = pool.stats();
   assert_eq!(stats.idle, 0);
   assert_eq!(stats.closed, closed_before + 1);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
   let (pool, _temp) = create_test_pool(None).await;
   pool.shutdown().await.unwrap();
   pool.shutdown().await.unwrap();
   assert!(pool.is_closed());
}

#[tokio::test]
async fn test_data_survives_reopen() {
   let temp_dir = TempDir::new().unwrap();
   let path = temp_dir.path().join("reopen.db");

   {
      let pool = SqliteHandlePool::open(&path, None).await.unwrap();
      let mut writer = pool.acquire_write().await.unwrap();
      sqlx::query("CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT)")
         .execute(&mut *writer)
         .await
         .unwrap();
      sqlx::query("INSERT INTO kv VALUES ('a', '1')")
         .execute(&mut *writer)
         .await
         .unwrap();
      drop(writer);
      pool.shutdown().await.unwrap();
   }

   let pool = SqliteHandlePool::open(&path, None).await.unwrap();
   let mut reader = pool.acquire_read().await.unwrap();
   let value: String = sqlx::query_scalar("SELECT v FROM kv WHERE k = 'a'")
      .fetch_one(&mut *reader)
      .await
      .unwrap();
   assert_eq!(value, "1");
   drop(reader);
   pool.remove().await.unwrap();
}
