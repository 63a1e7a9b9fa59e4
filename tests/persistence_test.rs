//! File-backed store: creation on first open, idempotent schema install,
//! and durability across reopen.

use qrisgate_core::db::models::Merchant;
use qrisgate_core::db::{self, queries};

#[tokio::test]
async fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gateway.db");
    let path = path.to_str().unwrap();

    let pool = db::create_pool(path).await.unwrap();
    db::migrations::run(&pool).await.unwrap();

    let merchant = Merchant::new("durable@example.com", None, 1000);
    queries::insert_merchant(&pool, &merchant).await.unwrap();
    pool.close().await;

    // Second open runs migrations again and finds the row.
    let pool = db::create_pool(path).await.unwrap();
    db::migrations::run(&pool).await.unwrap();

    let found = queries::get_merchant(&pool, &merchant.id)
        .await
        .unwrap()
        .expect("merchant persisted");
    assert_eq!(found.email, "durable@example.com");
}
