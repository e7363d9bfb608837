use std::collections::HashSet;
use tempfile::TempDir;

use isbndump::db;

async fn setup_pool(dir: &TempDir) -> db::Pool {
    let url = format!("sqlite://{}/test.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

fn isbns(range: std::ops::Range<u32>) -> Vec<String> {
    range.map(|i| format!("978{:010}", i)).collect()
}

#[tokio::test]
async fn concurrent_claimants_receive_disjoint_batches() {
    let dir = TempDir::new().unwrap();
    let pool = setup_pool(&dir).await;
    db::enqueue_isbns(&pool, &isbns(0..2500)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            db::claim_batch(&pool, 1000).await.unwrap()
        }));
    }

    let mut batches = Vec::new();
    for handle in handles {
        batches.push(handle.await.unwrap());
    }

    // Pairwise disjoint, and together they cover the whole queue.
    let mut sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![500, 1000, 1000]);
    let union: HashSet<String> = batches.iter().flatten().cloned().collect();
    assert_eq!(union.len(), 2500);

    // A fourth claim sees nothing left.
    let empty = db::claim_batch(&pool, 1000).await.unwrap();
    assert!(empty.is_empty());

    // Marking every claimed batch done drains the queue end to end.
    for batch in &batches {
        db::mark_done(&pool, batch).await.unwrap();
    }
    let done: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scrape_queue WHERE status = 'done'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(done, 2500);
    assert_eq!(db::count_pending(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn count_pending_is_progress_only() {
    let dir = TempDir::new().unwrap();
    let pool = setup_pool(&dir).await;
    db::enqueue_isbns(&pool, &isbns(0..10)).await.unwrap();

    assert_eq!(db::count_pending(&pool).await.unwrap(), 10);
    let batch = db::claim_batch(&pool, 4).await.unwrap();
    assert_eq!(db::count_pending(&pool).await.unwrap(), 6);
    db::mark_done(&pool, &batch).await.unwrap();
    assert_eq!(db::count_pending(&pool).await.unwrap(), 6);
}
