use crate::model::{Book, QueueStatus};
use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)?.create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Count of entries still pending. Used only for progress-reporting totals;
/// it may go stale under concurrent mutation.
#[instrument(skip_all)]
pub async fn count_pending(pool: &Pool) -> Result<i64, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM scrape_queue WHERE status = ?")
            .bind(QueueStatus::Pending.as_str())
            .fetch_one(pool)
            .await?;
    Ok(count)
}

/// Atomically claim up to `limit` pending ISBNs, transitioning them to
/// `processing`, and return them. SQLite serializes writers, so the
/// select-and-update runs as one statement and concurrent claimants always
/// receive pairwise-disjoint sets — the `FOR UPDATE SKIP LOCKED` discipline
/// expressed with the primitives this engine has. An empty vec means no
/// claimable rows remain.
#[instrument(skip_all)]
pub async fn claim_batch(pool: &Pool, limit: u32) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        "UPDATE scrape_queue SET status = ? \
         WHERE isbn13 IN (SELECT isbn13 FROM scrape_queue WHERE status = ? LIMIT ?) \
         RETURNING isbn13",
    )
    .bind(QueueStatus::Processing.as_str())
    .bind(QueueStatus::Pending.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.get("isbn13")).collect())
}

/// Transition the given ISBNs to `done`. Idempotent; no-op on empty input.
#[instrument(skip_all)]
pub async fn mark_done(pool: &Pool, isbns: &[String]) -> Result<(), sqlx::Error> {
    if isbns.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for isbn in isbns {
        sqlx::query("UPDATE scrape_queue SET status = ? WHERE isbn13 = ?")
            .bind(QueueStatus::Done.as_str())
            .bind(isbn)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Persist parsed books in one transaction. Upserts so a re-fetched batch
/// (e.g. after a crash between insert and mark-done) does not fail.
/// No-op on empty input.
#[instrument(skip_all)]
pub async fn insert_books(pool: &Pool, books: &[Book]) -> Result<(), sqlx::Error> {
    if books.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for book in books {
        sqlx::query(
            "INSERT INTO books (isbn13, title, long_title, authors, publisher, \
             date_published, synopsis, language, subjects, edition, isbn, isbn10, \
             dewey_decimal, cover, binding, dimensions, pages, msrp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(isbn13) DO UPDATE SET \
             title = excluded.title, long_title = excluded.long_title, \
             authors = excluded.authors, publisher = excluded.publisher, \
             date_published = excluded.date_published, synopsis = excluded.synopsis, \
             language = excluded.language, subjects = excluded.subjects, \
             edition = excluded.edition, isbn = excluded.isbn, \
             isbn10 = excluded.isbn10, dewey_decimal = excluded.dewey_decimal, \
             cover = excluded.cover, binding = excluded.binding, \
             dimensions = excluded.dimensions, pages = excluded.pages, \
             msrp = excluded.msrp",
        )
        .bind(&book.isbn13)
        .bind(&book.title)
        .bind(&book.long_title)
        .bind(&book.authors)
        .bind(&book.publisher)
        .bind(&book.date_published)
        .bind(&book.synopsis)
        .bind(&book.language)
        .bind(&book.subjects)
        .bind(&book.edition)
        .bind(&book.isbn)
        .bind(&book.isbn10)
        .bind(&book.dewey_decimal)
        .bind(&book.cover)
        .bind(&book.binding)
        .bind(&book.dimensions)
        .bind(book.pages)
        .bind(book.msrp)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Seed queue rows as pending. Used by tests and by external producers;
/// already-present ISBNs are left untouched.
pub async fn enqueue_isbns(pool: &Pool, isbns: &[String]) -> Result<(), sqlx::Error> {
    if isbns.is_empty() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for isbn in isbns {
        sqlx::query(
            "INSERT INTO scrape_queue (isbn13, status) VALUES (?, ?) \
             ON CONFLICT(isbn13) DO NOTHING",
        )
        .bind(isbn)
        .bind(QueueStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}
