pub mod accounts;
pub mod interactions;
pub mod models;
pub mod posts;
pub mod resources;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, ErrorCode};
use serde::Deserialize;
use std::path::Path;

use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_accounts",
        include_str!("../../migrations/001_accounts.sql"),
    ),
    ("002_posts", include_str!("../../migrations/002_posts.sql")),
    (
        "003_interactions",
        include_str!("../../migrations/003_interactions.sql"),
    ),
];

const CATEGORY_FIXTURES: &str = include_str!("../../fixtures/categories.json");
const TAG_FIXTURES: &str = include_str!("../../fixtures/tags.json");

/// Every pooled connection gets these; SQLite keeps them per connection.
fn init_connection(conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )
}

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(init_connection);
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    seed_fixtures(&conn)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

#[derive(Deserialize)]
struct CategoryFixture {
    name: String,
    slug: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct TagFixture {
    name: String,
    slug: String,
}

/// Insert the default categories and tags. Existing slugs are left alone.
pub fn seed_fixtures(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    let categories: Vec<CategoryFixture> = serde_json::from_str(CATEGORY_FIXTURES)?;
    for category in categories {
        let created = conn.execute(
            "INSERT OR IGNORE INTO categories (id, name, slug, description) VALUES (?1, ?2, ?3, ?4)",
            params![new_id(), category.name, category.slug, category.description],
        )?;
        if created > 0 {
            tracing::debug!("Seeded category {}", category.slug);
        }
    }

    let tags: Vec<TagFixture> = serde_json::from_str(TAG_FIXTURES)?;
    for tag in tags {
        let created = conn.execute(
            "INSERT OR IGNORE INTO tags (id, name, slug) VALUES (?1, ?2, ?3)",
            params![new_id(), tag.name, tag.slug],
        )?;
        if created > 0 {
            tracing::debug!("Seeded tag {}", tag.slug);
        }
    }

    Ok(())
}

pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// True when `err` is a UNIQUE / PRIMARY KEY constraint failure.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

#[cfg(test)]
pub(crate) fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory().with_init(init_connection);
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    run_migrations(&pool).unwrap();
    pool
}
