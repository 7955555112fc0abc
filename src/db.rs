use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::models::cms::CMS_DOCUMENT_KEY;
use crate::models::format_ts;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_pool_at(path: &str) -> Result<DbPool, String> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
    }
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(10)
        .build(manager)
        .map_err(|e| e.to_string())?;

    // WAL for concurrent readers while the admin writes
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")
        .map_err(|e| e.to_string())?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        -- CMS singleton documents
        CREATE TABLE IF NOT EXISTS cms_documents (
            key TEXT PRIMARY KEY,
            updated_at TEXT NOT NULL
        );

        -- One row per section of a CMS document, body is JSON
        CREATE TABLE IF NOT EXISTS cms_sections (
            doc_key TEXT NOT NULL,
            section TEXT NOT NULL,
            body TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (doc_key, section)
        );

        -- Portfolio items; tags and image lists are JSON arrays
        CREATE TABLE IF NOT EXISTS portfolio (
            id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            description TEXT,
            category TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            images TEXT NOT NULL DEFAULT '[]',
            before_images TEXT NOT NULL DEFAULT '[]',
            after_images TEXT NOT NULL DEFAULT '[]',
            is_active INTEGER NOT NULL DEFAULT 1,
            is_featured INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL DEFAULT 0,
            completed_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_portfolio_active_completed ON portfolio(is_active, completed_at DESC);
        CREATE INDEX IF NOT EXISTS idx_portfolio_category ON portfolio(category);
        CREATE INDEX IF NOT EXISTS idx_portfolio_featured ON portfolio(is_featured);

        -- Page views (append-only)
        CREATE TABLE IF NOT EXISTS page_views (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL,
            ip TEXT,
            user_agent TEXT,
            referrer TEXT,
            device_type TEXT,
            browser TEXT,
            os TEXT,
            country TEXT,
            city TEXT,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_page_views_timestamp ON page_views(timestamp);
        CREATE INDEX IF NOT EXISTS idx_page_views_path ON page_views(path);
        ",
    )?;

    Ok(())
}

/// Make sure the CMS singleton exists.
pub fn seed_defaults(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    ensure_cms_document(pool, CMS_DOCUMENT_KEY)?;
    Ok(())
}

/// Create an empty CMS document under `key` unless one is already there.
pub fn ensure_cms_document(pool: &DbPool, key: &str) -> Result<(), String> {
    let conn = pool.get().map_err(|e| e.to_string())?;
    conn.execute(
        "INSERT OR IGNORE INTO cms_documents (key, updated_at) VALUES (?1, ?2)",
        params![key, format_ts(&chrono::Utc::now())],
    )
    .map_err(|e| e.to_string())?;
    Ok(())
}
