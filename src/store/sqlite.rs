use rusqlite::params;
use serde_json::{Map, Value};

use crate::db::DbPool;
use crate::models::analytics::{CountEntry, DailyCount, PageView};
use crate::models::cms::{RawCmsDocument, CMS_DOCUMENT_KEY};
use crate::models::format_ts;
use crate::models::portfolio::{PortfolioFilter, PortfolioForm, PortfolioItem};

use super::Store;

/// SQLite-backed implementation of the Store trait.
/// Wraps the r2d2 connection pool and delegates to model methods.
pub struct SqliteStore {
    pub pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn new_at(path: &str) -> Result<Self, String> {
        let pool = crate::db::init_pool_at(path)?;
        Ok(Self { pool })
    }
}

impl Store for SqliteStore {
    // ── Lifecycle ───────────────────────────────────────────────────

    fn run_migrations(&self) -> Result<(), String> {
        crate::db::run_migrations(&self.pool).map_err(|e| e.to_string())
    }

    fn seed_defaults(&self) -> Result<(), String> {
        self.cms_ensure(CMS_DOCUMENT_KEY)
    }

    fn db_backend(&self) -> &str {
        "sqlite"
    }

    fn ping(&self) -> Result<(), String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    // ── CMS ─────────────────────────────────────────────────────────

    fn cms_ensure(&self, key: &str) -> Result<(), String> {
        crate::db::ensure_cms_document(&self.pool, key)
    }

    fn cms_load(&self, key: &str) -> Result<Option<RawCmsDocument>, String> {
        let conn = self.pool.get().map_err(|e| e.to_string())?;
        let updated_at: String = match conn.query_row(
            "SELECT updated_at FROM cms_documents WHERE key = ?1",
            params![key],
            |row| row.get(0),
        ) {
            Ok(v) => v,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e.to_string()),
        };

        let mut stmt = conn
            .prepare("SELECT section, body FROM cms_sections WHERE doc_key = ?1 ORDER BY section")
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| e.to_string())?;

        let mut sections = Map::new();
        for row in rows {
            let (section, body) = row.map_err(|e| e.to_string())?;
            match serde_json::from_str::<Value>(&body) {
                Ok(value) => {
                    sections.insert(section, value);
                }
                Err(e) => log::warn!("Skipping unreadable CMS section {}: {}", section, e),
            }
        }

        Ok(Some(RawCmsDocument {
            sections,
            updated_at: Some(updated_at),
        }))
    }

    fn cms_put_section(&self, key: &str, section: &str, value: &Value) -> Result<(), String> {
        let body = serde_json::to_string(value).map_err(|e| e.to_string())?;
        let now = format_ts(&chrono::Utc::now());
        let mut conn = self.pool.get().map_err(|e| e.to_string())?;
        let tx = conn.transaction().map_err(|e| e.to_string())?;
        tx.execute(
            "INSERT INTO cms_documents (key, updated_at) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET updated_at = excluded.updated_at",
            params![key, now],
        )
        .map_err(|e| e.to_string())?;
        tx.execute(
            "INSERT INTO cms_sections (doc_key, section, body, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(doc_key, section) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![key, section, body, now],
        )
        .map_err(|e| e.to_string())?;
        tx.commit().map_err(|e| e.to_string())
    }

    // ── Portfolio ───────────────────────────────────────────────────

    fn portfolio_find_by_id(&self, id: i64) -> Result<Option<PortfolioItem>, String> {
        PortfolioItem::find_by_id(&self.pool, id)
    }

    fn portfolio_list(&self, filter: &PortfolioFilter) -> Result<Vec<PortfolioItem>, String> {
        PortfolioItem::list(&self.pool, filter)
    }

    fn portfolio_create(&self, form: &PortfolioForm) -> Result<i64, String> {
        PortfolioItem::create(&self.pool, form)
    }

    fn portfolio_update(&self, id: i64, form: &PortfolioForm) -> Result<bool, String> {
        PortfolioItem::update(&self.pool, id, form)
    }

    fn portfolio_set_active(&self, id: i64, active: bool) -> Result<bool, String> {
        PortfolioItem::set_active(&self.pool, id, active)
    }

    // ── Analytics ───────────────────────────────────────────────────

    fn analytics_record(&self, view: &PageView) -> Result<(), String> {
        PageView::record(&self.pool, view)
    }

    fn analytics_visit_count(&self, since: &str) -> Result<i64, String> {
        PageView::visit_count(&self.pool, since)
    }

    fn analytics_unique_visitors(&self, since: &str) -> Result<i64, String> {
        PageView::unique_visitors(&self.pool, since)
    }

    fn analytics_top_paths(&self, since: &str, limit: i64) -> Result<Vec<CountEntry>, String> {
        PageView::top_paths(&self.pool, since, limit)
    }

    fn analytics_referrer_counts(&self, since: &str) -> Result<Vec<CountEntry>, String> {
        PageView::referrer_counts(&self.pool, since)
    }

    fn analytics_daily_counts(&self, since: &str) -> Result<Vec<DailyCount>, String> {
        PageView::daily_counts(&self.pool, since)
    }
}
