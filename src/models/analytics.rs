use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::format_ts;
use crate::db::DbPool;
use crate::store::Store;

/// Aggregates look back this many days.
pub const WINDOW_DAYS: i64 = 30;
pub const TOP_LIMIT: usize = 10;

/// One tracked page view. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub path: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountEntry {
    pub label: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageCount {
    pub path: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferrerCount {
    pub referrer: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsOverview {
    pub total_visits: i64,
    pub unique_visitors: i64,
    pub top_pages: Vec<PageCount>,
    pub top_referrers: Vec<ReferrerCount>,
}

/// Start of the aggregation window ending at `now`.
pub fn window_start(now: DateTime<Utc>) -> String {
    format_ts(&(now - Duration::days(WINDOW_DAYS)))
}

impl AnalyticsOverview {
    /// Counts over the trailing window, computed directly from stored events.
    /// Only events with a known (non-local) IP are counted.
    pub fn compute(store: &dyn Store, now: DateTime<Utc>) -> Result<Self, String> {
        let since = window_start(now);
        let total_visits = store.analytics_visit_count(&since)?;
        let unique_visitors = store.analytics_unique_visitors(&since)?;
        let top_pages = store
            .analytics_top_paths(&since, TOP_LIMIT as i64)?
            .into_iter()
            .map(|e| PageCount {
                path: e.label,
                count: e.count,
            })
            .collect();
        let top_referrers = store
            .analytics_referrer_counts(&since)?
            .into_iter()
            .filter(|e| !crate::analytics::is_denied_referrer(&e.label))
            .take(TOP_LIMIT)
            .map(|e| ReferrerCount {
                referrer: e.label,
                count: e.count,
            })
            .collect();
        Ok(Self {
            total_visits,
            unique_visitors,
            top_pages,
            top_referrers,
        })
    }
}

// ── SQLite persistence ─────────────────────────────────

impl PageView {
    pub fn record(pool: &DbPool, view: &PageView) -> Result<(), String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO page_views (path, ip, user_agent, referrer, device_type, browser, os, country, city, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                view.path,
                view.ip,
                view.user_agent,
                view.referrer,
                view.device_type,
                view.browser,
                view.os,
                view.country,
                view.city,
                format_ts(&view.timestamp),
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn visit_count(pool: &DbPool, since: &str) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.query_row(
            "SELECT COUNT(*) FROM page_views WHERE ip IS NOT NULL AND timestamp >= ?1",
            params![since],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())
    }

    pub fn unique_visitors(pool: &DbPool, since: &str) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.query_row(
            "SELECT COUNT(DISTINCT ip) FROM page_views WHERE ip IS NOT NULL AND timestamp >= ?1",
            params![since],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())
    }

    pub fn top_paths(pool: &DbPool, since: &str, limit: i64) -> Result<Vec<CountEntry>, String> {
        Self::grouped(
            pool,
            "SELECT path AS label, COUNT(*) AS count FROM page_views
             WHERE ip IS NOT NULL AND timestamp >= ?1
             GROUP BY path ORDER BY count DESC, label ASC LIMIT ?2",
            since,
            limit,
        )
    }

    /// Every referrer in the window with its count, most frequent first.
    pub fn referrer_counts(pool: &DbPool, since: &str) -> Result<Vec<CountEntry>, String> {
        Self::grouped(
            pool,
            "SELECT referrer AS label, COUNT(*) AS count FROM page_views
             WHERE ip IS NOT NULL AND referrer IS NOT NULL AND timestamp >= ?1
             GROUP BY referrer ORDER BY count DESC, label ASC LIMIT ?2",
            since,
            -1,
        )
    }

    pub fn daily_counts(pool: &DbPool, since: &str) -> Result<Vec<DailyCount>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT substr(timestamp, 1, 10) AS day, COUNT(*) AS count FROM page_views
                 WHERE ip IS NOT NULL AND timestamp >= ?1
                 GROUP BY day ORDER BY day ASC",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![since], |row| {
                Ok(DailyCount {
                    date: row.get(0)?,
                    count: row.get(1)?,
                })
            })
            .map_err(|e| e.to_string())?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| e.to_string())
    }

    fn grouped(pool: &DbPool, sql: &str, since: &str, limit: i64) -> Result<Vec<CountEntry>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![since, limit], |row| {
                Ok(CountEntry {
                    label: row.get(0)?,
                    count: row.get(1)?,
                })
            })
            .map_err(|e| e.to_string())?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| e.to_string())
    }
}
