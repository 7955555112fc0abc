use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use super::{format_ts, parse_ts};
use crate::db::DbPool;

pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_LIST_LIMIT: i64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortfolioCategory {
    AirconInstallation,
    AirconServicing,
    AirconRepair,
    Renovation,
    Commercial,
}

impl PortfolioCategory {
    pub const ALL: [PortfolioCategory; 5] = [
        PortfolioCategory::AirconInstallation,
        PortfolioCategory::AirconServicing,
        PortfolioCategory::AirconRepair,
        PortfolioCategory::Renovation,
        PortfolioCategory::Commercial,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PortfolioCategory::AirconInstallation => "aircon-installation",
            PortfolioCategory::AirconServicing => "aircon-servicing",
            PortfolioCategory::AirconRepair => "aircon-repair",
            PortfolioCategory::Renovation => "renovation",
            PortfolioCategory::Commercial => "commercial",
        }
    }
}

impl fmt::Display for PortfolioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PortfolioCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown category '{}' (expected one of: {})", s, allowed.join(", "))
            })
    }
}

/// One stored image. `id` is minted when the file is saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioImage {
    pub id: String,
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: String,
}

/// An image the admin client keeps on update. Matched against the stored
/// group by `id`, falling back to `url`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetainedImage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioItem {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub category: PortfolioCategory,
    pub tags: BTreeSet<String>,
    pub images: Vec<PortfolioImage>,
    pub before_images: Vec<PortfolioImage>,
    pub after_images: Vec<PortfolioImage>,
    pub is_active: bool,
    pub is_featured: bool,
    pub order: i64,
    pub completed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full set of writable fields, used for both create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioForm {
    pub title: String,
    pub description: String,
    pub category: PortfolioCategory,
    pub tags: BTreeSet<String>,
    pub images: Vec<PortfolioImage>,
    pub before_images: Vec<PortfolioImage>,
    pub after_images: Vec<PortfolioImage>,
    pub is_featured: bool,
    pub order: i64,
    pub completed_at: DateTime<Utc>,
}

impl PortfolioForm {
    pub fn slug(&self) -> String {
        slug::slugify(&self.title)
    }

    /// Start an update from the stored item's current values.
    pub fn from_item(item: &PortfolioItem) -> Self {
        Self {
            title: item.title.clone(),
            description: item.description.clone(),
            category: item.category,
            tags: item.tags.clone(),
            images: item.images.clone(),
            before_images: item.before_images.clone(),
            after_images: item.after_images.clone(),
            is_featured: item.is_featured,
            order: item.order,
            completed_at: item.completed_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioFilter {
    pub category: Option<PortfolioCategory>,
    pub is_featured: Option<bool>,
    pub limit: Option<i64>,
}

impl PortfolioFilter {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Parse the JSON-encoded `tags` form field into a trimmed, de-duplicated set.
pub fn parse_tags(raw: &str) -> Result<BTreeSet<String>, String> {
    if raw.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let tags: Vec<String> =
        serde_json::from_str(raw).map_err(|e| format!("tags must be a JSON array of strings: {}", e))?;
    Ok(tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Parse a JSON-encoded `existing…Images` form field.
pub fn parse_retained(raw: &str, field: &str) -> Result<Vec<RetainedImage>, String> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| format!("{} must be a JSON array of images: {}", field, e))
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_completed_at(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Some(dt) = parse_ts(raw) {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("completedAt '{}' is not a date", raw))
}

/// Keep the stored images the client still lists, in the client's order.
/// Entries that match nothing stored are dropped.
pub fn retain_images(stored: &[PortfolioImage], keep: &[RetainedImage]) -> Vec<PortfolioImage> {
    let mut out: Vec<PortfolioImage> = Vec::new();
    for k in keep {
        let found = stored.iter().find(|img| {
            k.id.as_deref().is_some_and(|id| id == img.id)
                || k.url.as_deref().is_some_and(|url| url == img.url)
        });
        if let Some(img) = found {
            if !out.iter().any(|o| o.id == img.id) {
                out.push(img.clone());
            }
        }
    }
    out
}

// ── SQLite persistence ─────────────────────────────────

fn conversion_error(col: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, msg.into())
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row, name: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(name)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(0, format!("{}: {}", name, e)))
}

fn ts_col(row: &Row, name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(name)?;
    parse_ts(&raw).ok_or_else(|| conversion_error(0, format!("{}: bad timestamp '{}'", name, raw)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| e.to_string())
}

impl PortfolioItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let category: String = row.get("category")?;
        let active: i64 = row.get("is_active")?;
        let featured: i64 = row.get("is_featured")?;
        Ok(PortfolioItem {
            id: row.get("id")?,
            title: row.get("title")?,
            slug: row.get("slug")?,
            description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
            category: category
                .parse::<PortfolioCategory>()
                .map_err(|e| conversion_error(0, e))?,
            tags: json_col(row, "tags")?,
            images: json_col(row, "images")?,
            before_images: json_col(row, "before_images")?,
            after_images: json_col(row, "after_images")?,
            is_active: active != 0,
            is_featured: featured != 0,
            order: row.get("sort_order")?,
            completed_at: ts_col(row, "completed_at")?,
            created_at: ts_col(row, "created_at")?,
            updated_at: ts_col(row, "updated_at")?,
        })
    }

    pub fn find_by_id(pool: &DbPool, id: i64) -> Result<Option<Self>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        match conn.query_row(
            "SELECT * FROM portfolio WHERE id = ?1",
            params![id],
            Self::from_row,
        ) {
            Ok(item) => Ok(Some(item)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Active items only, newest completion first.
    pub fn list(pool: &DbPool, filter: &PortfolioFilter) -> Result<Vec<Self>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;

        let mut sql = String::from("SELECT * FROM portfolio WHERE is_active = 1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(category) = filter.category {
            params_vec.push(Box::new(category.as_str()));
            sql.push_str(&format!(" AND category = ?{}", params_vec.len()));
        }
        if let Some(featured) = filter.is_featured {
            params_vec.push(Box::new(featured as i64));
            sql.push_str(&format!(" AND is_featured = ?{}", params_vec.len()));
        }
        params_vec.push(Box::new(filter.effective_limit()));
        sql.push_str(&format!(
            " ORDER BY completed_at DESC, sort_order ASC, id DESC LIMIT ?{}",
            params_vec.len()
        ));

        let mut stmt = conn.prepare(&sql).map_err(|e| e.to_string())?;
        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(params_refs.as_slice(), Self::from_row)
            .map_err(|e| e.to_string())?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| e.to_string())
    }

    pub fn create(pool: &DbPool, form: &PortfolioForm) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let now = format_ts(&Utc::now());
        conn.execute(
            "INSERT INTO portfolio (title, slug, description, category, tags, images, before_images,
             after_images, is_active, is_featured, sort_order, completed_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?10, ?11, ?12, ?12)",
            params![
                form.title,
                form.slug(),
                form.description,
                form.category.as_str(),
                to_json(&form.tags)?,
                to_json(&form.images)?,
                to_json(&form.before_images)?,
                to_json(&form.after_images)?,
                form.is_featured as i64,
                form.order,
                format_ts(&form.completed_at),
                now,
            ],
        )
        .map_err(|e| e.to_string())?;

        Ok(conn.last_insert_rowid())
    }

    /// Returns `false` when no item has this id.
    pub fn update(pool: &DbPool, id: i64, form: &PortfolioForm) -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE portfolio SET title=?1, slug=?2, description=?3, category=?4, tags=?5,
                 images=?6, before_images=?7, after_images=?8, is_featured=?9, sort_order=?10,
                 completed_at=?11, updated_at=?12 WHERE id=?13",
                params![
                    form.title,
                    form.slug(),
                    form.description,
                    form.category.as_str(),
                    to_json(&form.tags)?,
                    to_json(&form.images)?,
                    to_json(&form.before_images)?,
                    to_json(&form.after_images)?,
                    form.is_featured as i64,
                    form.order,
                    format_ts(&form.completed_at),
                    format_ts(&Utc::now()),
                    id,
                ],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed > 0)
    }

    pub fn set_active(pool: &DbPool, id: i64, active: bool) -> Result<bool, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let changed = conn
            .execute(
                "UPDATE portfolio SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
                params![active as i64, format_ts(&Utc::now()), id],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str) -> PortfolioImage {
        PortfolioImage {
            id: id.to_string(),
            url: format!("/uploads/portfolio/{}.jpg", id),
            filename: format!("{}.jpg", id),
            original_name: None,
            size: 10,
            content_type: "image/jpeg".to_string(),
        }
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            "aircon-servicing".parse::<PortfolioCategory>(),
            Ok(PortfolioCategory::AirconServicing)
        );
        assert!("plumbing".parse::<PortfolioCategory>().is_err());
    }

    #[test]
    fn test_parse_tags_dedupes_and_trims() {
        let tags = parse_tags(r#"[" hdb ", "condo", "hdb", ""]"#).unwrap();
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec!["condo", "hdb"]);
        assert!(parse_tags("").unwrap().is_empty());
        assert!(parse_tags("hdb,condo").is_err());
    }

    #[test]
    fn test_parse_completed_at() {
        let d = parse_completed_at("2025-06-01").unwrap();
        assert_eq!(format_ts(&d), "2025-06-01T00:00:00Z");
        let t = parse_completed_at("2025-06-01T08:30:00+08:00").unwrap();
        assert_eq!(format_ts(&t), "2025-06-01T00:30:00Z");
        assert!(parse_completed_at("last week").is_err());
    }

    #[test]
    fn test_retain_images_matches_by_id_or_url() {
        let stored = vec![image("a"), image("b"), image("c")];
        let keep = vec![
            RetainedImage { id: Some("c".into()), url: None },
            RetainedImage { id: None, url: Some("/uploads/portfolio/a.jpg".into()) },
            RetainedImage { id: Some("zzz".into()), url: Some("/elsewhere.jpg".into()) },
        ];
        let kept = retain_images(&stored, &keep);
        let ids: Vec<&str> = kept.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_filter_limit_clamped() {
        assert_eq!(PortfolioFilter::default().effective_limit(), DEFAULT_LIST_LIMIT);
        let f = PortfolioFilter { limit: Some(10_000), ..Default::default() };
        assert_eq!(f.effective_limit(), MAX_LIST_LIMIT);
        let f = PortfolioFilter { limit: Some(0), ..Default::default() };
        assert_eq!(f.effective_limit(), 1);
    }
}
