use serde_json::Value;

use crate::models::analytics::{CountEntry, DailyCount, PageView};
use crate::models::cms::RawCmsDocument;
use crate::models::portfolio::{PortfolioFilter, PortfolioForm, PortfolioItem};

pub mod mongo;
pub mod sqlite;

/// Unified data-access trait. Every database operation goes through here.
/// Implementations: `SqliteStore` (wraps rusqlite/r2d2) and `MongoStore` (wraps mongodb).
///
/// Timestamps cross this boundary as RFC 3339 strings with a `Z` suffix, so
/// `since` bounds compare lexically in both backends.
pub trait Store: Send + Sync {
    // ── Lifecycle ───────────────────────────────────────────────────
    fn run_migrations(&self) -> Result<(), String>;
    fn seed_defaults(&self) -> Result<(), String>;
    fn db_backend(&self) -> &str;
    fn ping(&self) -> Result<(), String>;

    // ── CMS ─────────────────────────────────────────────────────────
    /// Create the document with no sections if it does not exist yet.
    fn cms_ensure(&self, key: &str) -> Result<(), String>;
    fn cms_load(&self, key: &str) -> Result<Option<RawCmsDocument>, String>;
    /// Overwrite one section of the document, creating the document if needed.
    fn cms_put_section(&self, key: &str, section: &str, value: &Value) -> Result<(), String>;

    // ── Portfolio ───────────────────────────────────────────────────
    fn portfolio_find_by_id(&self, id: i64) -> Result<Option<PortfolioItem>, String>;
    fn portfolio_list(&self, filter: &PortfolioFilter) -> Result<Vec<PortfolioItem>, String>;
    fn portfolio_create(&self, form: &PortfolioForm) -> Result<i64, String>;
    fn portfolio_update(&self, id: i64, form: &PortfolioForm) -> Result<bool, String>;
    fn portfolio_set_active(&self, id: i64, active: bool) -> Result<bool, String>;

    // ── Analytics ───────────────────────────────────────────────────
    fn analytics_record(&self, view: &PageView) -> Result<(), String>;
    fn analytics_visit_count(&self, since: &str) -> Result<i64, String>;
    fn analytics_unique_visitors(&self, since: &str) -> Result<i64, String>;
    fn analytics_top_paths(&self, since: &str, limit: i64) -> Result<Vec<CountEntry>, String>;
    /// All non-null referrers since `since`, most frequent first.
    fn analytics_referrer_counts(&self, since: &str) -> Result<Vec<CountEntry>, String>;
    fn analytics_daily_counts(&self, since: &str) -> Result<Vec<DailyCount>, String>;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::models::analytics::AnalyticsOverview;
    use crate::models::cms::{CmsDocument, Section, CMS_DOCUMENT_KEY};
    use crate::models::portfolio::{PortfolioCategory, PortfolioImage};
    use crate::store::sqlite::SqliteStore;

    /// Create a fresh in-memory SqliteStore with migrations + seed applied.
    fn test_store() -> SqliteStore {
        let manager = r2d2_sqlite::SqliteConnectionManager::memory();
        let pool = r2d2::Pool::builder()
            .max_size(1)
            .build(manager)
            .expect("Failed to create in-memory pool");
        let store = SqliteStore::new(pool);
        store.run_migrations().expect("migrations failed");
        store.seed_defaults().expect("seed failed");
        store
    }

    fn form(title: &str, category: PortfolioCategory) -> PortfolioForm {
        PortfolioForm {
            title: title.to_string(),
            description: String::new(),
            category,
            tags: BTreeSet::new(),
            images: vec![],
            before_images: vec![],
            after_images: vec![],
            is_featured: false,
            order: 0,
            completed_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    fn view(path: &str, ip: Option<&str>, referrer: Option<&str>) -> PageView {
        PageView {
            path: path.to_string(),
            ip: ip.map(String::from),
            user_agent: None,
            referrer: referrer.map(String::from),
            device_type: None,
            browser: None,
            os: None,
            country: None,
            city: None,
            timestamp: Utc::now(),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn test_migrations_idempotent() {
        let s = test_store();
        s.run_migrations().unwrap();
        s.seed_defaults().unwrap();
        assert_eq!(s.db_backend(), "sqlite");
        assert!(s.ping().is_ok());
    }

    // ── CMS ─────────────────────────────────────────────────────────

    #[test]
    fn test_cms_seeded_empty() {
        let s = test_store();
        let raw = s.cms_load(CMS_DOCUMENT_KEY).unwrap().unwrap();
        assert!(raw.sections.is_empty());
        assert!(raw.updated_at.is_some());
        assert!(s.cms_load("other").unwrap().is_none());
    }

    #[test]
    fn test_cms_ensure_keeps_existing_sections() {
        let s = test_store();
        s.cms_ensure("staging").unwrap();
        assert!(s.cms_load("staging").unwrap().unwrap().sections.is_empty());

        s.cms_put_section(CMS_DOCUMENT_KEY, "seo", &json!({ "defaultTitle": "Aircon" }))
            .unwrap();
        s.seed_defaults().unwrap();
        s.cms_ensure(CMS_DOCUMENT_KEY).unwrap();
        let raw = s.cms_load(CMS_DOCUMENT_KEY).unwrap().unwrap();
        assert_eq!(raw.sections["seo"]["defaultTitle"], "Aircon");
    }

    #[test]
    fn test_cms_put_section_creates_document() {
        let s = test_store();
        s.cms_put_section("fresh", "seo", &json!({ "defaultTitle": "Hi" }))
            .unwrap();
        let raw = s.cms_load("fresh").unwrap().unwrap();
        assert_eq!(raw.sections["seo"]["defaultTitle"], "Hi");
    }

    #[test]
    fn test_replace_section_leaves_others_unchanged() {
        let s = test_store();
        CmsDocument::replace_section(
            &s,
            Section::CompanyInfo,
            json!({ "name": "Cool Breeze Aircon", "phone": "+65 6000 0000" }),
        )
        .unwrap();
        CmsDocument::replace_section(
            &s,
            Section::BrandsWithLogos,
            json!([{ "name": "Daikin" }, { "name": "Mitsubishi Electric" }]),
        )
        .unwrap();
        let before = CmsDocument::load(&s).unwrap();

        CmsDocument::replace_section(&s, Section::CompanyInfo, json!({ "name": "Renamed" }))
            .unwrap();
        let after = CmsDocument::load(&s).unwrap();

        let info = after.company_info.clone().unwrap();
        assert_eq!(info.name.as_deref(), Some("Renamed"));
        // Whole-section overwrite: the old phone is gone.
        assert!(info.phone.is_none());
        assert_eq!(after.brands_with_logos, before.brands_with_logos);
        assert!(after.testimonials.is_none());
    }

    #[test]
    fn test_replace_section_assigns_unique_ids() {
        let s = test_store();
        CmsDocument::replace_section(
            &s,
            Section::Certificates,
            json!([{ "title": "bizSAFE Level 3" }, { "title": "BCA ME05 L1" }]),
        )
        .unwrap();
        let certs = CmsDocument::load(&s).unwrap().certificates.unwrap();
        assert_eq!(certs.len(), 2);
        assert!(!certs[0].id.is_empty());
        assert_ne!(certs[0].id, certs[1].id);
    }

    #[test]
    fn test_replace_section_rejects_invalid() {
        let s = test_store();
        let err = CmsDocument::replace_section(
            &s,
            Section::Testimonials,
            json!([{ "name": "A", "quote": "B", "rating": 9 }]),
        )
        .unwrap_err();
        assert!(matches!(err, crate::error::ApiError::Validation(_)));
        assert!(CmsDocument::load(&s).unwrap().testimonials.is_none());
    }

    #[test]
    fn test_backfill_ids_writes_missing_and_aliases() {
        let s = test_store();
        s.cms_put_section(
            CMS_DOCUMENT_KEY,
            "testimonials",
            &json!([{ "name": "Tan", "quote": "Great", "rating": 5 }]),
        )
        .unwrap();
        s.cms_put_section(CMS_DOCUMENT_KEY, "brands", &json!(["Daikin", "LG"]))
            .unwrap();

        let minted = CmsDocument::backfill_ids(&s).unwrap();
        assert_eq!(minted, 3);

        let raw = s.cms_load(CMS_DOCUMENT_KEY).unwrap().unwrap();
        let stored_id = raw.sections["testimonials"][0]["id"].as_str().unwrap();
        assert!(!stored_id.is_empty());
        assert_eq!(raw.sections["brandsWithLogos"][1]["name"], "LG");

        // Second run has nothing left to do.
        assert_eq!(CmsDocument::backfill_ids(&s).unwrap(), 0);
    }

    // ── Portfolio ───────────────────────────────────────────────────

    #[test]
    fn test_portfolio_create_without_images() {
        let s = test_store();
        let id = s
            .portfolio_create(&form("Daikin System 4 Install", PortfolioCategory::AirconInstallation))
            .unwrap();
        let item = s.portfolio_find_by_id(id).unwrap().unwrap();
        assert_eq!(item.slug, "daikin-system-4-install");
        assert!(item.images.is_empty());
        assert!(item.before_images.is_empty());
        assert!(item.after_images.is_empty());
        assert!(item.is_active);
    }

    #[test]
    fn test_portfolio_soft_delete() {
        let s = test_store();
        let id = s
            .portfolio_create(&form("Chemical wash", PortfolioCategory::AirconServicing))
            .unwrap();
        assert!(s.portfolio_set_active(id, false).unwrap());
        let listed = s.portfolio_list(&PortfolioFilter::default()).unwrap();
        assert!(listed.iter().all(|i| i.id != id));
        let item = s.portfolio_find_by_id(id).unwrap().unwrap();
        assert!(!item.is_active);
        assert!(!s.portfolio_set_active(9999, false).unwrap());
    }

    #[test]
    fn test_portfolio_list_filters_and_order() {
        let s = test_store();
        let mut a = form("Older", PortfolioCategory::Renovation);
        a.completed_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut b = form("Newer second", PortfolioCategory::Renovation);
        b.order = 2;
        b.is_featured = true;
        let mut c = form("Newer first", PortfolioCategory::Renovation);
        c.order = 1;
        let d = form("Office", PortfolioCategory::Commercial);
        for f in [&a, &b, &c, &d] {
            s.portfolio_create(f).unwrap();
        }

        let reno = s
            .portfolio_list(&PortfolioFilter {
                category: Some(PortfolioCategory::Renovation),
                ..Default::default()
            })
            .unwrap();
        let titles: Vec<&str> = reno.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Newer first", "Newer second", "Older"]);

        let featured = s
            .portfolio_list(&PortfolioFilter {
                is_featured: Some(true),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(featured.len(), 1);
        assert_eq!(featured[0].title, "Newer second");

        let limited = s
            .portfolio_list(&PortfolioFilter {
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_portfolio_update() {
        let s = test_store();
        let id = s
            .portfolio_create(&form("Gas top-up", PortfolioCategory::AirconRepair))
            .unwrap();
        let mut f = form("Gas top-up and leak fix", PortfolioCategory::AirconRepair);
        f.tags = ["r32".to_string()].into_iter().collect();
        f.images = vec![PortfolioImage {
            id: "img-1".into(),
            url: "/uploads/portfolio/x.jpg".into(),
            filename: "x.jpg".into(),
            original_name: Some("unit.jpg".into()),
            size: 3,
            content_type: "image/jpeg".into(),
        }];
        assert!(s.portfolio_update(id, &f).unwrap());
        let item = s.portfolio_find_by_id(id).unwrap().unwrap();
        assert_eq!(item.slug, "gas-top-up-and-leak-fix");
        assert!(item.tags.contains("r32"));
        assert_eq!(item.images[0].id, "img-1");
        assert!(!s.portfolio_update(12345, &f).unwrap());
    }

    // ── Analytics ───────────────────────────────────────────────────

    #[test]
    fn test_overview_counts_non_null_ips() {
        let s = test_store();
        s.analytics_record(&view("/", Some("203.0.113.5"), None)).unwrap();
        s.analytics_record(&view("/pricing", Some("203.0.113.5"), None)).unwrap();
        s.analytics_record(&view("/", Some("198.51.100.7"), None)).unwrap();
        s.analytics_record(&view("/", None, None)).unwrap();

        let o = AnalyticsOverview::compute(&s, Utc::now()).unwrap();
        assert_eq!(o.total_visits, 3);
        assert_eq!(o.unique_visitors, 2);
        assert_eq!(o.top_pages[0].path, "/");
        assert_eq!(o.top_pages[0].count, 2);
    }

    #[test]
    fn test_overview_window() {
        let s = test_store();
        let mut old = view("/old", Some("203.0.113.5"), None);
        old.timestamp = Utc::now() - Duration::days(45);
        s.analytics_record(&old).unwrap();
        s.analytics_record(&view("/new", Some("203.0.113.5"), None)).unwrap();

        let o = AnalyticsOverview::compute(&s, Utc::now()).unwrap();
        assert_eq!(o.total_visits, 1);
        assert_eq!(o.top_pages.len(), 1);
        assert_eq!(o.top_pages[0].path, "/new");
    }

    #[test]
    fn test_top_referrers_skip_denylisted() {
        let s = test_store();
        for _ in 0..3 {
            s.analytics_record(&view("/", Some("203.0.113.5"), Some("http://localhost:3000/")))
                .unwrap();
        }
        s.analytics_record(&view("/", Some("203.0.113.5"), Some("https://www.google.com/")))
            .unwrap();
        s.analytics_record(&view("/", Some("203.0.113.6"), Some("http://printer.local/x")))
            .unwrap();

        let o = AnalyticsOverview::compute(&s, Utc::now()).unwrap();
        assert_eq!(o.top_referrers.len(), 1);
        assert_eq!(o.top_referrers[0].referrer, "https://www.google.com/");
    }

    #[test]
    fn test_daily_counts() {
        let s = test_store();
        let mut yesterday = view("/", Some("203.0.113.5"), None);
        yesterday.timestamp = Utc::now() - Duration::days(1);
        s.analytics_record(&yesterday).unwrap();
        s.analytics_record(&view("/", Some("203.0.113.5"), None)).unwrap();
        s.analytics_record(&view("/", Some("203.0.113.6"), None)).unwrap();

        let since = crate::models::analytics::window_start(Utc::now());
        let days = s.analytics_daily_counts(&since).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].count, 1);
        assert_eq!(days[1].count, 2);
        assert!(days[0].date < days[1].date);
    }
}
