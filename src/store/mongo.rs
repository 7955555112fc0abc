use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::{ClientOptions, FindOptions, IndexOptions, UpdateOptions};
use mongodb::sync::{Client, Collection, Database};
use mongodb::IndexModel;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::analytics::{CountEntry, DailyCount, PageView};
use crate::models::cms::{RawCmsDocument, CMS_DOCUMENT_KEY};
use crate::models::format_ts;
use crate::models::portfolio::{PortfolioFilter, PortfolioForm, PortfolioItem};
use crate::models::parse_ts;

use super::Store;

/// MongoDB-backed implementation of the Store trait.
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Create a new MongoStore by connecting to the given URI and database name.
    pub fn new(uri: &str, db_name: &str) -> Result<Self, String> {
        let client_options = ClientOptions::parse(uri).map_err(|e| e.to_string())?;
        let client = Client::with_options(client_options).map_err(|e| e.to_string())?;
        let db = client.database(db_name);
        Ok(Self { db })
    }

    fn cms(&self) -> Collection<Document> {
        self.db.collection::<Document>("cms")
    }

    fn portfolio(&self) -> Collection<Document> {
        self.db.collection::<Document>("portfolio")
    }

    fn events(&self) -> Collection<Document> {
        self.db.collection::<Document>("analytics_events")
    }

    // ── Helper: get next auto-increment ID for a collection ──
    fn next_id(&self, collection_name: &str) -> Result<i64, String> {
        let counters = self.db.collection::<Document>("_counters");
        let filter = doc! { "_id": collection_name };
        let update = doc! { "$inc": { "seq": 1_i64 } };
        let opts = mongodb::options::FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(mongodb::options::ReturnDocument::After)
            .build();
        let result = counters
            .find_one_and_update(filter, update, opts)
            .map_err(|e| e.to_string())?;
        match result {
            Some(d) => d
                .get_i64("seq")
                .map_err(|e| format!("Failed to get seq: {}", e)),
            None => Err("Failed to generate ID".to_string()),
        }
    }

    /// Run a `$group` pipeline that yields `{ _id: <label>, count }` documents.
    fn grouped(&self, pipeline: Vec<Document>) -> Result<Vec<CountEntry>, String> {
        let cursor = self
            .events()
            .aggregate(pipeline, None)
            .map_err(|e| e.to_string())?;
        let mut out = Vec::new();
        for d in cursor {
            let d = d.map_err(|e| e.to_string())?;
            let Ok(label) = d.get_str("_id") else {
                continue;
            };
            out.push(CountEntry {
                label: label.to_string(),
                count: count_of(&d, "count"),
            });
        }
        Ok(out)
    }
}

fn create_index(coll: &Collection<Document>, keys: Document, unique: bool) -> Result<(), String> {
    let model = IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(unique).build())
        .build();
    coll.create_index(model, None).map_err(|e| e.to_string())?;
    Ok(())
}

/// Events with a known IP inside the window.
fn window_match(since: &str) -> Document {
    doc! { "$match": { "ip": { "$ne": Bson::Null }, "timestamp": { "$gte": since } } }
}

fn to_bson<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bson, String> {
    bson::to_bson(value).map_err(|e| e.to_string())
}

fn portfolio_fields(form: &PortfolioForm) -> Result<Document, String> {
    Ok(doc! {
        "title": &form.title,
        "slug": form.slug(),
        "description": &form.description,
        "category": form.category.as_str(),
        "tags": to_bson(&form.tags)?,
        "images": to_bson(&form.images)?,
        "before_images": to_bson(&form.before_images)?,
        "after_images": to_bson(&form.after_images)?,
        "is_featured": form.is_featured,
        "sort_order": form.order,
        "completed_at": format_ts(&form.completed_at),
        "updated_at": format_ts(&chrono::Utc::now()),
    })
}

impl Store for MongoStore {
    // ── Lifecycle ───────────────────────────────────────────────────

    fn run_migrations(&self) -> Result<(), String> {
        let portfolio = self.portfolio();
        create_index(&portfolio, doc! { "id": 1 }, true)?;
        create_index(
            &portfolio,
            doc! { "is_active": 1, "completed_at": -1, "sort_order": 1 },
            false,
        )?;
        create_index(&portfolio, doc! { "category": 1 }, false)?;
        create_index(&portfolio, doc! { "is_featured": 1 }, false)?;

        let events = self.events();
        create_index(&events, doc! { "timestamp": -1 }, false)?;
        create_index(&events, doc! { "path": 1 }, false)?;
        Ok(())
    }

    fn seed_defaults(&self) -> Result<(), String> {
        self.cms_ensure(CMS_DOCUMENT_KEY)
    }

    fn db_backend(&self) -> &str {
        "mongodb"
    }

    fn ping(&self) -> Result<(), String> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .map_err(|e| format!("MongoDB connection test failed: {}", e))?;
        Ok(())
    }

    // ── CMS ─────────────────────────────────────────────────────────

    fn cms_ensure(&self, key: &str) -> Result<(), String> {
        let opts = UpdateOptions::builder().upsert(true).build();
        self.cms()
            .update_one(
                doc! { "_id": key },
                doc! { "$setOnInsert": { "updated_at": format_ts(&chrono::Utc::now()) } },
                opts,
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn cms_load(&self, key: &str) -> Result<Option<RawCmsDocument>, String> {
        let Some(mut d) = self
            .cms()
            .find_one(doc! { "_id": key }, None)
            .map_err(|e| e.to_string())?
        else {
            return Ok(None);
        };
        d.remove("_id");
        let updated_at = match d.remove("updated_at") {
            Some(Bson::String(s)) => Some(s),
            _ => None,
        };
        let sections = match Bson::Document(d).into_relaxed_extjson() {
            Value::Object(map) => map,
            _ => return Err("CMS document is not an object".to_string()),
        };
        Ok(Some(RawCmsDocument {
            sections,
            updated_at,
        }))
    }

    fn cms_put_section(&self, key: &str, section: &str, value: &Value) -> Result<(), String> {
        let mut set = Document::new();
        set.insert(section, to_bson(value)?);
        set.insert("updated_at", format_ts(&chrono::Utc::now()));
        let opts = UpdateOptions::builder().upsert(true).build();
        self.cms()
            .update_one(doc! { "_id": key }, doc! { "$set": set }, opts)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    // ── Portfolio ───────────────────────────────────────────────────

    fn portfolio_find_by_id(&self, id: i64) -> Result<Option<PortfolioItem>, String> {
        let d = self
            .portfolio()
            .find_one(doc! { "id": id }, None)
            .map_err(|e| e.to_string())?;
        Ok(d.as_ref().and_then(portfolio_or_warn))
    }

    fn portfolio_list(&self, filter: &PortfolioFilter) -> Result<Vec<PortfolioItem>, String> {
        let mut query = doc! { "is_active": true };
        if let Some(category) = filter.category {
            query.insert("category", category.as_str());
        }
        if let Some(featured) = filter.is_featured {
            query.insert("is_featured", featured);
        }
        let opts = FindOptions::builder()
            .sort(doc! { "completed_at": -1, "sort_order": 1, "id": -1 })
            .limit(filter.effective_limit())
            .build();
        let cursor = self
            .portfolio()
            .find(query, opts)
            .map_err(|e| e.to_string())?;
        Ok(cursor
            .filter_map(|r| match r {
                Ok(d) => Some(d),
                Err(e) => {
                    log::warn!("Skipping unreadable portfolio document: {}", e);
                    None
                }
            })
            .filter_map(|d| portfolio_or_warn(&d))
            .collect())
    }

    fn portfolio_create(&self, form: &PortfolioForm) -> Result<i64, String> {
        let id = self.next_id("portfolio")?;
        let mut d = portfolio_fields(form)?;
        let now = format_ts(&chrono::Utc::now());
        d.insert("id", id);
        d.insert("is_active", true);
        d.insert("created_at", now.clone());
        d.insert("updated_at", now);
        self.portfolio()
            .insert_one(d, None)
            .map_err(|e| e.to_string())?;
        Ok(id)
    }

    fn portfolio_update(&self, id: i64, form: &PortfolioForm) -> Result<bool, String> {
        let result = self
            .portfolio()
            .update_one(doc! { "id": id }, doc! { "$set": portfolio_fields(form)? }, None)
            .map_err(|e| e.to_string())?;
        Ok(result.matched_count > 0)
    }

    fn portfolio_set_active(&self, id: i64, active: bool) -> Result<bool, String> {
        let result = self
            .portfolio()
            .update_one(
                doc! { "id": id },
                doc! { "$set": {
                    "is_active": active,
                    "updated_at": format_ts(&chrono::Utc::now()),
                }},
                None,
            )
            .map_err(|e| e.to_string())?;
        Ok(result.matched_count > 0)
    }

    // ── Analytics ───────────────────────────────────────────────────

    fn analytics_record(&self, view: &PageView) -> Result<(), String> {
        self.events()
            .insert_one(
                doc! {
                    "path": &view.path,
                    "ip": view.ip.as_deref(),
                    "user_agent": view.user_agent.as_deref(),
                    "referrer": view.referrer.as_deref(),
                    "device_type": view.device_type.as_deref(),
                    "browser": view.browser.as_deref(),
                    "os": view.os.as_deref(),
                    "country": view.country.as_deref(),
                    "city": view.city.as_deref(),
                    "timestamp": format_ts(&view.timestamp),
                },
                None,
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn analytics_visit_count(&self, since: &str) -> Result<i64, String> {
        let n = self
            .events()
            .count_documents(
                doc! { "ip": { "$ne": Bson::Null }, "timestamp": { "$gte": since } },
                None,
            )
            .map_err(|e| e.to_string())?;
        Ok(n as i64)
    }

    fn analytics_unique_visitors(&self, since: &str) -> Result<i64, String> {
        let pipeline = vec![
            window_match(since),
            doc! { "$group": { "_id": "$ip" } },
            doc! { "$count": "visitors" },
        ];
        let mut cursor = self
            .events()
            .aggregate(pipeline, None)
            .map_err(|e| e.to_string())?;
        match cursor.next() {
            Some(d) => Ok(count_of(&d.map_err(|e| e.to_string())?, "visitors")),
            None => Ok(0),
        }
    }

    fn analytics_top_paths(&self, since: &str, limit: i64) -> Result<Vec<CountEntry>, String> {
        self.grouped(vec![
            window_match(since),
            doc! { "$group": { "_id": "$path", "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1, "_id": 1 } },
            doc! { "$limit": limit },
        ])
    }

    fn analytics_referrer_counts(&self, since: &str) -> Result<Vec<CountEntry>, String> {
        self.grouped(vec![
            window_match(since),
            doc! { "$match": { "referrer": { "$ne": Bson::Null } } },
            doc! { "$group": { "_id": "$referrer", "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1, "_id": 1 } },
        ])
    }

    fn analytics_daily_counts(&self, since: &str) -> Result<Vec<DailyCount>, String> {
        let days = self.grouped(vec![
            window_match(since),
            doc! { "$group": {
                "_id": { "$substrBytes": ["$timestamp", 0, 10] },
                "count": { "$sum": 1 },
            }},
            doc! { "$sort": { "_id": 1 } },
        ])?;
        Ok(days
            .into_iter()
            .map(|e| DailyCount {
                date: e.label,
                count: e.count,
            })
            .collect())
    }
}

// ── Helper: read a numeric aggregate field ───────────────────────────

fn count_of(d: &Document, field: &str) -> i64 {
    d.get_i32(field)
        .map(|c| c as i64)
        .or_else(|_| d.get_i64(field))
        .unwrap_or(0)
}

fn bson_field<T: DeserializeOwned + Default>(d: &Document, key: &str) -> T {
    d.get(key)
        .cloned()
        .and_then(|b| bson::from_bson(b).ok())
        .unwrap_or_default()
}

// ── Helper: Convert BSON Document to PortfolioItem ───────────────────

/// Like `doc_to_portfolio`, but logs documents that do not fit the item shape.
fn portfolio_or_warn(d: &Document) -> Option<PortfolioItem> {
    let item = doc_to_portfolio(d);
    if item.is_none() {
        log::warn!(
            "Skipping malformed portfolio document (id {:?})",
            d.get("id").or_else(|| d.get("_id"))
        );
    }
    item
}

fn doc_to_portfolio(d: &Document) -> Option<PortfolioItem> {
    Some(PortfolioItem {
        id: d.get_i64("id").ok()?,
        title: d.get_str("title").ok()?.to_string(),
        slug: d.get_str("slug").ok().unwrap_or("").to_string(),
        description: d.get_str("description").ok().unwrap_or("").to_string(),
        category: d.get_str("category").ok()?.parse().ok()?,
        tags: bson_field(d, "tags"),
        images: bson_field(d, "images"),
        before_images: bson_field(d, "before_images"),
        after_images: bson_field(d, "after_images"),
        is_active: d.get_bool("is_active").unwrap_or(true),
        is_featured: d.get_bool("is_featured").unwrap_or(false),
        order: count_of(d, "sort_order"),
        completed_at: d.get_str("completed_at").ok().and_then(parse_ts)?,
        created_at: d.get_str("created_at").ok().and_then(parse_ts)?,
        updated_at: d.get_str("updated_at").ok().and_then(parse_ts)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::portfolio::PortfolioCategory;

    fn stored(form: &PortfolioForm) -> Document {
        let mut d = portfolio_fields(form).unwrap();
        d.insert("id", 7_i64);
        d.insert("is_active", true);
        d.insert("created_at", "2025-05-01T00:00:00Z");
        d
    }

    fn sample_form() -> PortfolioForm {
        PortfolioForm {
            title: "Ducted system".to_string(),
            description: String::new(),
            category: PortfolioCategory::AirconInstallation,
            tags: BTreeSet::from(["condo".to_string()]),
            images: vec![],
            before_images: vec![],
            after_images: vec![],
            is_featured: true,
            order: 2,
            completed_at: Utc.with_ymd_and_hms(2025, 4, 30, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_portfolio_document_converts() {
        let item = portfolio_or_warn(&stored(&sample_form())).unwrap();
        assert_eq!(item.id, 7);
        assert_eq!(item.slug, "ducted-system");
        assert_eq!(item.order, 2);
        assert!(item.is_featured);
        assert!(item.tags.contains("condo"));
    }

    #[test]
    fn test_malformed_portfolio_document_skipped() {
        let mut d = stored(&sample_form());
        d.insert("category", "gardening");
        assert!(portfolio_or_warn(&d).is_none());

        let mut d = stored(&sample_form());
        d.remove("completed_at");
        assert!(portfolio_or_warn(&d).is_none());
    }
}
