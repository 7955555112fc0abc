#[macro_use]
extern crate rocket;

use std::sync::Arc;

use rocket::data::{ByteUnit, Limits, ToByteUnit};
use rocket::fs::{FileServer, Options};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Build, Request, Rocket};
use serde_json::{json, Value};

mod analytics;
mod auth;
mod boot;
mod config;
mod db;
mod error;
mod images;
mod models;
mod routes;
mod store;


use analytics::GeoLookup;
use config::AppConfig;
use models::cms::CmsDocument;
use store::mongo::MongoStore;
use store::sqlite::SqliteStore;
use store::Store;

/// Rocket-generated errors (bad bodies, oversized uploads, failed guards)
/// get the same JSON shape as handler errors.
#[catch(default)]
fn json_error(status: Status, _req: &Request) -> (Status, Json<Value>) {
    let message = match status.code {
        500 => "Internal server error".to_string(),
        413 => "Request too large".to_string(),
        _ => status.reason().unwrap_or("Request failed").to_string(),
    };
    (status, Json(json!({ "success": false, "error": message })))
}

/// Request size limits derived from the upload settings. A single file may
/// slightly exceed the ceiling so the handler can report it by name.
fn limits_for(config: &AppConfig) -> Limits {
    let per_file = config.uploads.max_file_bytes();
    let max_files = (images::MAX_FILES_PER_FIELD * 3) as u64;
    Limits::default()
        .limit("file", ByteUnit::from(per_file.saturating_add(1024)))
        .limit(
            "data-form",
            ByteUnit::from(per_file.saturating_mul(max_files).saturating_add(1024 * 1024)),
        )
        .limit("json", 1.mebibytes())
}

fn open_store(config: &AppConfig) -> Result<Arc<dyn Store>, String> {
    match config.database.backend.as_str() {
        "mongodb" => {
            let store = MongoStore::new(&config.database.uri, &config.database.name)?;
            store.ping()?;
            Ok(Arc::new(store))
        }
        "sqlite" => Ok(Arc::new(SqliteStore::new_at(&config.database.sqlite_path)?)),
        other => Err(format!(
            "Unknown database backend '{}' (expected mongodb or sqlite)",
            other
        )),
    }
}

/// Assemble the server around an already-migrated store.
pub fn build_rocket(store: Arc<dyn Store>, config: AppConfig) -> Rocket<Build> {
    let figment = rocket::Config::figment().merge(("limits", limits_for(&config)));
    let geo = GeoLookup::open(
        config
            .analytics
            .geoip_db
            .as_deref()
            .and_then(|p| p.to_str()),
    );
    let uploads = FileServer::new(&config.uploads.dir, Options::Missing);

    rocket::custom(figment)
        .manage(store)
        .manage(geo)
        .manage(config)
        .mount("/api", routes::routes())
        .mount("/uploads", uploads)
        .register("/", catchers![json_error])
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    let config = AppConfig::load().expect("Failed to load configuration");

    // Upload directories must exist before anything is served
    boot::run(&config);

    let store = open_store(&config).expect("Failed to open database");
    store.run_migrations().expect("Failed to run database migrations");
    store.seed_defaults().expect("Failed to seed defaults");
    log::info!("Using {} backend", store.db_backend());

    match CmsDocument::backfill_ids(store.as_ref()) {
        Ok(0) => {}
        Ok(n) => log::info!("Assigned {} missing CMS identifier(s)", n),
        Err(e) => log::error!("CMS identifier backfill failed: {}", e),
    }

    build_rocket(store, config)
}
