use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use crate::auth::AdminToken;
use crate::error::{ApiError, ApiResult};
use crate::models::cms::{CmsDocument, Section};
use crate::store::Store;

fn section_from_path(name: &str) -> ApiResult<Section> {
    Section::from_key(name).ok_or_else(|| ApiError::NotFound(format!("Section '{}'", name)))
}

/// The whole singleton document. Sections never saved are omitted.
#[get("/cms")]
pub fn get_document(store: &State<Arc<dyn Store>>) -> ApiResult<Json<CmsDocument>> {
    let doc = CmsDocument::load(store.inner().as_ref()).map_err(ApiError::Internal)?;
    Ok(Json(doc))
}

#[get("/cms/<section>")]
pub fn get_section(store: &State<Arc<dyn Store>>, section: &str) -> ApiResult<Json<Value>> {
    let section = section_from_path(section)?;
    let doc = CmsDocument::load(store.inner().as_ref()).map_err(ApiError::Internal)?;
    let value = match doc.section(section) {
        Some(content) => content.to_value().map_err(ApiError::Internal)?,
        None => Value::Null,
    };
    Ok(Json(value))
}

/// Replace one section with the request body.
#[patch("/cms/<section>", data = "<payload>")]
pub fn patch_section(
    _admin: AdminToken,
    store: &State<Arc<dyn Store>>,
    section: &str,
    payload: Json<Value>,
) -> ApiResult<Json<Value>> {
    let section = section_from_path(section)?;
    let content =
        CmsDocument::replace_section(store.inner().as_ref(), section, payload.into_inner())?;
    Ok(Json(json!({
        "success": true,
        "section": section.key(),
        "data": content,
    })))
}
