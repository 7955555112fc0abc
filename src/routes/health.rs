use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::store::Store;

#[get("/health")]
pub fn health(store: &State<Arc<dyn Store>>) -> ApiResult<Json<Value>> {
    store.ping().map_err(ApiError::Internal)?;
    Ok(Json(json!({
        "status": "ok",
        "backend": store.db_backend(),
    })))
}
