use std::sync::Arc;

use chrono::Utc;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::State;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analytics::{build_page_view, GeoLookup};
use crate::auth::{AdminToken, ClientIp};
use crate::error::{ApiError, ApiResult};
use crate::models::analytics::{window_start, AnalyticsOverview, DailyCount};
use crate::store::Store;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// The request's own `User-Agent` header, used when the body has none.
pub struct UserAgentHeader(pub Option<String>);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserAgentHeader {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ua = request.headers().get_one("User-Agent").map(String::from);
        Outcome::Success(UserAgentHeader(ua))
    }
}

#[post("/analytics/track", data = "<body>")]
pub fn track(
    store: &State<Arc<dyn Store>>,
    geo: &State<GeoLookup>,
    client_ip: ClientIp,
    header_ua: UserAgentHeader,
    body: Json<TrackRequest>,
) -> ApiResult<Json<Value>> {
    let body = body.into_inner();
    let user_agent = body
        .user_agent
        .as_deref()
        .filter(|ua| !ua.trim().is_empty())
        .or(header_ua.0.as_deref());
    let view = build_page_view(
        &body.path,
        body.referrer.as_deref(),
        user_agent,
        client_ip.0.as_deref(),
        geo.inner(),
        Utc::now(),
    )
    .map_err(ApiError::Validation)?;
    store.analytics_record(&view).map_err(ApiError::Internal)?;
    Ok(Json(json!({ "success": true })))
}

#[get("/analytics/overview")]
pub fn overview(
    _admin: AdminToken,
    store: &State<Arc<dyn Store>>,
) -> ApiResult<Json<AnalyticsOverview>> {
    let overview =
        AnalyticsOverview::compute(store.inner().as_ref(), Utc::now()).map_err(ApiError::Internal)?;
    Ok(Json(overview))
}

#[get("/analytics/daily")]
pub fn daily(_admin: AdminToken, store: &State<Arc<dyn Store>>) -> ApiResult<Json<Vec<DailyCount>>> {
    let since = window_start(Utc::now());
    let days = store
        .analytics_daily_counts(&since)
        .map_err(ApiError::Internal)?;
    Ok(Json(days))
}
