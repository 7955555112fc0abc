use std::sync::Arc;

use chrono::Utc;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde_json::{json, Value};

use crate::auth::AdminToken;
use crate::config::AppConfig;
use crate::error::{ApiError, ApiResult};
use crate::images::{self, CheckedUpload, UploadPolicy};
use crate::models::portfolio::{
    parse_completed_at, parse_retained, parse_tags, retain_images, PortfolioCategory,
    PortfolioFilter, PortfolioForm, PortfolioImage, PortfolioItem,
};
use crate::store::Store;

#[derive(FromForm)]
pub struct PortfolioQuery<'r> {
    pub category: Option<&'r str>,
    #[field(name = "isFeatured")]
    pub is_featured: Option<bool>,
    pub limit: Option<i64>,
}

/// Multipart body for create and update. Text fields are kept raw so that
/// bad values produce a 400 with a message.
#[derive(FromForm)]
pub struct PortfolioUpload<'f> {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Option<String>,
    #[field(name = "isFeatured")]
    pub is_featured: Option<String>,
    pub order: Option<String>,
    #[field(name = "completedAt")]
    pub completed_at: Option<String>,
    pub images: Vec<TempFile<'f>>,
    #[field(name = "beforeImages")]
    pub before_images: Vec<TempFile<'f>>,
    #[field(name = "afterImages")]
    pub after_images: Vec<TempFile<'f>>,
    #[field(name = "existingImages")]
    pub existing_images: Option<String>,
    #[field(name = "existingBeforeImages")]
    pub existing_before_images: Option<String>,
    #[field(name = "existingAfterImages")]
    pub existing_after_images: Option<String>,
}

fn parse_category(raw: &str) -> ApiResult<PortfolioCategory> {
    raw.parse().map_err(ApiError::Validation)
}

fn parse_flag(raw: &str, field: &str) -> ApiResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        other => Err(ApiError::Validation(format!(
            "{} must be true or false, got '{}'",
            field, other
        ))),
    }
}

fn parse_order(raw: &str) -> ApiResult<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("order must be an integer, got '{}'", raw)))
}

fn required_title(raw: &str) -> ApiResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("title is required".to_string()));
    }
    Ok(title.to_string())
}

/// Checked uploads for the three image groups, in form order.
struct CheckedGroups {
    images: Vec<Option<CheckedUpload>>,
    before: Vec<Option<CheckedUpload>>,
    after: Vec<Option<CheckedUpload>>,
}

async fn check_uploads(form: &PortfolioUpload<'_>, policy: &UploadPolicy) -> ApiResult<CheckedGroups> {
    Ok(CheckedGroups {
        images: images::check_group("images", &form.images, policy)
            .await
            .map_err(ApiError::Validation)?,
        before: images::check_group("beforeImages", &form.before_images, policy)
            .await
            .map_err(ApiError::Validation)?,
        after: images::check_group("afterImages", &form.after_images, policy)
            .await
            .map_err(ApiError::Validation)?,
    })
}

struct SavedGroups {
    images: Vec<PortfolioImage>,
    before: Vec<PortfolioImage>,
    after: Vec<PortfolioImage>,
}

/// Write every checked file. On failure, files already written are removed.
async fn save_uploads(
    form: &mut PortfolioUpload<'_>,
    checked: &CheckedGroups,
    policy: &UploadPolicy,
) -> ApiResult<SavedGroups> {
    let mut written = Vec::new();
    let result = async {
        let images =
            images::save_group(&mut form.images, &checked.images, &policy.dir, &mut written).await?;
        let before =
            images::save_group(&mut form.before_images, &checked.before, &policy.dir, &mut written)
                .await?;
        let after =
            images::save_group(&mut form.after_images, &checked.after, &policy.dir, &mut written)
                .await?;
        Ok::<_, String>(SavedGroups {
            images,
            before,
            after,
        })
    }
    .await;

    result.map_err(|e| {
        discard(policy, &written);
        ApiError::Internal(e)
    })
}

fn discard(policy: &UploadPolicy, files: &[PortfolioImage]) {
    for image in files {
        images::delete_image(&policy.dir, image);
    }
}

fn saved_list(saved: &SavedGroups) -> Vec<PortfolioImage> {
    saved
        .images
        .iter()
        .chain(&saved.before)
        .chain(&saved.after)
        .cloned()
        .collect()
}

/// Stored images to keep in one group. An absent field keeps the group as is.
fn kept_group(
    raw: Option<&str>,
    field: &str,
    stored: &[PortfolioImage],
) -> ApiResult<Vec<PortfolioImage>> {
    match raw {
        Some(raw) => {
            let keep = parse_retained(raw, field).map_err(ApiError::Validation)?;
            Ok(retain_images(stored, &keep))
        }
        None => Ok(stored.to_vec()),
    }
}

fn load_item(store: &dyn Store, id: i64) -> ApiResult<PortfolioItem> {
    store
        .portfolio_find_by_id(id)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound(format!("Portfolio item {}", id)))
}

/// Active items, newest completion first.
#[get("/portfolio?<query..>")]
pub fn list(store: &State<Arc<dyn Store>>, query: PortfolioQuery<'_>) -> ApiResult<Json<Vec<PortfolioItem>>> {
    let filter = PortfolioFilter {
        category: query
            .category
            .filter(|c| !c.trim().is_empty())
            .map(parse_category)
            .transpose()?,
        is_featured: query.is_featured,
        limit: query.limit,
    };
    let items = store.portfolio_list(&filter).map_err(ApiError::Internal)?;
    Ok(Json(items))
}

/// Any item by id, including soft-deleted ones.
#[get("/portfolio/<id>")]
pub fn get(store: &State<Arc<dyn Store>>, id: i64) -> ApiResult<Json<PortfolioItem>> {
    Ok(Json(load_item(store.inner().as_ref(), id)?))
}

#[post("/portfolio", data = "<form>")]
pub async fn create(
    _admin: AdminToken,
    store: &State<Arc<dyn Store>>,
    config: &State<AppConfig>,
    mut form: Form<PortfolioUpload<'_>>,
) -> ApiResult<(Status, Json<Value>)> {
    let policy = UploadPolicy::from_config(&config.uploads);

    let title = required_title(form.title.as_deref().unwrap_or(""))?;
    let category = match form.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => parse_category(c)?,
        None => return Err(ApiError::Validation("category is required".to_string())),
    };
    let tags = parse_tags(form.tags.as_deref().unwrap_or("")).map_err(ApiError::Validation)?;
    let is_featured = parse_flag(form.is_featured.as_deref().unwrap_or(""), "isFeatured")?;
    let order = parse_order(form.order.as_deref().unwrap_or(""))?;
    let completed_at = match form.completed_at.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(raw) => parse_completed_at(raw).map_err(ApiError::Validation)?,
        None => Utc::now(),
    };

    let checked = check_uploads(&form, &policy).await?;
    let saved = save_uploads(&mut form, &checked, &policy).await?;
    let written = saved_list(&saved);

    let record = PortfolioForm {
        title,
        description: form.description.as_deref().unwrap_or("").trim().to_string(),
        category,
        tags,
        images: saved.images,
        before_images: saved.before,
        after_images: saved.after,
        is_featured,
        order,
        completed_at,
    };

    let stored = store
        .portfolio_create(&record)
        .and_then(|id| {
            store
                .portfolio_find_by_id(id)?
                .ok_or_else(|| format!("portfolio item {} vanished after insert", id))
        });
    let item = match stored {
        Ok(item) => item,
        Err(e) => {
            discard(&policy, &written);
            return Err(ApiError::Internal(e));
        }
    };

    log::info!("Portfolio item {} created ({} file(s))", item.id, written.len());
    Ok((
        Status::Created,
        Json(json!({ "success": true, "data": item })),
    ))
}

/// Partial update. For each image group the `existing…` field lists the
/// stored images to keep; new uploads are appended after them.
#[put("/portfolio/<id>", data = "<form>")]
pub async fn update(
    _admin: AdminToken,
    store: &State<Arc<dyn Store>>,
    config: &State<AppConfig>,
    id: i64,
    mut form: Form<PortfolioUpload<'_>>,
) -> ApiResult<Json<Value>> {
    let policy = UploadPolicy::from_config(&config.uploads);
    let current = load_item(store.inner().as_ref(), id)?;
    let mut record = PortfolioForm::from_item(&current);

    if let Some(title) = form.title.as_deref() {
        record.title = required_title(title)?;
    }
    if let Some(description) = form.description.as_deref() {
        record.description = description.trim().to_string();
    }
    if let Some(category) = form.category.as_deref() {
        record.category = parse_category(category)?;
    }
    if let Some(tags) = form.tags.as_deref() {
        record.tags = parse_tags(tags).map_err(ApiError::Validation)?;
    }
    if let Some(flag) = form.is_featured.as_deref() {
        record.is_featured = parse_flag(flag, "isFeatured")?;
    }
    if let Some(order) = form.order.as_deref() {
        record.order = parse_order(order)?;
    }
    if let Some(raw) = form.completed_at.as_deref().filter(|s| !s.trim().is_empty()) {
        record.completed_at = parse_completed_at(raw).map_err(ApiError::Validation)?;
    }

    let mut images = kept_group(form.existing_images.as_deref(), "existingImages", &current.images)?;
    let mut before = kept_group(
        form.existing_before_images.as_deref(),
        "existingBeforeImages",
        &current.before_images,
    )?;
    let mut after = kept_group(
        form.existing_after_images.as_deref(),
        "existingAfterImages",
        &current.after_images,
    )?;

    let checked = check_uploads(&form, &policy).await?;
    let saved = save_uploads(&mut form, &checked, &policy).await?;
    let written = saved_list(&saved);
    images.extend(saved.images);
    before.extend(saved.before);
    after.extend(saved.after);
    record.images = images;
    record.before_images = before;
    record.after_images = after;

    let updated = match store.portfolio_update(id, &record) {
        Ok(true) => load_item(store.inner().as_ref(), id),
        Ok(false) => Err(ApiError::NotFound(format!("Portfolio item {}", id))),
        Err(e) => Err(ApiError::Internal(e)),
    };
    let item = match updated {
        Ok(item) => item,
        Err(e) => {
            discard(&policy, &written);
            return Err(e);
        }
    };

    // Remove files no longer referenced by any group.
    let still_used = |img: &PortfolioImage| {
        item.images
            .iter()
            .chain(&item.before_images)
            .chain(&item.after_images)
            .any(|i| i.id == img.id)
    };
    let dropped: Vec<PortfolioImage> = current
        .images
        .iter()
        .chain(&current.before_images)
        .chain(&current.after_images)
        .filter(|img| !still_used(img))
        .cloned()
        .collect();
    discard(&policy, &dropped);

    log::info!(
        "Portfolio item {} updated ({} new file(s), {} removed)",
        id,
        written.len(),
        dropped.len()
    );
    Ok(Json(json!({ "success": true, "data": item })))
}

/// Soft delete: the item is hidden from the list but kept.
#[delete("/portfolio/<id>")]
pub fn delete(_admin: AdminToken, store: &State<Arc<dyn Store>>, id: i64) -> ApiResult<Json<Value>> {
    if !store
        .portfolio_set_active(id, false)
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::NotFound(format!("Portfolio item {}", id)));
    }
    log::info!("Portfolio item {} deactivated", id);
    Ok(Json(json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("TRUE", "isFeatured").unwrap());
        assert!(parse_flag("on", "isFeatured").unwrap());
        assert!(!parse_flag("", "isFeatured").unwrap());
        assert!(parse_flag("maybe", "isFeatured").is_err());
    }

    #[test]
    fn test_parse_order() {
        assert_eq!(parse_order(" 3 ").unwrap(), 3);
        assert_eq!(parse_order("").unwrap(), 0);
        assert!(parse_order("first").is_err());
    }
}
