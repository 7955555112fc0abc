pub mod analytics;
pub mod cms;
pub mod health;
pub mod portfolio;

/// Every API route, mounted under `/api`.
pub fn routes() -> Vec<rocket::Route> {
    routes![
        cms::get_document,
        cms::get_section,
        cms::patch_section,
        portfolio::list,
        portfolio::get,
        portfolio::create,
        portfolio::update,
        portfolio::delete,
        analytics::track,
        analytics::overview,
        analytics::daily,
        health::health,
    ]
}
