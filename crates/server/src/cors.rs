// CORS middleware configuration.
//
// Origins come from the `CORS_ORIGINS` config value (comma-separated,
// or `"*"` for any origin).

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Build a [`CorsLayer`] from the configured origin list.
///
/// - `["*"]` allows any origin; browsers require credentials off in
///   that case.
/// - Otherwise exactly the listed origins are allowed, with credentials.
///
/// All configurations allow the methods and headers the frontend uses
/// and cache preflight responses for five minutes.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            axum::http::header::ACCEPT,
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(300));

    if origins.iter().any(|origin| origin == "*") {
        return base.allow_origin(AllowOrigin::any()).allow_credentials(false);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    base.allow_origin(parsed)
}
