// Input validation: a JSON body extractor with consistent error
// rendering, and the per-field validator used by request types.

use std::collections::BTreeMap;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::ApiError;

/// A JSON body extractor that returns the API error envelope on failure.
///
/// Use this instead of `axum::Json<T>` in handlers: malformed bodies
/// become 400 responses in the standard `{status, message}` shape
/// instead of plain-text rejections.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => {
                Err(ApiError::bad_request(rejection_message(&rejection)).into_response())
            }
        }
    }
}

fn rejection_message(rejection: &JsonRejection) -> String {
    match rejection {
        JsonRejection::JsonDataError(error) => format!("invalid JSON payload: {error}"),
        JsonRejection::JsonSyntaxError(error) => format!("malformed JSON: {error}"),
        JsonRejection::MissingJsonContentType(_) => {
            "expected Content-Type: application/json".to_string()
        }
        other => format!("request body error: {other}"),
    }
}

/// Collects per-field validation messages, rendered into the error
/// envelope's `meta` as `{field: [messages]}`.
#[derive(Debug, Default)]
pub struct Validator {
    errors: BTreeMap<String, Vec<String>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add(&mut self, key: &str, message: &str) {
        self.errors
            .entry(key.to_string())
            .or_default()
            .push(message.to_string());
    }

    pub fn check(&mut self, key: &str, message: &str, valid: bool) {
        if !valid {
            self.add(key, message);
        }
    }

    pub fn into_error(self) -> ApiError {
        ApiError::validation_failed(json!(self.errors))
    }
}

pub fn not_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

pub fn min_length(value: &str, min: usize) -> bool {
    value.len() >= min
}

/// Structural email check: one `@` separating a non-empty local part
/// from a dotted, non-empty domain.
pub fn valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };

    if local.is_empty() || domain.is_empty() || value.contains(char::is_whitespace) {
        return false;
    }

    domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Method, Request, StatusCode},
        response::IntoResponse,
        routing::post,
        Router,
    };
    use serde::Deserialize;
    use tower::ServiceExt;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct TestPayload {
        name: String,
    }

    async fn echo_handler(ValidatedJson(payload): ValidatedJson<TestPayload>) -> impl IntoResponse {
        (StatusCode::OK, payload.name)
    }

    fn test_app() -> Router {
        Router::new().route("/test", post(echo_handler))
    }

    #[tokio::test]
    async fn validated_json_accepts_valid_payload() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/test")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"alice"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn validated_json_rejects_malformed_json_with_envelope() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/test")
                    .header("content-type", "application/json")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], 400);
        assert!(parsed["message"].as_str().unwrap().starts_with("malformed JSON"));
    }

    #[tokio::test]
    async fn validator_collects_messages_per_field() {
        let mut validator = Validator::new();
        validator.check("email", "email is required", not_blank(""));
        validator.check("email", "email is invalid", valid_email(""));
        validator.check("name", "name is required", not_blank("ok"));

        assert!(!validator.valid());
        let error = validator.into_error();
        let meta = error.meta().expect("validation error should carry meta");
        assert_eq!(meta["email"][0], "email is required");
        assert_eq!(meta["email"][1], "email is invalid");
        assert!(meta.get("name").is_none());
    }

    #[test]
    fn email_validation_accepts_plausible_addresses() {
        assert!(valid_email("a@b.c"));
        assert!(valid_email("user.name+tag@example.co.uk"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("user@"));
        assert!(!valid_email("user@nodot"));
        assert!(!valid_email("user name@example.com"));
    }

    #[test]
    fn min_length_counts_bytes() {
        assert!(min_length("password", 6));
        assert!(!min_length("short", 6));
    }
}
