use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Wraps `ReaperError` so handlers can return it directly; renders a
/// `{error, message}` JSON body at the mapped HTTP status.
pub struct ApiError(pub reaper_core::ReaperError);

impl From<reaper_core::ReaperError> for ApiError {
    fn from(err: reaper_core::ReaperError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
