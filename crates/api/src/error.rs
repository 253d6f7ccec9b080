use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use courier_events::records::RecordError;
use courier_events::PublishError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps the publish and record errors and adds HTTP-specific variants.
/// Event validation failures arrive as [`PublishError::InvalidEvent`]. Implements [`IntoResponse`] to
/// produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Publishing to the stream failed.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Reading processed notification records failed.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- Stream errors ---
            AppError::Publish(publish) => match publish {
                PublishError::InvalidEvent(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                PublishError::StoreUnavailable { attempts, .. } => {
                    tracing::error!(error = %publish, "Notification not published");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "STORE_UNAVAILABLE",
                        format!("Notification stream unavailable after {attempts} attempts"),
                    )
                }
                PublishError::Stream(err) => {
                    tracing::error!(error = %err, "Stream store error");
                    internal()
                }
            },

            // --- Record store errors ---
            AppError::Record(err) => {
                tracing::error!(error = %err, "Notification store error");
                internal()
            }

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
