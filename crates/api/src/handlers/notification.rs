//! Handlers for the `/notifications` resource.
//!
//! Publishing only appends to the stream; delivery happens asynchronously in
//! the worker, which writes the records listed here.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::Json;
use courier_core::types::{DbId, EntryId};
use courier_db::models::notification::NotificationRecord;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body of `POST /notifications`.
#[derive(Debug, Deserialize)]
pub struct PublishNotification {
    pub user_id: DbId,
    #[serde(rename = "type")]
    pub category: String,
    pub message: String,
}

/// Returned once the request is durably on the stream.
#[derive(Debug, Serialize)]
pub struct PublishedEntry {
    pub entry_id: EntryId,
}

/// Query parameters for `GET /notifications`.
#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    /// Recipient whose notifications to list. Required.
    pub user_id: Option<DbId>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Maximum page size for notification listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for notification listing.
const DEFAULT_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/notifications
///
/// Validate and append a notification request. Responds once the entry is
/// committed to the stream. Bodies that are not valid JSON for
/// [`PublishNotification`] get a 400 in the usual error shape.
pub async fn publish_notification(
    State(state): State<AppState>,
    payload: Result<Json<PublishNotification>, JsonRejection>,
) -> AppResult<Json<DataResponse<PublishedEntry>>> {
    let Json(input) = payload.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
    let entry_id = state
        .producer
        .publish(input.user_id, &input.category, &input.message)
        .await?;

    tracing::info!(
        entry_id,
        user_id = input.user_id,
        category = %input.category,
        "Notification queued"
    );

    Ok(Json(DataResponse {
        data: PublishedEntry { entry_id },
    }))
}

/// GET /api/v1/notifications?user_id=N
///
/// List a recipient's processed notifications, newest first.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationQuery>,
) -> AppResult<Json<DataResponse<Vec<NotificationRecord>>>> {
    let user_id = match params.user_id {
        Some(id) if id > 0 => id,
        Some(id) => {
            return Err(AppError::BadRequest(format!(
                "user_id must be positive, got {id}"
            )))
        }
        None => return Err(AppError::BadRequest("user_id is required".into())),
    };
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let notifications = state.records.list(user_id, limit, offset).await?;

    Ok(Json(DataResponse {
        data: notifications,
    }))
}
