//! Route definitions for the `/notifications` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::notification;
use crate::state::AppState;

/// Routes mounted at `/notifications`.
///
/// ```text
/// POST   /                          -> publish_notification
/// GET    /?user_id=N                -> list_notifications
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/",
        get(notification::list_notifications).post(notification::publish_notification),
    )
}
