use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{NotificationFilters, NotificationStatus, PushNotification, PushNotificationRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/notifications", get(list_notifications))
        .route("/notifications/stats", get(get_notification_stats))
}

/// Called by the device's service worker without credentials; the record id is
/// the only handle it has.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new().route("/notifications/:id/delivered", patch(mark_delivered))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListNotificationsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationsListResponse {
    pub items: Vec<PushNotification>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatsResponse {
    pub total: i64,
    pub pending: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
}

impl NotificationStatsResponse {
    fn from_counts(counts: &HashMap<String, i64>) -> Self {
        let get = |s: NotificationStatus| counts.get(s.as_str()).copied().unwrap_or(0);
        Self {
            total: counts.values().sum(),
            pending: get(NotificationStatus::Pending),
            sent: get(NotificationStatus::Sent),
            delivered: get(NotificationStatus::Delivered),
            failed: get(NotificationStatus::Failed),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Notification history across all of the caller's devices
async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<ListNotificationsQuery>,
) -> AppResult<Json<NotificationsListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);
    let offset = page.saturating_sub(1).saturating_mul(per_page);

    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<NotificationStatus>())
        .transpose()
        .map_err(AppError::BadRequest)?;

    let filters = NotificationFilters {
        status,
        limit: Some(per_page),
        offset: Some(offset),
    };

    let (items, total) = tokio::try_join!(
        PushNotificationRepository::find_by_user_id_with_filters(&state.db, &user.user_id, &filters),
        PushNotificationRepository::count_by_user_id_with_filters(&state.db, &user.user_id, status),
    )?;

    let total_pages = (total as f64 / per_page as f64).ceil() as i64;

    Ok(Json(NotificationsListResponse {
        items,
        total,
        page,
        per_page,
        total_pages,
    }))
}

async fn get_notification_stats(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<NotificationStatsResponse>> {
    let counts = PushNotificationRepository::counts_by_status(&state.db, &user.user_id).await?;
    Ok(Json(NotificationStatsResponse::from_counts(&counts)))
}

/// Delivery acknowledgment. Repeated calls return the record unchanged.
async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<PushNotification>> {
    let record = PushNotificationRepository::mark_delivered(&state.db, &id).await?;
    tracing::debug!("Notification {} acknowledged ({})", id, record.status.as_str());
    Ok(Json(record))
}
