use std::collections::HashMap;

use chrono::{NaiveDateTime, Utc};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreatePushNotification, NotificationStatus, PushNotification};
use crate::error::{AppError, AppResult};

/// Optional filters and paging for a user's notification history.
#[derive(Debug, Clone, Default)]
pub struct NotificationFilters {
    pub status: Option<NotificationStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Repository for notification records and their delivery lifecycle.
///
/// Implementation notes:
/// - Every status transition is one guarded `UPDATE ... WHERE status IN (...)`.
///   When the guard does not match, the current row is returned unchanged so a
///   late or duplicate write never moves a record out of a terminal state.
/// - Scheduled records are claimed with the single-statement
///   `UPDATE ... WHERE id = (SELECT id ... LIMIT 1) RETURNING ...` pattern.
pub struct PushNotificationRepository;

impl PushNotificationRepository {
    /// Create a PENDING record.
    ///
    /// The record is claimed immediately (the caller delivers it inline) unless
    /// `scheduled_at` lies in the future, in which case it is left for the
    /// scheduled dispatcher.
    pub async fn create(
        pool: &SqlitePool,
        notification: CreatePushNotification,
    ) -> AppResult<PushNotification> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();
        let claimed_at = match notification.scheduled_at {
            Some(at) if at > now => None,
            _ => Some(now),
        };
        let data = notification
            .data
            .unwrap_or_else(|| serde_json::json!({ "url": "/" }));

        sqlx::query_as::<_, PushNotification>(
            r#"
            INSERT INTO push_notifications (
                id,
                subscription_id,
                title,
                body,
                data,
                status,
                scheduled_at,
                claimed_at,
                created_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING
                id,
                subscription_id,
                title,
                body,
                data,
                scheduled_at,
                claimed_at,
                sent_at,
                delivered_at,
                status,
                error_message,
                created_at,
                updated_at
            "#,
        )
        .bind(id)
        .bind(notification.subscription_id)
        .bind(notification.title)
        .bind(notification.body)
        .bind(Json(data))
        .bind(NotificationStatus::Pending)
        .bind(notification.scheduled_at)
        .bind(claimed_at)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<PushNotification>> {
        sqlx::query_as::<_, PushNotification>(
            r#"
            SELECT
                id,
                subscription_id,
                title,
                body,
                data,
                scheduled_at,
                claimed_at,
                sent_at,
                delivered_at,
                status,
                error_message,
                created_at,
                updated_at
            FROM push_notifications
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// PENDING -> SENT. Any other current status is left untouched.
    pub async fn mark_sent(pool: &SqlitePool, id: &str) -> AppResult<PushNotification> {
        let now = Utc::now().naive_utc();
        let updated = sqlx::query_as::<_, PushNotification>(
            r#"
            UPDATE push_notifications
            SET status = 'SENT', sent_at = ?, updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            RETURNING
                id,
                subscription_id,
                title,
                body,
                data,
                scheduled_at,
                claimed_at,
                sent_at,
                delivered_at,
                status,
                error_message,
                created_at,
                updated_at
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Self::updated_or_current(pool, id, updated).await
    }

    /// PENDING -> FAILED with the given error message.
    pub async fn mark_failed(
        pool: &SqlitePool,
        id: &str,
        error_message: &str,
    ) -> AppResult<PushNotification> {
        let now = Utc::now().naive_utc();
        let updated = sqlx::query_as::<_, PushNotification>(
            r#"
            UPDATE push_notifications
            SET status = 'FAILED', error_message = ?, updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            RETURNING
                id,
                subscription_id,
                title,
                body,
                data,
                scheduled_at,
                claimed_at,
                sent_at,
                delivered_at,
                status,
                error_message,
                created_at,
                updated_at
            "#,
        )
        .bind(error_message)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Self::updated_or_current(pool, id, updated).await
    }

    /// SENT, or claimed PENDING, -> DELIVERED.
    ///
    /// The acknowledgment may arrive before the SENT write, so a PENDING record
    /// is accepted once it has been claimed for delivery and `sent_at` is
    /// filled in when still empty. An unclaimed scheduled record has not been
    /// pushed yet and is returned unchanged, as are DELIVERED or FAILED
    /// records. Unknown ids are `NotFound`.
    pub async fn mark_delivered(pool: &SqlitePool, id: &str) -> AppResult<PushNotification> {
        let now = Utc::now().naive_utc();
        let updated = sqlx::query_as::<_, PushNotification>(
            r#"
            UPDATE push_notifications
            SET
                status = 'DELIVERED',
                delivered_at = ?,
                sent_at = COALESCE(sent_at, ?),
                updated_at = ?
            WHERE id = ?
              AND (status = 'SENT' OR (status = 'PENDING' AND claimed_at IS NOT NULL))
            RETURNING
                id,
                subscription_id,
                title,
                body,
                data,
                scheduled_at,
                claimed_at,
                sent_at,
                delivered_at,
                status,
                error_message,
                created_at,
                updated_at
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)?;

        Self::updated_or_current(pool, id, updated).await
    }

    async fn updated_or_current(
        pool: &SqlitePool,
        id: &str,
        updated: Option<PushNotification>,
    ) -> AppResult<PushNotification> {
        if let Some(row) = updated {
            return Ok(row);
        }

        Self::find_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
    }

    /// All records of one subscription, newest first.
    pub async fn find_by_subscription_id(
        pool: &SqlitePool,
        subscription_id: &str,
    ) -> AppResult<Vec<PushNotification>> {
        sqlx::query_as::<_, PushNotification>(
            r#"
            SELECT
                id,
                subscription_id,
                title,
                body,
                data,
                scheduled_at,
                claimed_at,
                sent_at,
                delivered_at,
                status,
                error_message,
                created_at,
                updated_at
            FROM push_notifications
            WHERE subscription_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Records across all of a user's subscriptions with optional status filter
    /// and pagination.
    pub async fn find_by_user_id_with_filters(
        pool: &SqlitePool,
        user_id: &str,
        filters: &NotificationFilters,
    ) -> AppResult<Vec<PushNotification>> {
        let limit_val = filters.limit.unwrap_or(100);
        let offset_val = filters.offset.unwrap_or(0);
        let status = filters.status.map(|s| s.as_str());

        sqlx::query_as::<_, PushNotification>(
            r#"
            SELECT
                n.id,
                n.subscription_id,
                n.title,
                n.body,
                n.data,
                n.scheduled_at,
                n.claimed_at,
                n.sent_at,
                n.delivered_at,
                n.status,
                n.error_message,
                n.created_at,
                n.updated_at
            FROM push_notifications n
            JOIN push_subscriptions s ON s.id = n.subscription_id
            WHERE s.user_id = ?
            AND (? IS NULL OR n.status = ?)
            ORDER BY n.created_at DESC
            LIMIT ?
            OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(status)
        .bind(limit_val)
        .bind(offset_val)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn count_by_user_id_with_filters(
        pool: &SqlitePool,
        user_id: &str,
        status: Option<NotificationStatus>,
    ) -> AppResult<i64> {
        let status = status.map(|s| s.as_str());

        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM push_notifications n
            JOIN push_subscriptions s ON s.id = n.subscription_id
            WHERE s.user_id = ?
            AND (? IS NULL OR n.status = ?)
            "#,
        )
        .bind(user_id)
        .bind(status)
        .bind(status)
        .fetch_one(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Counts grouped by status for a user's records.
    pub async fn counts_by_status(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<HashMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT n.status, COUNT(*)
            FROM push_notifications n
            JOIN push_subscriptions s ON s.id = n.subscription_id
            WHERE s.user_id = ?
            GROUP BY n.status
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows.into_iter().collect())
    }

    /// Claim up to `limit` records for delivery at `now`.
    ///
    /// Picks unclaimed scheduled records that are due, plus PENDING records
    /// whose claim is older than `stale_before` (the process that claimed them
    /// never settled them). One record per statement; claiming refreshes
    /// `claimed_at`, so a record is never returned twice within a timeout.
    pub async fn claim_due_scheduled(
        pool: &SqlitePool,
        now: NaiveDateTime,
        stale_before: NaiveDateTime,
        limit: i64,
    ) -> AppResult<Vec<PushNotification>> {
        let mut claimed = Vec::new();
        if limit <= 0 {
            return Ok(claimed);
        }

        for _ in 0..limit {
            let row = sqlx::query_as::<_, PushNotification>(
                r#"
                UPDATE push_notifications
                SET claimed_at = ?, updated_at = ?
                WHERE id = (
                    SELECT id FROM push_notifications
                    WHERE status = 'PENDING'
                      AND (
                          (claimed_at IS NULL AND scheduled_at IS NOT NULL AND scheduled_at <= ?)
                          OR claimed_at <= ?
                      )
                    ORDER BY COALESCE(scheduled_at, created_at) ASC
                    LIMIT 1
                )
                RETURNING
                    id,
                    subscription_id,
                    title,
                    body,
                    data,
                    scheduled_at,
                    claimed_at,
                    sent_at,
                    delivered_at,
                    status,
                    error_message,
                    created_at,
                    updated_at
                "#,
            )
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(stale_before)
            .fetch_optional(pool)
            .await
            .map_err(AppError::Database)?;

            match row {
                Some(record) => claimed.push(record),
                None => break,
            }
        }

        Ok(claimed)
    }
}
