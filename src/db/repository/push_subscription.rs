use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::{CreatePushSubscription, PushSubscription};
use crate::error::{AppError, AppResult};

pub struct PushSubscriptionRepository;

impl PushSubscriptionRepository {
    /// Insert a subscription, or refresh the existing row for the same endpoint.
    ///
    /// A single `INSERT ... ON CONFLICT(endpoint) DO UPDATE` so two concurrent
    /// registrations of one endpoint cannot produce a duplicate or a unique
    /// violation. On conflict the owner, key material and user agent are
    /// replaced; `id` and `created_at` are kept. When the owner changes, the
    /// previous owner's notification records for the endpoint are deleted in
    /// the same transaction.
    pub async fn upsert(
        pool: &SqlitePool,
        user_id: &str,
        subscription: CreatePushSubscription,
    ) -> AppResult<PushSubscription> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().naive_utc();

        let mut tx = pool.begin().await.map_err(AppError::Database)?;

        // History belongs to the user it was sent to, not to the device.
        sqlx::query(
            "DELETE FROM push_notifications WHERE subscription_id IN \
             (SELECT id FROM push_subscriptions WHERE endpoint = ? AND user_id <> ?)",
        )
        .bind(&subscription.endpoint)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        let row = sqlx::query_as::<_, PushSubscription>(
            r#"
            INSERT INTO push_subscriptions (
                id,
                user_id,
                endpoint,
                p256dh,
                auth,
                user_agent,
                created_at,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(endpoint) DO UPDATE SET
                user_id = excluded.user_id,
                p256dh = excluded.p256dh,
                auth = excluded.auth,
                user_agent = excluded.user_agent,
                updated_at = excluded.updated_at
            RETURNING
                id,
                user_id,
                endpoint,
                p256dh,
                auth,
                user_agent,
                created_at,
                updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(subscription.endpoint)
        .bind(subscription.p256dh)
        .bind(subscription.auth)
        .bind(subscription.user_agent)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::Database)?;

        tx.commit().await.map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<PushSubscription>> {
        sqlx::query_as::<_, PushSubscription>(
            r#"
            SELECT id, user_id, endpoint, p256dh, auth, user_agent, created_at, updated_at
            FROM push_subscriptions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    pub async fn find_by_endpoint(
        pool: &SqlitePool,
        endpoint: &str,
    ) -> AppResult<Option<PushSubscription>> {
        sqlx::query_as::<_, PushSubscription>(
            r#"
            SELECT id, user_id, endpoint, p256dh, auth, user_agent, created_at, updated_at
            FROM push_subscriptions
            WHERE endpoint = ?
            "#,
        )
        .bind(endpoint)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// List all subscriptions owned by a user, newest first.
    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: &str,
    ) -> AppResult<Vec<PushSubscription>> {
        sqlx::query_as::<_, PushSubscription>(
            r#"
            SELECT id, user_id, endpoint, p256dh, auth, user_agent, created_at, updated_at
            FROM push_subscriptions
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Every subscription of every member of a wallet.
    pub async fn find_by_wallet_id(
        pool: &SqlitePool,
        wallet_id: &str,
    ) -> AppResult<Vec<PushSubscription>> {
        sqlx::query_as::<_, PushSubscription>(
            r#"
            SELECT
                s.id,
                s.user_id,
                s.endpoint,
                s.p256dh,
                s.auth,
                s.user_agent,
                s.created_at,
                s.updated_at
            FROM push_subscriptions s
            JOIN user_wallets uw ON uw.user_id = s.user_id
            WHERE uw.wallet_id = ?
            ORDER BY s.user_id, s.created_at
            "#,
        )
        .bind(wallet_id)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Delete a subscription by id. Returns the number of rows removed.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// Delete a subscription by endpoint. Returns the number of rows removed
    /// (0 when it was already gone).
    pub async fn delete_by_endpoint(pool: &SqlitePool, endpoint: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM push_subscriptions WHERE endpoint = ?")
            .bind(endpoint)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_wallet_member, subscription_input, test_pool};

    #[tokio::test]
    async fn upsert_same_endpoint_keeps_one_row_with_latest_keys() {
        let pool = test_pool().await;

        let first = PushSubscriptionRepository::upsert(
            &pool,
            "user-1",
            subscription_input("https://push.example.com/e1", 1),
        )
        .await
        .unwrap();
        let second = PushSubscriptionRepository::upsert(
            &pool,
            "user-1",
            subscription_input("https://push.example.com/e1", 2),
        )
        .await
        .unwrap();

        assert_eq!(first.id, second.id);
        assert_ne!(first.p256dh, second.p256dh);
        assert_eq!(first.created_at, second.created_at);

        let all = PushSubscriptionRepository::find_by_user_id(&pool, "user-1")
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].p256dh, second.p256dh);
        assert_eq!(all[0].auth, second.auth);
    }

    #[tokio::test]
    async fn find_by_wallet_id_spans_every_member() {
        let pool = test_pool().await;
        seed_wallet_member(&pool, "wallet-1", "alice").await;
        seed_wallet_member(&pool, "wallet-1", "bob").await;
        seed_wallet_member(&pool, "wallet-2", "carol").await;

        for (user, endpoint) in [
            ("alice", "https://push.example.com/a1"),
            ("alice", "https://push.example.com/a2"),
            ("bob", "https://push.example.com/b1"),
            ("carol", "https://push.example.com/c1"),
        ] {
            PushSubscriptionRepository::upsert(&pool, user, subscription_input(endpoint, 1))
                .await
                .unwrap();
        }

        let subs = PushSubscriptionRepository::find_by_wallet_id(&pool, "wallet-1")
            .await
            .unwrap();
        let mut endpoints: Vec<_> = subs.iter().map(|s| s.endpoint.as_str()).collect();
        endpoints.sort();
        assert_eq!(
            endpoints,
            vec![
                "https://push.example.com/a1",
                "https://push.example.com/a2",
                "https://push.example.com/b1",
            ]
        );

        let none = PushSubscriptionRepository::find_by_wallet_id(&pool, "wallet-unknown")
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_by_endpoint_is_a_no_op_when_missing() {
        let pool = test_pool().await;
        PushSubscriptionRepository::upsert(
            &pool,
            "user-1",
            subscription_input("https://push.example.com/gone", 1),
        )
        .await
        .unwrap();

        let removed =
            PushSubscriptionRepository::delete_by_endpoint(&pool, "https://push.example.com/gone")
                .await
                .unwrap();
        assert_eq!(removed, 1);

        let removed_again =
            PushSubscriptionRepository::delete_by_endpoint(&pool, "https://push.example.com/gone")
                .await
                .unwrap();
        assert_eq!(removed_again, 0);
    }

    #[tokio::test]
    async fn reregistration_by_another_user_drops_previous_history() {
        let pool = test_pool().await;
        let endpoint = "https://push.example.com/shared-device";

        let alice = PushSubscriptionRepository::upsert(&pool, "alice", subscription_input(endpoint, 1))
            .await
            .unwrap();
        let record = crate::db::PushNotificationRepository::create(
            &pool,
            crate::db::CreatePushNotification {
                subscription_id: alice.id.clone(),
                title: "Cardeneta App".to_string(),
                body: "Alice's debit".to_string(),
                data: None,
                scheduled_at: None,
            },
        )
        .await
        .unwrap();

        // Same owner refreshing keys keeps the history.
        PushSubscriptionRepository::upsert(&pool, "alice", subscription_input(endpoint, 2))
            .await
            .unwrap();
        assert!(crate::db::PushNotificationRepository::find_by_id(&pool, &record.id)
            .await
            .unwrap()
            .is_some());

        let bob = PushSubscriptionRepository::upsert(&pool, "bob", subscription_input(endpoint, 3))
            .await
            .unwrap();
        assert_eq!(bob.id, alice.id);
        assert_eq!(bob.user_id, "bob");

        assert!(crate::db::PushNotificationRepository::find_by_id(&pool, &record.id)
            .await
            .unwrap()
            .is_none());
        let bobs_history = crate::db::PushNotificationRepository::find_by_user_id_with_filters(
            &pool,
            "bob",
            &Default::default(),
        )
        .await
        .unwrap();
        assert!(bobs_history.is_empty());
    }
}
