use sqlx::SqlitePool;

use crate::db::PushSubscription;
use crate::error::AppResult;
use crate::services::registry::SubscriptionRegistry;

/// Removes subscriptions whose push service reported them as gone.
pub struct Pruner {
    registry: SubscriptionRegistry,
}

impl Pruner {
    pub fn new(pool: &SqlitePool) -> Self {
        Self {
            registry: SubscriptionRegistry::new(pool),
        }
    }

    /// Delete the subscription by endpoint. Safe to call more than once for the
    /// same subscription; returns whether this call removed it.
    pub async fn on_permanent_failure(&self, subscription: &PushSubscription) -> AppResult<bool> {
        let removed = self
            .registry
            .remove_by_endpoint(&subscription.endpoint)
            .await?;

        if removed {
            tracing::info!(
                "Pruned expired push subscription {} (user {})",
                subscription.id,
                subscription.user_id
            );
        } else {
            tracing::debug!(
                "Push subscription {} was already pruned",
                subscription.id
            );
        }

        Ok(removed)
    }
}
