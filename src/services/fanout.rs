//! Fanout of one logical notification to many push subscriptions.

use std::sync::Arc;

use chrono::NaiveDateTime;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::PushConfig;
use crate::db::{
    CreatePushNotification, PushNotification, PushNotificationRepository, PushSubscription,
    PushSubscriptionRepository,
};
use crate::error::{AppError, AppResult};
use crate::services::delivery::{DeliveryOutcome, PushDelivery, PushPayload};
use crate::services::pruner::Pruner;
use crate::services::registry::SubscriptionRegistry;
use crate::AppState;

/// What to show on the device. Missing fields fall back to the configured
/// defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationContent {
    pub title: Option<String>,
    pub body: String,
    /// Click-through target, stored as `data.url`.
    pub redirect_url: Option<String>,
    pub icon: Option<String>,
    pub badge: Option<String>,
    /// Extra fields merged into the payload's `data` object.
    pub data: Option<serde_json::Value>,
}

/// Aggregate counts of one fanout. `success + failed == total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutResult {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    /// Subscriptions removed because their push service reported them gone.
    pub pruned: usize,
}

/// Per-subscription result inside a fanout.
enum Attempt {
    Sent,
    Failed { pruned: bool },
}

struct Prepared {
    title: String,
    body: String,
    icon: String,
    badge: String,
    data: serde_json::Value,
}

pub struct FanoutEngine {
    pool: SqlitePool,
    delivery: Arc<dyn PushDelivery>,
    registry: SubscriptionRegistry,
    pruner: Pruner,
    push: PushConfig,
}

impl FanoutEngine {
    pub fn new(state: &Arc<AppState>) -> Self {
        Self {
            pool: state.db.clone(),
            delivery: state.delivery.clone(),
            registry: SubscriptionRegistry::new(&state.db),
            pruner: Pruner::new(&state.db),
            push: state.config.push.clone(),
        }
    }

    /// Deliver `content` to every subscription of every member of the wallet.
    ///
    /// Attempts run concurrently and are isolated from each other: delivery and
    /// persistence failures are counted, never returned. Only the initial
    /// subscription lookup can fail the call.
    pub async fn send_to_wallet(
        &self,
        wallet_id: &str,
        content: NotificationContent,
    ) -> AppResult<FanoutResult> {
        let subscriptions = self.registry.list_by_wallet(wallet_id).await?;
        if subscriptions.is_empty() {
            tracing::debug!("Wallet {} has no push subscriptions", wallet_id);
            return Ok(FanoutResult::default());
        }

        let result = self.fan_out(&subscriptions, content).await;
        tracing::info!(
            "Wallet {} fanout finished: total={} success={} failed={} pruned={}",
            wallet_id,
            result.total,
            result.success,
            result.failed,
            result.pruned
        );
        Ok(result)
    }

    /// Send a test notification to all of the user's own devices. An empty
    /// body is replaced with a generic test message.
    pub async fn send_test_to_user(
        &self,
        user_id: &str,
        mut content: NotificationContent,
    ) -> AppResult<FanoutResult> {
        let subscriptions = self.registry.list_by_user(user_id).await?;
        if subscriptions.is_empty() {
            return Ok(FanoutResult::default());
        }

        if content.body.trim().is_empty() {
            content.body = "This is a test notification".to_string();
        }

        Ok(self.fan_out(&subscriptions, content).await)
    }

    async fn fan_out(
        &self,
        subscriptions: &[PushSubscription],
        content: NotificationContent,
    ) -> FanoutResult {
        let prepared = self.prepare(content);
        let attempts = subscriptions
            .iter()
            .map(|subscription| self.attempt(subscription, &prepared));
        let outcomes = join_all(attempts).await;

        let mut result = FanoutResult {
            total: subscriptions.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Attempt::Sent => result.success += 1,
                Attempt::Failed { pruned } => {
                    result.failed += 1;
                    if pruned {
                        result.pruned += 1;
                    }
                }
            }
        }
        result
    }

    fn prepare(&self, content: NotificationContent) -> Prepared {
        let data = build_data(content.data, content.redirect_url.as_deref());

        Prepared {
            title: content
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| self.push.default_title.clone()),
            body: content.body,
            icon: content
                .icon
                .unwrap_or_else(|| self.push.default_icon.clone()),
            badge: content
                .badge
                .unwrap_or_else(|| self.push.default_badge.clone()),
            data,
        }
    }

    async fn attempt(&self, subscription: &PushSubscription, prepared: &Prepared) -> Attempt {
        let record = match PushNotificationRepository::create(
            &self.pool,
            CreatePushNotification {
                subscription_id: subscription.id.clone(),
                title: prepared.title.clone(),
                body: prepared.body.clone(),
                data: Some(prepared.data.clone()),
                scheduled_at: None,
            },
        )
        .await
        {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    "Failed to create notification record for subscription {}: {}",
                    subscription.id,
                    e
                );
                return Attempt::Failed { pruned: false };
            }
        };

        let payload = PushPayload::for_record(&record, &prepared.icon, &prepared.badge);
        let outcome = self.delivery.deliver(subscription, &payload).await;

        match self.settle(subscription, &record, &outcome).await {
            Ok(_) if outcome.is_success() => Attempt::Sent,
            Ok((_, pruned)) => {
                tracing::warn!(
                    "Push to subscription {} failed: {}",
                    subscription.id,
                    outcome.describe()
                );
                Attempt::Failed { pruned }
            }
            Err(e) => {
                tracing::error!(
                    "Failed to record delivery outcome for notification {}: {}",
                    record.id,
                    e
                );
                Attempt::Failed { pruned: false }
            }
        }
    }

    /// Persist the outcome of a delivery attempt.
    ///
    /// The record is marked FAILED before a permanent failure prunes the
    /// subscription, so the returned record reflects the failure even though
    /// the cascade removes the row. Returns the record and whether the
    /// subscription was pruned.
    async fn settle(
        &self,
        subscription: &PushSubscription,
        record: &PushNotification,
        outcome: &DeliveryOutcome,
    ) -> AppResult<(PushNotification, bool)> {
        match outcome {
            DeliveryOutcome::Success(_) => {
                let sent = PushNotificationRepository::mark_sent(&self.pool, &record.id).await?;
                Ok((sent, false))
            }
            DeliveryOutcome::PermanentFailure(_) => {
                let failed =
                    PushNotificationRepository::mark_failed(&self.pool, &record.id, &outcome.describe())
                        .await?;
                let pruned = self.pruner.on_permanent_failure(subscription).await?;
                Ok((failed, pruned))
            }
            DeliveryOutcome::TransientFailure { .. } => {
                let failed =
                    PushNotificationRepository::mark_failed(&self.pool, &record.id, &outcome.describe())
                        .await?;
                Ok((failed, false))
            }
        }
    }

    /// Create a record for one subscription and deliver it now, or leave it
    /// for the scheduled dispatcher when `scheduled_at` is in the future.
    ///
    /// Unlike the wallet fanout, a failed delivery is returned to the caller as
    /// `AppError::Delivery` carrying the FAILED record.
    pub async fn send_to_subscription(
        &self,
        subscription_id: &str,
        title: &str,
        body: &str,
        data: Option<serde_json::Value>,
        scheduled_at: Option<NaiveDateTime>,
    ) -> AppResult<PushNotification> {
        let subscription = PushSubscriptionRepository::find_by_id(&self.pool, subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

        let record = PushNotificationRepository::create(
            &self.pool,
            CreatePushNotification {
                subscription_id: subscription.id.clone(),
                title: title.to_string(),
                body: body.to_string(),
                data: Some(build_data(data, None)),
                scheduled_at,
            },
        )
        .await?;

        if record.claimed_at.is_none() {
            tracing::info!(
                "Notification {} scheduled for {:?}",
                record.id,
                record.scheduled_at
            );
            return Ok(record);
        }

        self.deliver_record(&subscription, record).await
    }

    /// Deliver a record previously claimed by the scheduled dispatcher.
    pub async fn deliver_scheduled(&self, record: PushNotification) -> AppResult<PushNotification> {
        let subscription =
            PushSubscriptionRepository::find_by_id(&self.pool, &record.subscription_id)
                .await?
                .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

        self.deliver_record(&subscription, record).await
    }

    async fn deliver_record(
        &self,
        subscription: &PushSubscription,
        record: PushNotification,
    ) -> AppResult<PushNotification> {
        let payload = PushPayload::for_record(
            &record,
            &self.push.default_icon,
            &self.push.default_badge,
        );
        let outcome = self.delivery.deliver(subscription, &payload).await;
        let (settled, _) = self.settle(subscription, &record, &outcome).await?;

        if outcome.is_success() {
            Ok(settled)
        } else {
            Err(AppError::Delivery {
                record: Box::new(settled),
                reason: outcome.describe(),
            })
        }
    }
}

/// `data` object for the payload: custom fields plus a `url` (default `/`).
fn build_data(custom: Option<serde_json::Value>, redirect_url: Option<&str>) -> serde_json::Value {
    let mut data = match custom {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    if let Some(url) = redirect_url.filter(|u| !u.is_empty()) {
        data.insert("url".to_string(), serde_json::Value::String(url.to_string()));
    } else if !matches!(data.get("url"), Some(serde_json::Value::String(_))) {
        data.insert("url".to_string(), serde_json::Value::String("/".to_string()));
    }

    serde_json::Value::Object(data)
}

/// Fire-and-forget fanout for ledger mutations.
///
/// The returned handle may be dropped; the outcome, including a failed wallet
/// lookup, is only logged and never reaches the caller.
#[allow(dead_code)]
pub fn notify_wallet_detached(
    state: Arc<AppState>,
    wallet_id: String,
    content: NotificationContent,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let engine = FanoutEngine::new(&state);
        match engine.send_to_wallet(&wallet_id, content).await {
            Ok(result) => tracing::debug!(
                "Detached fanout for wallet {} delivered {}/{}",
                wallet_id,
                result.success,
                result.total
            ),
            Err(e) => tracing::error!("Detached fanout for wallet {} failed: {}", wallet_id, e),
        }
    })
}
