use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use sqlx::SqlitePool;

use crate::db::{CreatePushSubscription, PushSubscription, PushSubscriptionRepository};
use crate::error::{AppError, AppResult};

/// Uncompressed P-256 point: 0x04 || X || Y.
const P256DH_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const MAX_DESCRIPTOR_LEN: usize = 512;

/// A registration request as received from a browser.
#[derive(Debug, Clone)]
pub struct RegisterSubscription {
    pub endpoint: String,
    pub encryption_key: String,
    pub auth_secret: String,
    pub client_descriptor: Option<String>,
}

/// Owns the per-device push subscriptions.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    pool: SqlitePool,
}

impl SubscriptionRegistry {
    pub fn new(pool: &SqlitePool) -> Self {
        Self { pool: pool.clone() }
    }

    /// Create or refresh the subscription for `request.endpoint`.
    ///
    /// Re-registering an existing endpoint never fails: keys, descriptor and
    /// owner are replaced in place.
    pub async fn register(
        &self,
        user_id: &str,
        request: RegisterSubscription,
    ) -> AppResult<PushSubscription> {
        let input = validate(request)?;
        let subscription = PushSubscriptionRepository::upsert(&self.pool, user_id, input).await?;

        tracing::info!(
            "Registered push subscription {} for user {}",
            subscription.id,
            user_id
        );
        Ok(subscription)
    }

    pub async fn list_by_user(&self, user_id: &str) -> AppResult<Vec<PushSubscription>> {
        PushSubscriptionRepository::find_by_user_id(&self.pool, user_id).await
    }

    pub async fn list_by_wallet(&self, wallet_id: &str) -> AppResult<Vec<PushSubscription>> {
        PushSubscriptionRepository::find_by_wallet_id(&self.pool, wallet_id).await
    }

    /// Ownership-checked lookup.
    pub async fn get(&self, subscription_id: &str, user_id: &str) -> AppResult<PushSubscription> {
        let subscription = PushSubscriptionRepository::find_by_id(&self.pool, subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

        if subscription.user_id != user_id {
            return Err(AppError::Forbidden);
        }

        Ok(subscription)
    }

    /// User-initiated removal. Records of the subscription are removed with it.
    pub async fn remove(&self, subscription_id: &str, user_id: &str) -> AppResult<()> {
        let subscription = self.get(subscription_id, user_id).await?;
        PushSubscriptionRepository::delete(&self.pool, &subscription.id).await?;

        tracing::info!(
            "User {} removed push subscription {}",
            user_id,
            subscription.id
        );
        Ok(())
    }

    /// User-initiated removal by endpoint (browser `unsubscribe()`).
    pub async fn remove_owned_by_endpoint(&self, endpoint: &str, user_id: &str) -> AppResult<()> {
        let subscription = PushSubscriptionRepository::find_by_endpoint(&self.pool, endpoint)
            .await?
            .ok_or_else(|| AppError::NotFound("Subscription not found".to_string()))?;

        if subscription.user_id != user_id {
            return Err(AppError::Forbidden);
        }

        PushSubscriptionRepository::delete(&self.pool, &subscription.id).await?;
        Ok(())
    }

    /// System-initiated removal. No ownership check; a missing endpoint is not
    /// an error. Returns whether a row was removed.
    pub async fn remove_by_endpoint(&self, endpoint: &str) -> AppResult<bool> {
        let removed = PushSubscriptionRepository::delete_by_endpoint(&self.pool, endpoint).await?;
        Ok(removed > 0)
    }
}

fn validate(request: RegisterSubscription) -> AppResult<CreatePushSubscription> {
    let endpoint = request.endpoint.trim().to_string();
    if endpoint.is_empty() {
        return Err(AppError::Validation("endpoint is required".to_string()));
    }

    let parsed = url::Url::parse(&endpoint)
        .map_err(|_| AppError::Validation("endpoint must be an absolute URL".to_string()))?;
    if !matches!(parsed.scheme(), "https" | "http") {
        return Err(AppError::Validation(
            "endpoint must use http or https".to_string(),
        ));
    }

    let p256dh = request.encryption_key.trim().to_string();
    check_key_length(&p256dh, P256DH_LEN, "encryptionKey")?;

    let auth = request.auth_secret.trim().to_string();
    check_key_length(&auth, AUTH_SECRET_LEN, "authSecret")?;

    let user_agent = request
        .client_descriptor
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    if let Some(ref descriptor) = user_agent {
        if descriptor.chars().count() > MAX_DESCRIPTOR_LEN {
            return Err(AppError::Validation(format!(
                "clientDescriptor must be at most {} characters",
                MAX_DESCRIPTOR_LEN
            )));
        }
    }

    Ok(CreatePushSubscription {
        endpoint,
        p256dh,
        auth,
        user_agent,
    })
}

/// Browsers hand out base64url without padding; some clients send standard
/// base64. Both are accepted.
fn check_key_length(value: &str, expected: usize, field: &str) -> AppResult<()> {
    let unpadded = value.trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| STANDARD_NO_PAD.decode(unpadded))
        .map_err(|_| AppError::Validation(format!("{} is not valid base64", field)))?;

    if decoded.len() != expected {
        return Err(AppError::Validation(format!(
            "{} must decode to {} bytes, got {}",
            field,
            expected,
            decoded.len()
        )));
    }

    Ok(())
}
