use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A registered Web Push endpoint for one browser/device.
///
/// `endpoint` is unique across the table; re-registering it updates the row in
/// place (key rotation, or a different user logging in on a shared device).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub id: String,
    pub user_id: String,
    pub endpoint: String,
    /// Subscriber's P-256 ECDH public key (base64url).
    pub p256dh: String,
    /// Subscriber's authentication secret (base64url).
    pub auth: String,
    pub user_agent: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Validated data for creating or refreshing a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePushSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub user_agent: Option<String>,
}
