use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Delivery lifecycle of a single notification record.
///
/// `Pending -> Sent -> Delivered` or `Pending -> Failed`. `Delivered` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Sent => "SENT",
            NotificationStatus::Delivered => "DELIVERED",
            NotificationStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(NotificationStatus::Pending),
            "SENT" => Ok(NotificationStatus::Sent),
            "DELIVERED" => Ok(NotificationStatus::Delivered),
            "FAILED" => Ok(NotificationStatus::Failed),
            other => Err(format!("unknown notification status: {}", other)),
        }
    }
}

/// One delivery attempt of a notification to one subscription.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub id: String,
    pub subscription_id: String,
    pub title: String,
    pub body: String,
    /// Structured data handed to the service worker (at least `url`).
    pub data: Json<serde_json::Value>,
    pub scheduled_at: Option<NaiveDateTime>,
    /// Set once a dispatcher owns delivery of this record.
    #[serde(skip)]
    pub claimed_at: Option<NaiveDateTime>,
    pub sent_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePushNotification {
    pub subscription_id: String,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub scheduled_at: Option<NaiveDateTime>,
}
