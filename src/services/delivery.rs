//! Web Push delivery client.
//!
//! Encrypts a payload for one subscription (RFC 8291, `aes128gcm`), signs the
//! request with the server's VAPID key (RFC 8292) and POSTs it to the
//! subscription's push service (RFC 8030). The provider's answer is reduced to
//! a [`DeliveryOutcome`]; this module never touches the database.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use web_push::{
    ContentEncoding, PartialVapidSignatureBuilder, SubscriptionInfo, VapidSignatureBuilder,
    WebPushMessage, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::config::{PushConfig, VapidConfig};
use crate::db::{PushNotification, PushSubscription};
use crate::error::{AppError, AppResult};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The push service accepted the message (2xx).
    Success(u16),
    /// The endpoint no longer exists (404/410). The subscription should be
    /// removed.
    PermanentFailure(u16),
    /// Anything else: auth mismatch, throttling, 5xx, timeout, network or
    /// encryption errors. The subscription is kept.
    TransientFailure {
        status: Option<u16>,
        message: String,
    },
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success(_))
    }

    /// Short human readable reason, stored as the record's error message.
    pub fn describe(&self) -> String {
        match self {
            DeliveryOutcome::Success(status) => format!("HTTP {}", status),
            DeliveryOutcome::PermanentFailure(status) => {
                format!("Subscription expired or invalid (HTTP {})", status)
            }
            DeliveryOutcome::TransientFailure {
                status: Some(status),
                message,
            } => format!("HTTP {}: {}", status, message),
            DeliveryOutcome::TransientFailure {
                status: None,
                message,
            } => message.clone(),
        }
    }
}

/// Map a push service HTTP status to an outcome.
pub fn classify_status(status: u16, body: &str) -> DeliveryOutcome {
    match status {
        200..=299 => DeliveryOutcome::Success(status),
        404 | 410 => DeliveryOutcome::PermanentFailure(status),
        _ => DeliveryOutcome::TransientFailure {
            status: Some(status),
            message: if body.is_empty() {
                "Push service rejected the message".to_string()
            } else {
                body.chars().take(200).collect()
            },
        },
    }
}

/// JSON document encrypted into the push message and read by the service
/// worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Lets the service worker acknowledge delivery.
    pub notification_id: String,
    pub data: serde_json::Value,
}

impl PushPayload {
    pub fn for_record(record: &PushNotification, icon: &str, badge: &str) -> Self {
        Self {
            title: record.title.clone(),
            body: record.body.clone(),
            icon: icon.to_string(),
            badge: badge.to_string(),
            notification_id: record.id.clone(),
            data: record.data.0.clone(),
        }
    }
}

#[async_trait]
pub trait PushDelivery: Send + Sync + 'static {
    async fn deliver(&self, subscription: &PushSubscription, payload: &PushPayload)
        -> DeliveryOutcome;
}

/// Production delivery client.
pub struct WebPushDelivery {
    http: reqwest::Client,
    signer: PartialVapidSignatureBuilder,
    subject: String,
    ttl_seconds: u32,
}

impl WebPushDelivery {
    /// Parses the VAPID private key up front so a bad key fails at startup,
    /// not on the first send.
    pub fn new(vapid: &VapidConfig, push: &PushConfig) -> AppResult<Self> {
        // Raw private scalar, URL-safe base64 without padding as emitted by
        // `web-push generate-vapid-keys`.
        let signer =
            VapidSignatureBuilder::from_base64_no_sub(&vapid.private_key, URL_SAFE_NO_PAD)
                .map_err(|e| AppError::Config(format!("Invalid VAPID private key: {}", e)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(push.timeout_seconds))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            signer,
            subject: vapid.subject.clone(),
            ttl_seconds: push.ttl_seconds,
        })
    }

    fn build_message(
        &self,
        subscription: &PushSubscription,
        content: &[u8],
    ) -> Result<WebPushMessage, web_push::WebPushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.p256dh.clone(),
            subscription.auth.clone(),
        );

        let mut signature = self.signer.clone().add_sub_info(&info);
        signature.add_claim("sub", self.subject.clone());
        let signature = signature.build()?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl_seconds);
        builder.set_payload(ContentEncoding::Aes128Gcm, content);
        builder.set_vapid_signature(signature);
        builder.build()
    }

    async fn send(&self, message: WebPushMessage) -> DeliveryOutcome {
        let mut request = self
            .http
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(payload) = message.payload {
            request = request
                .header("Content-Encoding", payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");
            for (name, value) in payload.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(payload.content);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                classify_status(status, &body)
            }
            Err(e) if e.is_timeout() => DeliveryOutcome::TransientFailure {
                status: None,
                message: "Push service request timed out".to_string(),
            },
            Err(e) => DeliveryOutcome::TransientFailure {
                status: None,
                message: format!("Push service request failed: {}", e),
            },
        }
    }
}

#[async_trait]
impl PushDelivery for WebPushDelivery {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> DeliveryOutcome {
        let content = match serde_json::to_vec(payload) {
            Ok(c) => c,
            Err(e) => {
                return DeliveryOutcome::TransientFailure {
                    status: None,
                    message: format!("Failed to serialize payload: {}", e),
                }
            }
        };

        let message = match self.build_message(subscription, &content) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    "Failed to build push message for subscription {}: {}",
                    subscription.id,
                    e
                );
                return DeliveryOutcome::TransientFailure {
                    status: None,
                    message: format!("Failed to encrypt payload: {}", e),
                };
            }
        };

        let outcome = self.send(message).await;
        tracing::debug!(
            "Push to subscription {} finished: {:?}",
            subscription.id,
            outcome
        );
        outcome
    }
}
