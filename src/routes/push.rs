use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{PushNotification, PushNotificationRepository, PushSubscription, WalletMemberRepository};
use crate::error::{AppError, AppResult};
use crate::routes::auth::AuthUser;
use crate::services::fanout::{FanoutEngine, FanoutResult, NotificationContent};
use crate::services::registry::{RegisterSubscription, SubscriptionRegistry};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/subscriptions",
            post(register_subscription)
                .get(list_subscriptions)
                .delete(unsubscribe_by_endpoint),
        )
        .route(
            "/subscriptions/:id",
            axum::routing::delete(remove_subscription),
        )
        .route(
            "/subscriptions/:id/notifications",
            get(list_subscription_notifications),
        )
        .route("/subscriptions/:id/send", post(send_to_subscription))
        .route("/send", post(send_to_wallet))
        .route("/test", post(send_test))
}

pub fn public_router() -> Router<Arc<AppState>> {
    Router::new().route("/vapid-public-key", get(vapid_public_key))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VapidKeyResponse {
    pub public_key: String,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: Option<String>,
    pub auth: Option<String>,
}

/// Accepts both the service's field names and the shape produced by the
/// browser's `PushSubscription.toJSON()`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSubscriptionRequest {
    pub endpoint: Option<String>,
    #[serde(alias = "p256dh")]
    pub encryption_key: Option<String>,
    #[serde(alias = "auth")]
    pub auth_secret: Option<String>,
    #[serde(alias = "userAgent")]
    pub client_descriptor: Option<String>,
    pub keys: Option<SubscriptionKeys>,
}

impl RegisterSubscriptionRequest {
    fn into_registration(self, header_user_agent: Option<String>) -> AppResult<RegisterSubscription> {
        let (nested_key, nested_auth) = match self.keys {
            Some(keys) => (keys.p256dh, keys.auth),
            None => (None, None),
        };

        let encryption_key = self
            .encryption_key
            .or(nested_key)
            .ok_or_else(|| AppError::Validation("encryptionKey is required".to_string()))?;
        let auth_secret = self
            .auth_secret
            .or(nested_auth)
            .ok_or_else(|| AppError::Validation("authSecret is required".to_string()))?;

        Ok(RegisterSubscription {
            endpoint: self.endpoint.unwrap_or_default(),
            encryption_key,
            auth_secret,
            client_descriptor: self.client_descriptor.or(header_user_agent),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EndpointQuery {
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToSubscriptionRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub data: Option<serde_json::Value>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendToWalletRequest {
    pub wallet_id: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub redirect_url: Option<String>,
    pub icon: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestNotificationRequest {
    pub title: Option<String>,
    pub message: Option<String>,
    pub redirect_url: Option<String>,
}

fn required(value: Option<String>, field: &str) -> AppResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::Validation(format!("{} is required", field)))
}

// ============================================================================
// Handlers
// ============================================================================

/// Public VAPID key used by browsers as `applicationServerKey`
async fn vapid_public_key(State(state): State<Arc<AppState>>) -> AppResult<Json<VapidKeyResponse>> {
    if state.config.vapid.public_key.is_empty() {
        return Err(AppError::ServiceUnavailable(
            "Push notifications are not configured".to_string(),
        ));
    }

    Ok(Json(VapidKeyResponse {
        public_key: state.config.vapid.public_key.clone(),
    }))
}

async fn register_subscription(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    Json(body): Json<RegisterSubscriptionRequest>,
) -> AppResult<(StatusCode, Json<PushSubscription>)> {
    let header_user_agent = headers
        .get(http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let registration = body.into_registration(header_user_agent)?;
    let subscription = SubscriptionRegistry::new(&state.db)
        .register(&user.user_id, registration)
        .await?;

    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<PushSubscription>>> {
    let subscriptions = SubscriptionRegistry::new(&state.db)
        .list_by_user(&user.user_id)
        .await?;
    Ok(Json(subscriptions))
}

/// Browser-side `unsubscribe()` hands back the endpoint, not our id.
async fn unsubscribe_by_endpoint(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<EndpointQuery>,
) -> AppResult<Json<MessageResponse>> {
    let endpoint = query
        .endpoint
        .filter(|e| !e.is_empty())
        .ok_or_else(|| AppError::BadRequest("endpoint query parameter is required".to_string()))?;

    SubscriptionRegistry::new(&state.db)
        .remove_owned_by_endpoint(&endpoint, &user.user_id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Subscription removed".to_string(),
    }))
}

async fn remove_subscription(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    SubscriptionRegistry::new(&state.db)
        .remove(&id, &user.user_id)
        .await?;

    Ok(Json(MessageResponse {
        message: "Subscription removed".to_string(),
    }))
}

async fn list_subscription_notifications(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<PushNotification>>> {
    let subscription = SubscriptionRegistry::new(&state.db)
        .get(&id, &user.user_id)
        .await?;
    let records =
        PushNotificationRepository::find_by_subscription_id(&state.db, &subscription.id).await?;
    Ok(Json(records))
}

async fn send_to_subscription(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SendToSubscriptionRequest>,
) -> AppResult<Json<PushNotification>> {
    let title = required(body.title, "title")?;
    let text = required(body.body, "body")?;

    let subscription = SubscriptionRegistry::new(&state.db)
        .get(&id, &user.user_id)
        .await?;

    let record = FanoutEngine::new(&state)
        .send_to_subscription(
            &subscription.id,
            &title,
            &text,
            body.data,
            body.scheduled_at.map(|at| at.naive_utc()),
        )
        .await?;

    Ok(Json(record))
}

/// Fan a message out to every device of every member of a wallet the caller
/// belongs to. Always 200 with counts once the wallet is resolved.
async fn send_to_wallet(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<SendToWalletRequest>,
) -> AppResult<Json<FanoutResult>> {
    let wallet_id = required(body.wallet_id, "walletId")?;
    let message = required(body.message, "message")?;

    if !WalletMemberRepository::is_member(&state.db, &wallet_id, &user.user_id).await? {
        return Err(AppError::Forbidden);
    }

    let result = FanoutEngine::new(&state)
        .send_to_wallet(
            &wallet_id,
            NotificationContent {
                title: body.title,
                body: message,
                redirect_url: body.redirect_url,
                icon: body.icon,
                ..Default::default()
            },
        )
        .await?;

    Ok(Json(result))
}

async fn send_test(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    body: Option<Json<TestNotificationRequest>>,
) -> AppResult<Json<FanoutResult>> {
    let Json(body) = body.unwrap_or_default();

    let content = NotificationContent {
        title: body.title,
        body: body.message.unwrap_or_default(),
        redirect_url: body.redirect_url,
        ..Default::default()
    };

    let result = FanoutEngine::new(&state)
        .send_test_to_user(&user.user_id, content)
        .await?;

    Ok(Json(result))
}
