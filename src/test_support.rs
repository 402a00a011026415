//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio::sync::Barrier;

use crate::config::Config;
use crate::db::{
    CreatePushSubscription, PushSubscription, PushSubscriptionRepository, WalletMemberRepository,
};
use crate::services::delivery::{DeliveryOutcome, PushDelivery, PushPayload};
use crate::AppState;

pub const TEST_JWT_SECRET: &str = "test-secret";

/// Fresh in-memory database with migrations applied.
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn test_p256dh(seed: u8) -> String {
    let mut key = [seed; 65];
    key[0] = 0x04;
    URL_SAFE_NO_PAD.encode(key)
}

pub fn test_auth(seed: u8) -> String {
    URL_SAFE_NO_PAD.encode([seed; 16])
}

pub fn subscription_input(endpoint: &str, seed: u8) -> CreatePushSubscription {
    CreatePushSubscription {
        endpoint: endpoint.to_string(),
        p256dh: test_p256dh(seed),
        auth: test_auth(seed),
        user_agent: Some("test-agent".to_string()),
    }
}

pub async fn seed_subscription(pool: &SqlitePool, user_id: &str, endpoint: &str) -> PushSubscription {
    PushSubscriptionRepository::upsert(pool, user_id, subscription_input(endpoint, 1))
        .await
        .unwrap()
}

pub async fn seed_wallet_member(pool: &SqlitePool, wallet_id: &str, user_id: &str) {
    WalletMemberRepository::add_member(pool, wallet_id, user_id)
        .await
        .unwrap();
}

/// Scripted push service. Endpoints without a scripted outcome succeed.
#[derive(Default)]
pub struct FakeDelivery {
    responses: HashMap<String, DeliveryOutcome>,
    barrier: Option<Arc<Barrier>>,
    calls: Mutex<Vec<(String, PushPayload)>>,
}

impl FakeDelivery {
    pub fn respond(mut self, endpoint: &str, outcome: DeliveryOutcome) -> Self {
        self.responses.insert(endpoint.to_string(), outcome);
        self
    }

    /// Block every delivery until `n` deliveries are in flight.
    pub fn with_barrier(mut self, n: usize) -> Self {
        self.barrier = Some(Arc::new(Barrier::new(n)));
        self
    }

    pub fn calls(&self) -> Vec<(String, PushPayload)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushDelivery for FakeDelivery {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> DeliveryOutcome {
        self.calls
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), payload.clone()));

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }

        self.responses
            .get(&subscription.endpoint)
            .cloned()
            .unwrap_or(DeliveryOutcome::Success(201))
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.jwt.secret = TEST_JWT_SECRET.to_string();
    config.vapid.public_key = "BPublicKeyForTests".to_string();
    config
}

pub async fn test_state(fake: FakeDelivery) -> (Arc<AppState>, Arc<FakeDelivery>) {
    let fake = Arc::new(fake);
    let state = Arc::new(AppState {
        db: test_pool().await,
        config: test_config(),
        delivery: fake.clone(),
    });
    (state, fake)
}

/// `Authorization` header value for `user_id`.
pub fn bearer(user_id: &str) -> String {
    let claims = crate::routes::auth::Claims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        iat: Some(chrono::Utc::now().timestamp() as usize),
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {}", token)
}
