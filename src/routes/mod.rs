pub mod auth;
pub mod health;
pub mod notifications;
pub mod push;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Routes that require a bearer token.
pub fn authenticated_router() -> Router<Arc<AppState>> {
    push::router().merge(notifications::router())
}

/// Unauthenticated routes (VAPID key, delivery acknowledgment). `main` wraps
/// these in the per-IP rate limiter.
pub fn public_router() -> Router<Arc<AppState>> {
    push::public_router().merge(notifications::public_router())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NotificationStatus, PushNotificationRepository, PushSubscriptionRepository};
    use crate::services::delivery::DeliveryOutcome;
    use crate::services::fanout::FanoutEngine;
    use crate::test_support::{
        bearer, seed_subscription, seed_wallet_member, test_auth, test_p256dh, test_state,
        FakeDelivery,
    };
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", axum::routing::get(health::health_check))
            .nest(
                "/api/push",
                authenticated_router().merge(public_router()),
            )
            .with_state(state)
    }

    async fn call(
        app: Router,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(http::header::AUTHORIZATION, bearer(user));
        }
        let req = match body {
            Some(json) => req
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_database() {
        let (state, _) = test_state(FakeDelivery::default()).await;
        let (status, body) = call(app(state), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], "ok");
    }

    #[tokio::test]
    async fn vapid_key_is_public() {
        let (state, _) = test_state(FakeDelivery::default()).await;
        let (status, body) = call(
            app(state.clone()),
            Method::GET,
            "/api/push/vapid-public-key",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["publicKey"], state.config.vapid.public_key.as_str());
    }

    #[tokio::test]
    async fn subscription_routes_require_a_token() {
        let (state, _) = test_state(FakeDelivery::default()).await;
        let (status, body) =
            call(app(state), Method::GET, "/api/push/subscriptions", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn register_accepts_browser_shape_and_upserts() {
        let (state, _) = test_state(FakeDelivery::default()).await;

        let browser_json = serde_json::json!({
            "endpoint": "https://fcm.googleapis.com/fcm/send/abc",
            "keys": { "p256dh": test_p256dh(1), "auth": test_auth(1) }
        });
        let (status, first) = call(
            app(state.clone()),
            Method::POST,
            "/api/push/subscriptions",
            Some("alice"),
            Some(browser_json),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["userId"], "alice");

        let service_json = serde_json::json!({
            "endpoint": "https://fcm.googleapis.com/fcm/send/abc",
            "encryptionKey": test_p256dh(2),
            "authSecret": test_auth(2),
            "clientDescriptor": "Firefox"
        });
        let (status, second) = call(
            app(state.clone()),
            Method::POST,
            "/api/push/subscriptions",
            Some("alice"),
            Some(service_json),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["id"], first["id"]);
        assert_eq!(second["userAgent"], "Firefox");

        let (_, list) = call(
            app(state),
            Method::GET,
            "/api/push/subscriptions",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_rejects_malformed_payload() {
        let (state, _) = test_state(FakeDelivery::default()).await;
        let (status, body) = call(
            app(state),
            Method::POST,
            "/api/push/subscriptions",
            Some("alice"),
            Some(serde_json::json!({ "endpoint": "https://push.example.com/a" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn deleting_someone_elses_subscription_is_forbidden() {
        let (state, _) = test_state(FakeDelivery::default()).await;
        let sub = seed_subscription(&state.db, "alice", "https://push.example.com/a").await;

        let (status, _) = call(
            app(state.clone()),
            Method::DELETE,
            &format!("/api/push/subscriptions/{}", sub.id),
            Some("bob"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            app(state.clone()),
            Method::DELETE,
            "/api/push/subscriptions/unknown",
            Some("bob"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(
            app(state.clone()),
            Method::DELETE,
            &format!("/api/push/subscriptions/{}", sub.id),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Subscription removed");
        assert!(PushSubscriptionRepository::find_by_id(&state.db, &sub.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unsubscribe_by_endpoint_query() {
        let (state, _) = test_state(FakeDelivery::default()).await;
        seed_subscription(&state.db, "alice", "https://push.example.com/a").await;

        let (status, _) = call(
            app(state.clone()),
            Method::DELETE,
            "/api/push/subscriptions?endpoint=https%3A%2F%2Fpush.example.com%2Fa",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(
            PushSubscriptionRepository::find_by_endpoint(&state.db, "https://push.example.com/a")
                .await
                .unwrap()
                .is_none()
        );

        let (status, _) = call(
            app(state),
            Method::DELETE,
            "/api/push/subscriptions",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wallet_send_requires_membership_and_reports_counts() {
        let fake = FakeDelivery::default()
            .respond("https://push.example.com/b", DeliveryOutcome::PermanentFailure(410));
        let (state, _) = test_state(fake).await;
        seed_wallet_member(&state.db, "w1", "alice").await;
        seed_wallet_member(&state.db, "w1", "bob").await;
        seed_subscription(&state.db, "alice", "https://push.example.com/a").await;
        seed_subscription(&state.db, "bob", "https://push.example.com/b").await;

        let body = serde_json::json!({ "walletId": "w1", "message": "New debit: 12.50" });

        let (status, _) = call(
            app(state.clone()),
            Method::POST,
            "/api/push/send",
            Some("mallory"),
            Some(body.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, result) = call(
            app(state),
            Method::POST,
            "/api/push/send",
            Some("alice"),
            Some(body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["total"], 2);
        assert_eq!(result["success"], 1);
        assert_eq!(result["failed"], 1);
        assert_eq!(result["pruned"], 1);
    }

    #[tokio::test]
    async fn targeted_send_failure_is_bad_gateway_with_record() {
        let fake = FakeDelivery::default()
            .respond("https://push.example.com/a", DeliveryOutcome::PermanentFailure(410));
        let (state, _) = test_state(fake).await;
        let sub = seed_subscription(&state.db, "alice", "https://push.example.com/a").await;

        let (status, body) = call(
            app(state),
            Method::POST,
            &format!("/api/push/subscriptions/{}/send", sub.id),
            Some("alice"),
            Some(serde_json::json!({ "title": "Hi", "body": "There" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "PUSH_DELIVERY_FAILED");
        assert_eq!(body["error"]["details"]["status"], "FAILED");
    }

    #[tokio::test]
    async fn acknowledgment_flow() {
        let (state, fake) = test_state(FakeDelivery::default()).await;
        seed_wallet_member(&state.db, "w1", "alice").await;
        seed_subscription(&state.db, "alice", "https://push.example.com/a").await;

        FanoutEngine::new(&state)
            .send_to_wallet(
                "w1",
                crate::services::fanout::NotificationContent {
                    body: "Credit".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let notification_id = fake.calls()[0].1.notification_id.clone();
        let uri = format!("/api/push/notifications/{}/delivered", notification_id);

        let (status, first) = call(app(state.clone()), Method::PATCH, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["status"], "DELIVERED");

        let (status, second) = call(app(state.clone()), Method::PATCH, &uri, None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["deliveredAt"], first["deliveredAt"]);

        let (status, _) = call(
            app(state.clone()),
            Method::PATCH,
            "/api/push/notifications/unknown/delivered",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, stats) = call(
            app(state),
            Method::GET,
            "/api/push/notifications/stats",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(stats["delivered"], 1);
        assert_eq!(stats["total"], 1);
    }

    #[tokio::test]
    async fn history_is_paginated_and_filtered() {
        let (state, _) = test_state(FakeDelivery::default()).await;
        let sub = seed_subscription(&state.db, "alice", "https://push.example.com/a").await;
        let engine = FanoutEngine::new(&state);
        for i in 0..3 {
            engine
                .send_to_subscription(&sub.id, "Title", &format!("Body {}", i), None, None)
                .await
                .unwrap();
        }
        let first = PushNotificationRepository::find_by_subscription_id(&state.db, &sub.id)
            .await
            .unwrap();
        PushNotificationRepository::mark_delivered(&state.db, &first[0].id)
            .await
            .unwrap();

        let (status, page) = call(
            app(state.clone()),
            Method::GET,
            "/api/push/notifications?page=1&per_page=2",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 3);
        assert_eq!(page["totalPages"], 2);
        assert_eq!(page["items"].as_array().unwrap().len(), 2);

        let (_, delivered) = call(
            app(state.clone()),
            Method::GET,
            "/api/push/notifications?status=delivered",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(delivered["total"], 1);
        assert_eq!(
            delivered["items"][0]["status"],
            NotificationStatus::Delivered.as_str()
        );

        let (status, _) = call(
            app(state.clone()),
            Method::GET,
            "/api/push/notifications?status=bogus",
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, beyond) = call(
            app(state.clone()),
            Method::GET,
            &format!("/api/push/notifications?page={}&per_page=100", i64::MAX),
            Some("alice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(beyond["total"], 3);
        assert!(beyond["items"].as_array().unwrap().is_empty());

        let (status, _) = call(
            app(state),
            Method::GET,
            &format!("/api/push/subscriptions/{}/notifications", sub.id),
            Some("bob"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_notification_goes_to_own_devices() {
        let (state, fake) = test_state(FakeDelivery::default()).await;
        seed_subscription(&state.db, "alice", "https://push.example.com/a").await;

        let (status, result) = call(
            app(state),
            Method::POST,
            "/api/push/test",
            Some("alice"),
            Some(serde_json::json!({ "message": "Ping" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["success"], 1);
        assert_eq!(fake.calls()[0].1.body, "Ping");
    }
}
