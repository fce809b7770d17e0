//! Subscription lifecycle integration tests.
//!
//! End-to-end over HTTP: signed provider webhooks, the success-page
//! reconciliation, user cancellation and the cron sweeps. These need a running
//! PostgreSQL (`TEST_DATABASE_URL`), so they are `#[ignore]`d by default; run
//! with `cargo test -- --ignored` against infrastructure.

mod common;

use chrono::{Duration, Utc};
use common::{TestApp, TEST_CRON_SECRET};
use serde_json::{json, Value};
use uuid::Uuid;

/// Open a checkout and return `(subscription_id, provider_reference)`.
async fn open_checkout(app: &TestApp, user_id: Uuid) -> (Uuid, String) {
    let response = reqwest::Client::new()
        .post(format!("{}/api/subscriptions", app.http_address))
        .json(&json!({
            "user_id": user_id,
            "plan_type": "monthly",
            "provider": "payu"
        }))
        .send()
        .await
        .expect("Failed to open checkout");
    assert_eq!(response.status(), 201);

    let body: Value = response.json().await.unwrap();
    let subscription_id =
        Uuid::parse_str(body["subscription"]["subscription_id"].as_str().unwrap()).unwrap();
    let reference = body["reference"].as_str().unwrap().to_string();
    (subscription_id, reference)
}

/// Deliver a signed PayU confirmation webhook.
async fn post_confirmation(
    app: &TestApp,
    reference: &str,
    transaction_id: &str,
    state_pol: &str,
) -> reqwest::Response {
    let signature = app
        .payu_client()
        .confirmation_signature(reference, "45000.00", "COP", state_pol)
        .unwrap();

    reqwest::Client::new()
        .post(format!("{}/api/webhooks/payu", app.http_address))
        .header("payu-signature", signature)
        .json(&json!({
            "reference_sale": reference,
            "transaction_id": transaction_id,
            "state_pol": state_pol,
            "value": "45000.00",
            "currency": "COP"
        }))
        .send()
        .await
        .expect("Failed to deliver webhook")
}

async fn run_cleanup(app: &TestApp, secret: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/api/cron/subscription-cleanup", app.http_address))
        .bearer_auth(secret)
        .send()
        .await
        .expect("Failed to invoke cleanup")
}

#[tokio::test]
#[ignore]
async fn approved_webhook_activates_the_pending_subscription() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;
    assert_eq!(app.subscription_status(subscription_id).await, "pending");

    let response = post_confirmation(&app, &reference, "txn-1", "4").await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["received"], true);

    assert_eq!(app.subscription_status(subscription_id).await, "active");
    assert_eq!(app.profile_status(user_id).await.as_deref(), Some("premium"));
    assert_eq!(app.payment_count(user_id).await, 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn redelivered_approved_webhook_does_not_double_activate() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;

    let first = post_confirmation(&app, &reference, "txn-1", "4").await;
    assert_eq!(first.status(), 200);
    let second = post_confirmation(&app, &reference, "txn-1", "4").await;
    assert_eq!(second.status(), 200);

    assert_eq!(app.subscription_status(subscription_id).await, "active");
    // One transition, one audit row; the redelivery matched nothing to change.
    assert_eq!(app.active_subscription_count(user_id).await, 1);
    assert_eq!(app.payment_count(user_id).await, 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn declined_webhook_fails_the_pending_subscription() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;

    let response = post_confirmation(&app, &reference, "txn-1", "6").await;
    assert_eq!(response.status(), 200);

    assert_eq!(app.subscription_status(subscription_id).await, "failed");
    // A declined payment must never mint a premium profile.
    assert_ne!(app.profile_status(user_id).await.as_deref(), Some("premium"));
    assert_eq!(app.payment_count(user_id).await, 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn expired_webhook_cancels_the_pending_subscription() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;

    let response = post_confirmation(&app, &reference, "txn-1", "5").await;
    assert_eq!(response.status(), 200);

    assert_eq!(app.subscription_status(subscription_id).await, "cancelled");
    let reason = app.cancellation_reason(subscription_id).await.unwrap();
    assert!(reason.to_lowercase().contains("expired"), "reason: {}", reason);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn pending_webhook_records_payment_without_transition() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;

    let response = post_confirmation(&app, &reference, "txn-1", "7").await;
    assert_eq!(response.status(), 200);

    assert_eq!(app.subscription_status(subscription_id).await, "pending");
    assert_eq!(app.payment_count(user_id).await, 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn tampered_signature_is_rejected_before_any_write() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;

    // Signed as declined, replayed claiming approved.
    let signature = app
        .payu_client()
        .confirmation_signature(&reference, "45000.00", "COP", "6")
        .unwrap();
    let response = reqwest::Client::new()
        .post(format!("{}/api/webhooks/payu", app.http_address))
        .header("payu-signature", signature)
        .json(&json!({
            "reference_sale": reference,
            "transaction_id": "txn-1",
            "state_pol": "4",
            "value": "45000.00",
            "currency": "COP"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    assert_eq!(app.subscription_status(subscription_id).await, "pending");
    assert_eq!(app.payment_count(user_id).await, 0);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn missing_signature_header_is_rejected() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/webhooks/payu", app.http_address))
        .json(&json!({
            "reference_sale": reference,
            "transaction_id": "txn-1",
            "state_pol": "4",
            "value": "45000.00",
            "currency": "COP"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(app.subscription_status(subscription_id).await, "pending");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn status_endpoint_reflects_the_lifecycle() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();
    let client = reqwest::Client::new();
    let url = format!("{}/api/subscriptions/{}", app.http_address, user_id);

    // No history yet: free tier, free to subscribe.
    let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["subscription"], Value::Null);
    assert_eq!(body["tier"], "free");
    assert_eq!(body["can_subscribe"], true);

    let (_, reference) = open_checkout(&app, user_id).await;
    post_confirmation(&app, &reference, "txn-1", "4").await;

    let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["subscription"]["status"], "active");
    assert_eq!(body["tier"], "premium");
    assert_eq!(body["can_subscribe"], false);
    assert_eq!(body["payments"].as_array().unwrap().len(), 1);

    client
        .post(format!("{}/api/subscriptions/cancel", app.http_address))
        .json(&json!({ "user_id": user_id, "cancel_at_period_end": false }))
        .send()
        .await
        .unwrap();

    let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["subscription"]["status"], "cancelled");
    assert_eq!(body["tier"], "free");
    assert_eq!(body["can_subscribe"], true);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cleanup_requires_the_cron_secret() {
    let app = TestApp::spawn().await;

    let response = run_cleanup(&app, "wrong-secret").await;
    assert_eq!(response.status(), 401);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cleanup_sweeps_pending_rows_past_the_activation_window() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let stale = app.insert_pending_subscription(user_id, 15).await;
    let fresh = app.insert_pending_subscription(Uuid::new_v4(), 5).await;

    let response = run_cleanup(&app, TEST_CRON_SECRET).await;
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stale_pending"], 1);
    assert_eq!(body["expired_active"], 0);
    assert_eq!(body["errors"], 0);

    assert_eq!(app.subscription_status(stale).await, "cancelled");
    let reason = app.cancellation_reason(stale).await.unwrap();
    assert!(reason.to_lowercase().contains("expired"), "reason: {}", reason);

    // Still inside the activation window; a delayed webhook may yet land.
    assert_eq!(app.subscription_status(fresh).await, "pending");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cleanup_second_run_sweeps_nothing() {
    let app = TestApp::spawn().await;

    app.insert_pending_subscription(Uuid::new_v4(), 90).await;
    let user_id = Uuid::new_v4();
    app.insert_active_subscription(user_id, Utc::now() - Duration::days(1))
        .await;
    app.set_profile_status(user_id, "premium").await;

    let first: Value = run_cleanup(&app, TEST_CRON_SECRET)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["stale_pending"], 1);
    assert_eq!(first["expired_active"], 1);

    let second: Value = run_cleanup(&app, TEST_CRON_SECRET)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["stale_pending"], 0);
    assert_eq!(second["stale_pending_backup"], 0);
    assert_eq!(second["expired_active"], 0);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cleanup_expires_active_rows_past_period_end() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let expired = app
        .insert_active_subscription(user_id, Utc::now() - Duration::hours(1))
        .await;
    app.set_profile_status(user_id, "premium").await;

    let current_user = Uuid::new_v4();
    let current = app
        .insert_active_subscription(current_user, Utc::now() + Duration::days(10))
        .await;

    let response = run_cleanup(&app, TEST_CRON_SECRET).await;
    assert_eq!(response.status(), 200);

    assert_eq!(app.subscription_status(expired).await, "expired");
    assert_eq!(app.profile_status(user_id).await.as_deref(), Some("free"));
    assert_eq!(app.subscription_status(current).await, "active");

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn reconciliation_activates_a_recent_pending_checkout() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, _reference) = open_checkout(&app, user_id).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/subscriptions/reconcile", app.http_address))
        .json(&json!({ "user_id": user_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "activated");

    assert_eq!(app.subscription_status(subscription_id).await, "active");
    assert_eq!(app.profile_status(user_id).await.as_deref(), Some("premium"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn reconciliation_is_idempotent_when_the_webhook_won_the_race() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (_, reference) = open_checkout(&app, user_id).await;
    post_confirmation(&app, &reference, "txn-1", "4").await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/subscriptions/reconcile", app.http_address))
        .json(&json!({ "user_id": user_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "already_active");
    assert_eq!(app.active_subscription_count(user_id).await, 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn reconciliation_with_nothing_to_activate_reports_failure() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    // A pending row outside the activation window does not qualify.
    let stale = app.insert_pending_subscription(user_id, 15).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/subscriptions/reconcile", app.http_address))
        .json(&json!({ "user_id": user_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "failed");

    // The ambiguous row was swept, not left dangling.
    assert_eq!(app.subscription_status(stale).await, "cancelled");
    assert_ne!(app.profile_status(user_id).await.as_deref(), Some("premium"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn immediate_cancellation_downgrades_the_profile() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (_, reference) = open_checkout(&app, user_id).await;
    post_confirmation(&app, &reference, "txn-1", "4").await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/subscriptions/cancel", app.http_address))
        .json(&json!({
            "user_id": user_id,
            "reason": "Too expensive",
            "cancel_at_period_end": false
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");
    assert_eq!(body["cancellation_reason"], "Too expensive");

    assert_eq!(app.active_subscription_count(user_id).await, 0);
    assert_eq!(app.profile_status(user_id).await.as_deref(), Some("free"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cancel_at_period_end_keeps_the_subscription_active() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;
    post_confirmation(&app, &reference, "txn-1", "4").await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/subscriptions/cancel", app.http_address))
        .json(&json!({
            "user_id": user_id,
            "cancel_at_period_end": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "active");
    assert_eq!(body["cancel_at_period_end"], true);

    // Premium until the period-end sweep picks the row up.
    assert_eq!(app.subscription_status(subscription_id).await, "active");
    assert_eq!(app.profile_status(user_id).await.as_deref(), Some("premium"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cancelling_without_an_active_subscription_is_not_found() {
    let app = TestApp::spawn().await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/subscriptions/cancel", app.http_address))
        .json(&json!({
            "user_id": Uuid::new_v4(),
            "cancel_at_period_end": false
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cancel_webhook_cancels_an_active_subscription() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;
    post_confirmation(&app, &reference, "txn-1", "4").await;

    let signature = app
        .payu_client()
        .cancel_signature(&subscription_id.to_string());
    let response = reqwest::Client::new()
        .post(format!("{}/api/webhooks/cancel", app.http_address))
        .header("payu-signature", signature)
        .json(&json!({ "subscription_id": subscription_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    assert_eq!(app.subscription_status(subscription_id).await, "cancelled");
    assert_eq!(app.profile_status(user_id).await.as_deref(), Some("free"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore]
async fn cancel_webhook_with_bad_signature_is_rejected() {
    let app = TestApp::spawn().await;
    let user_id = Uuid::new_v4();

    let (subscription_id, reference) = open_checkout(&app, user_id).await;
    post_confirmation(&app, &reference, "txn-1", "4").await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/webhooks/cancel", app.http_address))
        .header("payu-signature", "deadbeef")
        .json(&json!({ "subscription_id": subscription_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(app.subscription_status(subscription_id).await, "active");

    app.cleanup().await;
}
