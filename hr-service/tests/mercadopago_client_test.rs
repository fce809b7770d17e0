//! MercadoPago client tests against a mocked provider API.

use hr_service::config::MercadoPagoConfig;
use hr_service::services::MercadoPagoClient;
use secrecy::Secret;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> MercadoPagoClient {
    MercadoPagoClient::new(MercadoPagoConfig {
        access_token: Secret::new("TEST-access-token".to_string()),
        webhook_secret: Secret::new("test-mp-webhook-secret".to_string()),
        api_base_url: server.uri(),
    })
    .expect("Failed to build client")
}

fn payment_body(status: &str) -> serde_json::Value {
    serde_json::json!({
        "id": 12345,
        "status": status,
        "status_detail": "accredited",
        "external_reference": "9f3b1c1e-8a43-4a18-9b5c-0f1a2b3c4d5e",
        "transaction_amount": 45000.0,
        "currency_id": "COP"
    })
}

#[tokio::test]
async fn get_payment_parses_the_provider_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/12345"))
        .and(header("authorization", "Bearer TEST-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_body("approved")))
        .expect(1)
        .mount(&server)
        .await;

    let payment = client_for(&server)
        .get_payment("12345")
        .await
        .expect("Payment lookup failed");

    assert_eq!(payment.id, 12345);
    assert_eq!(payment.status, "approved");
    assert_eq!(
        payment.external_reference.as_deref(),
        Some("9f3b1c1e-8a43-4a18-9b5c-0f1a2b3c4d5e")
    );
}

#[tokio::test]
async fn transient_upstream_errors_are_retried() {
    let server = MockServer::start().await;

    // Two 5xx responses, then the real payload.
    Mock::given(method("GET"))
        .and(path("/v1/payments/12345"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/payments/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payment_body("approved")))
        .expect(1)
        .mount(&server)
        .await;

    let payment = client_for(&server)
        .get_payment("12345")
        .await
        .expect("Payment lookup should succeed after retries");

    assert_eq!(payment.status, "approved");
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/404404"))
        .respond_with(ResponseTemplate::new(404).set_body_string("payment not found"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client_for(&server).get_payment("404404").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn malformed_provider_response_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/payments/12345"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let result = client_for(&server).get_payment("12345").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn get_preapproval_parses_the_provider_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/preapproval/2c93808.."))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "2c93808..",
            "status": "authorized",
            "external_reference": "9f3b1c1e-8a43-4a18-9b5c-0f1a2b3c4d5e"
        })))
        .mount(&server)
        .await;

    let preapproval = client_for(&server)
        .get_preapproval("2c93808..")
        .await
        .expect("Preapproval lookup failed");

    assert_eq!(preapproval.status, "authorized");
}
