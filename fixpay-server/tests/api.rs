//! HTTP API driven through the router

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use fixpay_payments::{
    CallbackPayload, CallbackVerifier, InMemoryOrderDirectory, MidtransGateway, Order,
    SignatureScheme,
};
use fixpay_server::{AppConfig, AppState, build_state_with, router};
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SERVER_KEY: &str = "SB-Mid-server-api";

struct TestApp {
    app: Router,
    state: AppState,
    orders: Arc<InMemoryOrderDirectory>,
    gateway: MockServer,
}

impl TestApp {
    async fn new() -> Self {
        let gateway = MockServer::start().await;

        let mut config = AppConfig::default();
        config.gateway.server_key = SecretString::new(SERVER_KEY.into());
        config.gateway.base_url = Some(gateway.uri());
        config.gateway.timeout_secs = 2;
        config.reconcile.grace_period_secs = 0;

        let orders = Arc::new(InMemoryOrderDirectory::new());
        let midtrans = MidtransGateway::new(config.gateway_config()).unwrap();
        let state = build_state_with(&config, Arc::new(midtrans), orders.clone());

        Self {
            app: router(state.clone()),
            state,
            orders,
            gateway,
        }
    }

    fn order(&self) -> Order {
        self.orders
            .insert(Order::new(Uuid::new_v4(), "ORD-API-1"))
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn create(&self, order: &Order, method: &str, amount: i64) -> Value {
        let (status, body) = self
            .post(
                "/payments",
                json!({ "order_id": order.id, "payment_method": method, "amount": amount }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    async fn mount_qris_charge(&self, transaction_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v2/charge"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "status_code": "201",
                "transaction_id": transaction_id,
                "transaction_status": "pending",
                "qr_string": "00020101021126610014COM.GO-JEK.WWW"
            })))
            .mount(&self.gateway)
            .await;
    }

    fn signed_callback(&self, invoice: &str, transaction_id: &str, status: &str, gross: &str) -> String {
        let verifier = CallbackVerifier::new(
            SecretString::new(SERVER_KEY.into()),
            SignatureScheme::BodyDigest,
        );
        let mut payload = CallbackPayload {
            order_id: invoice.to_string(),
            transaction_id: Some(transaction_id.to_string()),
            status_code: "200".to_string(),
            gross_amount: gross.to_string(),
            transaction_status: status.to_string(),
            fraud_status: None,
            payment_type: Some("qris".to_string()),
            signature_key: None,
        };
        payload.signature_key =
            Some(verifier.body_digest(&payload.order_id, &payload.status_code, &payload.gross_amount));
        serde_json::to_string(&payload).unwrap()
    }

    async fn callback(&self, body: String) -> (StatusCode, Value) {
        self.send(
            Request::post("/payments/callback")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

#[tokio::test]
async fn test_health() {
    let t = TestApp::new().await;
    let (status, body) = t.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["gateway"], "midtrans");
    assert_eq!(body["reconciler_running"], false);
}

#[tokio::test]
async fn test_create_payment() {
    let t = TestApp::new().await;
    let order = t.order();

    let body = t.create(&order, "bca_va", 250_000).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["method"], "bca_va");
    assert_eq!(body["amount"]["amount"], 250_000);
    assert_eq!(body["amount"]["currency"], "IDR");
    assert!(body["invoice_number"].as_str().unwrap().starts_with("INV-"));

    let cash = t.create(&order, "cash", 50_000).await;
    assert_eq!(cash["status"], "paid");
}

#[tokio::test]
async fn test_create_payment_rejects_bad_input() {
    let t = TestApp::new().await;
    let order = t.order();

    let (status, body) = t.post("/payments", json!({ "order_id": "nope" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_payload");

    let (status, body) = t
        .post(
            "/payments",
            json!({ "order_id": order.id, "payment_method": "bca_va", "amount": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_amount");

    let (status, _) = t
        .post(
            "/payments",
            json!({ "order_id": Uuid::new_v4(), "payment_method": "bca_va", "amount": 10_000 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_payment_is_404() {
    let t = TestApp::new().await;
    let id = Uuid::new_v4();

    let (status, body) = t.get(&format!("/payments/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].is_string());

    let (status, _) = t.get(&format!("/payments/{id}/history")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = t.get("/payments/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_payment_id");
}

#[tokio::test]
async fn test_process_and_settle_through_webhook() {
    let t = TestApp::new().await;
    t.mount_qris_charge("qr-api-1").await;
    let order = t.order();
    let created = t.create(&order, "qris", 75_000).await;
    let id = created["id"].as_str().unwrap().to_string();
    let invoice = created["invoice_number"].as_str().unwrap().to_string();

    let (status, body) = t
        .post(
            &format!("/payments/{id}/process"),
            json!({ "payment_method": "qris" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["payment"]["transaction_id"], "qr-api-1");
    assert_eq!(body["payment"]["instructions"]["type"], "qr_string");

    let callback = t.signed_callback(&invoice, "qr-api-1", "settlement", "75000.00");
    let (status, body) = t.callback(callback.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["outcome"]["result"], "applied");
    assert_eq!(body["outcome"]["to"], "paid");

    let (status, body) = t.callback(callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["result"], "unchanged");

    assert_eq!(t.orders.settlements_for(order.id), 1);

    let (_, payment) = t.get(&format!("/payments/{id}")).await;
    assert_eq!(payment["status"], "paid");

    let (status, history) = t.get(&format!("/payments/{id}/history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["to"], "paid");

    let (status, invoice_doc) = t.get(&format!("/payments/{id}/invoice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(invoice_doc["invoice_number"], invoice.as_str());

    let (status, by_invoice) = t.get(&format!("/payments/invoice/{invoice}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_invoice["id"], id.as_str());
}

#[tokio::test]
async fn test_process_rejected_by_gateway() {
    let t = TestApp::new().await;
    Mock::given(method("POST"))
        .and(path("/v2/charge"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "202",
            "status_message": "Deny by Bank [BCA] with code [05]",
            "transaction_id": "deny-api",
            "transaction_status": "deny"
        })))
        .mount(&t.gateway)
        .await;
    let order = t.order();
    let created = t.create(&order, "bca_va", 100_000).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = t
        .post(
            &format!("/payments/{id}/process"),
            json!({ "payment_method": "bca_va" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "gateway_rejected");

    let (_, payment) = t.get(&format!("/payments/{id}")).await;
    assert_eq!(payment["status"], "failed");
}

#[tokio::test]
async fn test_callback_errors() {
    let t = TestApp::new().await;
    let order = t.order();
    let created = t.create(&order, "gopay", 40_000).await;
    let invoice = created["invoice_number"].as_str().unwrap();

    let (status, body) = t.callback("{not json".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_payload");

    let unknown = t.signed_callback("INV-19700101-DEADBEEF", "tx-x", "settlement", "40000.00");
    let (status, _) = t.callback(unknown).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut forged: Value =
        serde_json::from_str(&t.signed_callback(invoice, "tx-1", "settlement", "40000.00")).unwrap();
    forged["signature_key"] = json!("00");
    let (status, body) = t.callback(forged.to_string()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "retry_later");

    let (_, payment) = t.get(&format!("/payments/{}", created["id"].as_str().unwrap())).await;
    assert_eq!(payment["status"], "pending");
}

#[tokio::test]
async fn test_callback_times_out_as_retry_later() {
    let t = TestApp::new().await;
    let state = AppState::new(
        t.state.service.clone(),
        t.state.reconciler.clone(),
        Duration::ZERO,
    );
    let app = router(state);

    let body = t.signed_callback("INV-19700101-DEADBEEF", "tx-x", "settlement", "1.00");
    let response = app
        .oneshot(
            Request::post("/payments/callback")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(matches!(
        response.status(),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::NOT_FOUND
    ));
}

#[tokio::test]
async fn test_list_payments_with_filters_and_pagination() {
    let t = TestApp::new().await;
    let order = t.order();
    for _ in 0..3 {
        t.create(&order, "bca_va", 10_000).await;
    }
    t.create(&order, "cash", 5_000).await;

    let (status, page) = t.get("/payments?limit=2&page=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 4);
    assert_eq!(page["total_pages"], 2);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    let (_, page) = t.get("/payments?status=paid").await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["method"], "cash");

    let (_, page) = t
        .get(&format!("/payments?method=bca_va&order_id={}", order.id))
        .await;
    assert_eq!(page["total"], 3);

    let (status, body) = t.get("/payments?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_pagination");

    let (status, body) = t.get("/payments?status=settled").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_status");

    let (status, list) = t.get(&format!("/payments/order/{}", order.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_refund_cash_payment() {
    let t = TestApp::new().await;
    let order = t.order();
    let cash = t.create(&order, "cash", 20_000).await;
    let id = cash["id"].as_str().unwrap();

    let (status, body) = t
        .post(
            &format!("/payments/{id}/refund"),
            json!({ "amount": 5_000, "reason": "partial" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = t
        .post(
            &format!("/payments/{id}/refund"),
            json!({ "amount": 20_000, "reason": "customer cancelled" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "refunded");

    let (status, body) = t
        .post(&format!("/payments/{id}/refund"), json!({ "amount": 20_000 }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn test_reconcile_and_anomalies() {
    let t = TestApp::new().await;
    t.mount_qris_charge("qr-rec-1").await;
    Mock::given(method("GET"))
        .and(path("/v2/qr-rec-1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status_code": "200",
            "transaction_id": "qr-rec-1",
            "order_id": "ignored",
            "transaction_status": "chargeback",
            "gross_amount": "30000.00"
        })))
        .mount(&t.gateway)
        .await;

    let order = t.order();
    let created = t.create(&order, "qris", 30_000).await;
    let id = created["id"].as_str().unwrap();
    let (status, _) = t
        .post(
            &format!("/payments/{id}/process"),
            json!({ "payment_method": "qris" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, report) = t.post("/payments/reconcile", json!({})).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["checked"], 1);
    assert_eq!(report["ignored"], 1);

    let (status, anomalies) = t.get("/payments/anomalies").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(anomalies.as_array().unwrap().len(), 1);
}
