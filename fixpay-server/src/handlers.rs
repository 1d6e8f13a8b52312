//! Request handlers

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use fixpay_payments::{
    Anomaly, ChargeOutcome, CreatePayment, INVALID_PAYLOAD, INVALID_PAYMENT_METHOD, Invoice,
    Page, PageRequest, Payment, PaymentError, PaymentFilter, PaymentMethod, PaymentStatus,
    ReconcileReport, SIGNATURE_HEADER, StatusChange,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, warn};
use uuid::Uuid;

const INVALID_QUERY: &str = "invalid_query";
const INVALID_PAYMENT_ID: &str = "invalid_payment_id";
const INVALID_STATUS: &str = "invalid_status";

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(INVALID_PAYLOAD, rejection.body_text()))
}

fn payment_id(path: Result<Path<Uuid>, PathRejection>) -> ApiResult<Uuid> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::bad_request(INVALID_PAYMENT_ID, rejection.body_text()))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "gateway": state.service.gateway_name(),
        "reconciler_running": state.reconciler.is_running().await,
    }))
}

pub async fn create_payment(
    State(state): State<AppState>,
    payload: Result<Json<CreatePayment>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let request = body(payload)?;
    let payment = state.service.create_payment(request).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub method: Option<String>,
    pub order_id: Option<Uuid>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ListQuery {
    fn filter(&self) -> ApiResult<PaymentFilter> {
        let status = match self.status.as_deref() {
            Some(raw) => Some(PaymentStatus::parse(raw).ok_or_else(|| {
                ApiError::bad_request(INVALID_STATUS, format!("unknown status {raw:?}"))
            })?),
            None => None,
        };
        let method = match self.method.as_deref() {
            Some(raw) => Some(PaymentMethod::parse(raw).ok_or_else(|| {
                ApiError::bad_request(INVALID_PAYMENT_METHOD, format!("unknown method {raw:?}"))
            })?),
            None => None,
        };
        Ok(PaymentFilter {
            status,
            method,
            order_id: self.order_id,
        })
    }

    fn page(&self) -> ApiResult<PageRequest> {
        let defaults = PageRequest::default();
        Ok(PageRequest::new(
            self.page.unwrap_or(defaults.page()),
            self.limit.unwrap_or(defaults.limit()),
        )?)
    }
}

pub async fn list_payments(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Page<Payment>>> {
    let Query(query) =
        query.map_err(|rejection| ApiError::bad_request(INVALID_QUERY, rejection.body_text()))?;
    let page = state
        .service
        .list_payments(&query.filter()?, query.page()?)
        .await?;
    Ok(Json(page))
}

pub async fn get_payment(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Payment>> {
    let id = payment_id(path)?;
    Ok(Json(state.service.get_payment(id).await?))
}

pub async fn payment_history(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Vec<StatusChange>>> {
    let id = payment_id(path)?;
    // 404 rather than an empty trail for unknown ids
    state.service.get_payment(id).await?;
    Ok(Json(state.service.payment_history(id).await?))
}

pub async fn payment_invoice(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Invoice>> {
    let id = payment_id(path)?;
    Ok(Json(state.service.generate_invoice(id).await?))
}

pub async fn payment_by_invoice(
    State(state): State<AppState>,
    Path(invoice_number): Path<String>,
) -> ApiResult<Json<Payment>> {
    Ok(Json(
        state.service.get_payment_by_invoice(&invoice_number).await?,
    ))
}

pub async fn payments_by_order(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<Vec<Payment>>> {
    let order_id = path
        .map(|Path(id)| id)
        .map_err(|rejection| ApiError::bad_request(INVALID_QUERY, rejection.body_text()))?;
    Ok(Json(state.service.list_payments_by_order(order_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    pub payment_method: PaymentMethod,
}

pub async fn process_payment(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> ApiResult<Json<ChargeOutcome>> {
    let id = payment_id(path)?;
    let request = body(payload)?;
    Ok(Json(
        state
            .service
            .process_payment(id, request.payment_method)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RefundBody {
    pub amount: i64,
    #[serde(default)]
    pub reason: String,
}

pub async fn refund_payment(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<RefundBody>, JsonRejection>,
) -> ApiResult<Json<Payment>> {
    let id = payment_id(path)?;
    let request = body(payload)?;
    Ok(Json(
        state
            .service
            .refund_payment(id, request.amount, &request.reason)
            .await?,
    ))
}

/// Gateway webhook.
///
/// Processing runs in its own task so a slow order service cannot cut a
/// status change short; the gateway only waits up to the webhook timeout.
pub async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let service = state.service.clone();
    let task = tokio::spawn(async move { service.handle_callback(&raw, signature.as_deref()).await });

    match tokio::time::timeout(state.webhook_timeout, task).await {
        Ok(Ok(Ok(outcome))) => {
            (StatusCode::OK, Json(json!({ "status": "ok", "outcome": outcome }))).into_response()
        }
        Ok(Ok(Err(err))) => callback_error(err).into_response(),
        Ok(Err(join_err)) => {
            error!(error = %join_err, "Callback task failed");
            ApiError::RetryLater.into_response()
        }
        Err(_) => {
            warn!(timeout = ?state.webhook_timeout, "Callback processing exceeded timeout");
            ApiError::RetryLater.into_response()
        }
    }
}

/// Malformed bodies and unknown payments are answered plainly; everything
/// else gets the same ambiguous retry-later.
fn callback_error(err: PaymentError) -> ApiError {
    match err {
        PaymentError::InvalidInput { .. } | PaymentError::PaymentNotFound(_) => err.into(),
        other => {
            warn!(code = other.code(), error = %other, "Callback not applied");
            ApiError::RetryLater
        }
    }
}

pub async fn list_anomalies(State(state): State<AppState>) -> Json<Vec<Anomaly>> {
    Json(state.service.list_anomalies())
}

pub async fn reconcile_now(State(state): State<AppState>) -> ApiResult<Json<ReconcileReport>> {
    Ok(Json(state.reconciler.run_once().await?))
}
