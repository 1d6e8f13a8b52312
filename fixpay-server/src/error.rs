//! Server and HTTP error types

use crate::config::ConfigError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fixpay_payments::{PaymentError, ReconcileError};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Startup and runtime failures of the server process
#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Payment subsystem error: {0}")]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error body: `{"error": <reason code>, "message": <text>}`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Errors returned from HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    /// Answer that tells the caller only to try again
    #[error("temporarily unable to process, retry later")]
    RetryLater,

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Payment(err) => payment_status(err),
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::RetryLater => StatusCode::SERVICE_UNAVAILABLE,
            Self::Reconcile(ReconcileError::Payment(err)) => payment_status(err),
            Self::Reconcile(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Payment(err) => err.code(),
            Self::BadRequest { code, .. } => *code,
            Self::RetryLater => "retry_later",
            Self::Reconcile(ReconcileError::Payment(err)) => err.code(),
            Self::Reconcile(_) => "reconciliation_error",
        }
    }
}

fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::OrderNotFound(_) | PaymentError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        PaymentError::InvalidSignature => StatusCode::UNAUTHORIZED,
        PaymentError::GatewayRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        PaymentError::StateConflict { .. } | PaymentError::Duplicate(_) => StatusCode::CONFLICT,
        PaymentError::GatewayTransient(_) | PaymentError::OrderService(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        PaymentError::Config(_) | PaymentError::Serialization(_) | PaymentError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal detail stays in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
