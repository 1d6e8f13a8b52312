//! HTTP surface for fixpay
//!
//! An axum application over [`fixpay_payments::PaymentService`]: the payment
//! API, the gateway webhook, operator endpoints for anomalies and manual
//! reconciliation, and a health check. Configuration is layered from a file
//! and `FIXPAY_*` environment variables; logs go through `tracing`.
//!
//! | Method | Path                                  | Handler                 |
//! |--------|---------------------------------------|-------------------------|
//! | POST   | `/payments`                           | create                  |
//! | GET    | `/payments`                           | list                    |
//! | GET    | `/payments/:id`                       | get                     |
//! | GET    | `/payments/:id/history`               | status audit trail      |
//! | GET    | `/payments/:id/invoice`               | invoice                 |
//! | GET    | `/payments/invoice/:invoice_number`   | lookup by invoice       |
//! | GET    | `/payments/order/:order_id`           | payments of an order    |
//! | POST   | `/payments/:id/process`               | dispatch to gateway     |
//! | POST   | `/payments/:id/refund`                | full refund             |
//! | POST   | `/payments/callback`                  | gateway webhook         |
//! | GET    | `/payments/anomalies`                 | manual review queue     |
//! | POST   | `/payments/reconcile`                 | run a pass now          |
//! | GET    | `/health`                             | liveness                |

pub mod app;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod routes;
pub mod state;

pub use app::{build_state, build_state_with, router, serve};
pub use config::AppConfig;
pub use error::{ApiError, ApiResult, ServerError};
pub use state::AppState;
