//! Midtrans Core API gateway implementation

use crate::{
    error::{INVALID_AMOUNT, PaymentError, PaymentResult},
    gateway::{
        ChargeExpiry, ChargeRequest, ChargeResult, ExpiryUnit, GatewayClient, GatewayConfig,
        PaymentGateway, RefundRequest, RefundResult, StatusResult,
    },
    method::ChargeScheme,
    money::Currency,
    types::PaymentInstructions,
};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Longest response excerpt carried in an error
const ERROR_BODY_LIMIT: usize = 512;

/// Midtrans gateway
pub struct MidtransGateway {
    client: GatewayClient,
}

impl MidtransGateway {
    /// Create a new Midtrans gateway
    pub fn new(config: GatewayConfig) -> PaymentResult<Self> {
        let client = GatewayClient::new(&config)?;
        debug!(endpoint = client.base_url(), production = config.is_production, "Midtrans gateway ready");
        Ok(Self { client })
    }

    /// Read a response body and classify failures.
    ///
    /// 5xx and 429 are transient. Other 4xx, an unparseable 4xx body, or a
    /// body whose `status_code` is a denial are rejections.
    async fn read(response: reqwest::Response, operation: &str) -> PaymentResult<MidtransResponse> {
        let http_status = response.status();
        let text = response.text().await?;

        if http_status.is_server_error() || http_status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PaymentError::GatewayTransient(format!(
                "{operation}: HTTP {http_status}"
            )));
        }

        match serde_json::from_str::<MidtransResponse>(&text) {
            Ok(mut body) => {
                if body.status_code.is_empty() {
                    body.status_code = http_status.as_u16().to_string();
                }
                Ok(body)
            }
            Err(_) if http_status.is_client_error() => Err(PaymentError::GatewayRejected {
                code: http_status.as_u16().to_string(),
                message: excerpt(&text),
            }),
            Err(e) => Err(PaymentError::GatewayTransient(format!(
                "{operation}: unreadable response: {e}"
            ))),
        }
    }
}

#[async_trait]
impl PaymentGateway for MidtransGateway {
    fn name(&self) -> &'static str {
        "midtrans"
    }

    async fn charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResult> {
        let body = ChargeBody::from_request(&request)?;
        let response = self.client.post("/v2/charge", &body).await?;
        let body = Self::read(response, "charge").await?;

        // 200 captured, 201 pending; 202 is a denial.
        if !matches!(body.status_code.as_str(), "200" | "201") {
            return Err(body.into_error());
        }

        let transaction_id = body.transaction_id.clone().ok_or_else(|| {
            PaymentError::GatewayTransient("charge accepted without a transaction id".into())
        })?;
        let instructions = body.instructions(&request.scheme);
        if instructions.is_none() {
            warn!(
                order_id = %request.order_id,
                transaction_id = %transaction_id,
                payment_type = request.scheme.payment_type(),
                "Charge response carried no payment instructions"
            );
        }

        Ok(ChargeResult {
            transaction_id,
            gateway_status: body.transaction_status.clone().unwrap_or_else(|| "pending".into()),
            instructions,
            status_message: body.status_message,
        })
    }

    async fn status(&self, transaction_id: &str) -> PaymentResult<StatusResult> {
        let response = self
            .client
            .get(&format!("/v2/{}/status", transaction_id))
            .await?;
        let body = Self::read(response, "status").await?;

        // Expired and denied transactions come back with 407/202 but still
        // carry a valid transaction_status.
        match (&body.transaction_status, &body.order_id) {
            (Some(status), Some(order_id)) if !body.status_code.starts_with('5') => {
                Ok(StatusResult {
                    transaction_id: body
                        .transaction_id
                        .clone()
                        .unwrap_or_else(|| transaction_id.to_string()),
                    order_id: order_id.clone(),
                    transaction_status: status.clone(),
                    fraud_status: body.fraud_status.clone(),
                    gross_amount: body.gross_amount.clone(),
                })
            }
            _ => Err(body.into_error()),
        }
    }

    async fn refund(
        &self,
        transaction_id: &str,
        request: RefundRequest,
    ) -> PaymentResult<RefundResult> {
        let body = RefundBody {
            refund_key: &request.refund_key,
            amount: gross_amount(request.amount.amount, request.amount.currency)?,
            reason: &request.reason,
        };
        let response = self
            .client
            .post(&format!("/v2/{}/refund", transaction_id), &body)
            .await?;
        let body = Self::read(response, "refund").await?;

        if body.status_code != "200" {
            return Err(body.into_error());
        }

        Ok(RefundResult {
            transaction_id: transaction_id.to_string(),
            refund_key: body.refund_key.unwrap_or(request.refund_key),
            gateway_status: body.transaction_status.unwrap_or_else(|| "refund".into()),
        })
    }
}

fn gross_amount(amount: i64, currency: Currency) -> PaymentResult<i64> {
    if currency != Currency::IDR {
        return Err(PaymentError::invalid(
            INVALID_AMOUNT,
            format!("midtrans settles IDR only, got {currency}"),
        ));
    }
    Ok(amount)
}

fn excerpt(text: &str) -> String {
    text.chars().take(ERROR_BODY_LIMIT).collect()
}

// Request bodies

#[derive(Debug, Serialize)]
struct ChargeBody<'a> {
    payment_type: &'static str,
    transaction_details: TransactionDetails<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bank_transfer: Option<BankTransfer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    echannel: Option<Echannel<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gopay: Option<WalletOptions<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ovo: Option<WalletOptions<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dana: Option<WalletOptions<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shopeepay: Option<WalletOptions<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qris: Option<Qris<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cstore: Option<Cstore<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credit_card: Option<CreditCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    custom_expiry: Option<CustomExpiry>,
}

impl<'a> ChargeBody<'a> {
    fn from_request(request: &'a ChargeRequest) -> PaymentResult<Self> {
        let mut body = Self {
            payment_type: request.scheme.payment_type(),
            transaction_details: TransactionDetails {
                order_id: &request.order_id,
                gross_amount: gross_amount(
                    request.gross_amount.amount,
                    request.gross_amount.currency,
                )?,
            },
            bank_transfer: None,
            echannel: None,
            gopay: None,
            ovo: None,
            dana: None,
            shopeepay: None,
            qris: None,
            cstore: None,
            credit_card: None,
            custom_expiry: request.expiry.map(CustomExpiry::from),
        };

        match &request.scheme {
            ChargeScheme::VirtualAccount { bank } => {
                body.bank_transfer = Some(BankTransfer { bank: bank.code() });
            }
            ChargeScheme::Echannel {
                bill_info1,
                bill_info2,
            } => {
                body.echannel = Some(Echannel {
                    bill_info1,
                    bill_info2,
                });
            }
            ChargeScheme::EWallet {
                wallet,
                callback_url,
            } => {
                let options = Some(WalletOptions {
                    enable_callback: callback_url.is_some(),
                    callback_url: callback_url.as_deref(),
                });
                match wallet {
                    crate::method::EWallet::Gopay => body.gopay = options,
                    crate::method::EWallet::Ovo => body.ovo = options,
                    crate::method::EWallet::Dana => body.dana = options,
                    crate::method::EWallet::Shopeepay => body.shopeepay = options,
                }
            }
            ChargeScheme::Qris { acquirer } => {
                body.qris = Some(Qris { acquirer });
            }
            ChargeScheme::OverTheCounter { store, message } => {
                body.cstore = Some(Cstore {
                    store: store.code(),
                    message,
                });
            }
            ChargeScheme::CreditCard { secure, save_token } => {
                body.credit_card = Some(CreditCard {
                    secure: *secure,
                    save_token_id: *save_token,
                });
            }
        }

        Ok(body)
    }
}

#[derive(Debug, Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Debug, Serialize)]
struct BankTransfer {
    bank: &'static str,
}

#[derive(Debug, Serialize)]
struct Echannel<'a> {
    bill_info1: &'a str,
    bill_info2: &'a str,
}

#[derive(Debug, Serialize)]
struct WalletOptions<'a> {
    enable_callback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct Qris<'a> {
    acquirer: &'a str,
}

#[derive(Debug, Serialize)]
struct Cstore<'a> {
    store: &'static str,
    message: &'a str,
}

#[derive(Debug, Serialize)]
struct CreditCard {
    secure: bool,
    save_token_id: bool,
}

#[derive(Debug, Serialize)]
struct CustomExpiry {
    order_time: String,
    expiry_duration: u32,
    unit: ExpiryUnit,
}

impl From<ChargeExpiry> for CustomExpiry {
    fn from(expiry: ChargeExpiry) -> Self {
        Self {
            order_time: expiry.order_time.format("%Y-%m-%d %H:%M:%S %z").to_string(),
            expiry_duration: expiry.duration,
            unit: expiry.unit,
        }
    }
}

#[derive(Debug, Serialize)]
struct RefundBody<'a> {
    refund_key: &'a str,
    amount: i64,
    reason: &'a str,
}

// Response body, shared by charge, status and refund

#[derive(Debug, Default, Deserialize)]
struct MidtransResponse {
    #[serde(default)]
    status_code: String,
    status_message: Option<String>,
    transaction_id: Option<String>,
    order_id: Option<String>,
    gross_amount: Option<String>,
    transaction_status: Option<String>,
    fraud_status: Option<String>,
    va_numbers: Option<Vec<VaNumber>>,
    permata_va_number: Option<String>,
    bill_key: Option<String>,
    biller_code: Option<String>,
    payment_code: Option<String>,
    store: Option<String>,
    qr_string: Option<String>,
    redirect_url: Option<String>,
    actions: Option<Vec<Action>>,
    refund_key: Option<String>,
    validation_messages: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct VaNumber {
    bank: String,
    va_number: String,
}

#[derive(Debug, Deserialize)]
struct Action {
    name: String,
    url: String,
}

impl MidtransResponse {
    fn into_error(self) -> PaymentError {
        let mut message = self
            .status_message
            .unwrap_or_else(|| "no status message".to_string());
        if let Some(details) = self.validation_messages.filter(|m| !m.is_empty()) {
            message = format!("{message}: {}", details.join("; "));
        }

        if self.status_code.starts_with('5') {
            PaymentError::GatewayTransient(format!("{} {message}", self.status_code))
        } else {
            PaymentError::GatewayRejected {
                code: self.status_code,
                message,
            }
        }
    }

    fn action_url(&self, names: &[&str]) -> Option<String> {
        self.actions
            .as_ref()?
            .iter()
            .find(|a| names.contains(&a.name.as_str()))
            .map(|a| a.url.clone())
    }

    fn instructions(&self, scheme: &ChargeScheme) -> Option<PaymentInstructions> {
        match scheme {
            ChargeScheme::VirtualAccount { bank } => self
                .va_numbers
                .as_ref()
                .and_then(|v| v.first())
                .map(|va| PaymentInstructions::VirtualAccount {
                    bank: va.bank.clone(),
                    number: va.va_number.clone(),
                })
                .or_else(|| {
                    self.permata_va_number
                        .clone()
                        .map(|number| PaymentInstructions::VirtualAccount {
                            bank: bank.code().to_string(),
                            number,
                        })
                }),
            ChargeScheme::Echannel { .. } => match (&self.biller_code, &self.bill_key) {
                (Some(biller_code), Some(bill_key)) => Some(PaymentInstructions::BillPayment {
                    biller_code: biller_code.clone(),
                    bill_key: bill_key.clone(),
                }),
                _ => None,
            },
            ChargeScheme::Qris { .. } => self
                .qr_string
                .clone()
                .map(|value| PaymentInstructions::QrString { value })
                .or_else(|| {
                    self.action_url(&["generate-qr-code"])
                        .map(|url| PaymentInstructions::Redirect { url })
                }),
            ChargeScheme::EWallet { .. } => self
                .action_url(&["deeplink-redirect", "generate-qr-code"])
                .or_else(|| self.redirect_url.clone())
                .map(|url| PaymentInstructions::Redirect { url }),
            ChargeScheme::OverTheCounter { store, .. } => {
                self.payment_code
                    .clone()
                    .map(|code| PaymentInstructions::PaymentCode {
                        store: self.store.clone().unwrap_or_else(|| store.code().to_string()),
                        code,
                    })
            }
            ChargeScheme::CreditCard { .. } => self
                .redirect_url
                .clone()
                .map(|url| PaymentInstructions::Redirect { url }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Bank, EWallet, Store};
    use crate::money::Money;
    use chrono::{TimeZone, Utc};

    fn request(scheme: ChargeScheme) -> ChargeRequest {
        ChargeRequest {
            order_id: "INV-20240101-ABCDEF12".into(),
            gross_amount: Money::idr(500_000),
            scheme,
            expiry: Some(ChargeExpiry::hours(
                Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
                24,
            )),
        }
    }

    #[test]
    fn test_bank_transfer_body() {
        let req = request(ChargeScheme::virtual_account(Bank::Bni));
        let body = serde_json::to_value(ChargeBody::from_request(&req).unwrap()).unwrap();

        assert_eq!(body["payment_type"], "bank_transfer");
        assert_eq!(body["transaction_details"]["order_id"], "INV-20240101-ABCDEF12");
        assert_eq!(body["transaction_details"]["gross_amount"], 500_000);
        assert_eq!(body["bank_transfer"]["bank"], "bni");
        assert_eq!(body["custom_expiry"]["order_time"], "2024-01-01 10:00:00 +0000");
        assert_eq!(body["custom_expiry"]["expiry_duration"], 24);
        assert_eq!(body["custom_expiry"]["unit"], "hour");
        assert!(body.get("echannel").is_none());
    }

    #[test]
    fn test_wallet_and_store_bodies() {
        let req = request(ChargeScheme::e_wallet(
            EWallet::Gopay,
            Some("https://pos.example.com/payments/callback".into()),
        ));
        let body = serde_json::to_value(ChargeBody::from_request(&req).unwrap()).unwrap();
        assert_eq!(body["payment_type"], "gopay");
        assert_eq!(body["gopay"]["enable_callback"], true);

        let req = request(ChargeScheme::over_the_counter(Store::Alfamart, "ORD-7"));
        let body = serde_json::to_value(ChargeBody::from_request(&req).unwrap()).unwrap();
        assert_eq!(body["payment_type"], "cstore");
        assert_eq!(body["cstore"]["store"], "alfamart");
        assert_eq!(body["cstore"]["message"], "Bayar pesanan #ORD-7");

        let req = request(ChargeScheme::credit_card());
        let body = serde_json::to_value(ChargeBody::from_request(&req).unwrap()).unwrap();
        assert_eq!(body["credit_card"]["secure"], true);
        assert_eq!(body["credit_card"]["save_token_id"], false);
    }

    #[test]
    fn test_non_idr_rejected() {
        let mut req = request(ChargeScheme::qris("gopay"));
        req.gross_amount = Money::new(1000, Currency::USD);
        assert!(ChargeBody::from_request(&req).is_err());
    }

    #[test]
    fn test_instruction_extraction() {
        let body: MidtransResponse = serde_json::from_str(
            r#"{"status_code":"201","transaction_id":"tx-1",
                "va_numbers":[{"bank":"bca","va_number":"12345678901"}]}"#,
        )
        .unwrap();
        assert_eq!(
            body.instructions(&ChargeScheme::virtual_account(Bank::Bca)),
            Some(PaymentInstructions::VirtualAccount {
                bank: "bca".into(),
                number: "12345678901".into()
            })
        );

        let body: MidtransResponse = serde_json::from_str(
            r#"{"status_code":"201","actions":[{"name":"deeplink-redirect","method":"GET","url":"gojek://pay"}]}"#,
        )
        .unwrap();
        assert_eq!(
            body.instructions(&ChargeScheme::e_wallet(EWallet::Gopay, None)),
            Some(PaymentInstructions::Redirect {
                url: "gojek://pay".into()
            })
        );

        let body: MidtransResponse =
            serde_json::from_str(r#"{"status_code":"201","bill_key":"99","biller_code":"70012"}"#)
                .unwrap();
        assert_eq!(
            body.instructions(&ChargeScheme::echannel("ORD-1")),
            Some(PaymentInstructions::BillPayment {
                biller_code: "70012".into(),
                bill_key: "99".into()
            })
        );
    }

    #[test]
    fn test_denial_maps_to_rejected() {
        let body: MidtransResponse = serde_json::from_str(
            r#"{"status_code":"202","status_message":"Deny by Bank","transaction_status":"deny"}"#,
        )
        .unwrap();
        assert!(matches!(
            body.into_error(),
            PaymentError::GatewayRejected { ref code, .. } if code == "202"
        ));

        let body: MidtransResponse =
            serde_json::from_str(r#"{"status_code":"503","status_message":"busy"}"#).unwrap();
        assert!(matches!(body.into_error(), PaymentError::GatewayTransient(_)));
    }
}
