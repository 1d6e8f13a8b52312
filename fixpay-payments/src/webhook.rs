//! Gateway callback payloads and signature verification

use crate::error::{INVALID_PAYLOAD, PaymentError, PaymentResult};
use crate::types::GatewayReport;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying an out-of-body signature
pub const SIGNATURE_HEADER: &str = "X-Callback-Signature";

/// Notification body posted by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Gateway order id; our invoice number
    pub order_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub status_code: String,
    pub gross_amount: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub signature_key: Option<String>,
}

impl CallbackPayload {
    /// Parse a raw callback body
    pub fn parse(raw: &[u8]) -> PaymentResult<Self> {
        serde_json::from_slice(raw).map_err(|e| {
            PaymentError::invalid(INVALID_PAYLOAD, format!("malformed callback body: {e}"))
        })
    }

    pub fn report(&self) -> GatewayReport {
        GatewayReport {
            transaction_id: self.transaction_id.clone(),
            transaction_status: self.transaction_status.clone(),
            fraud_status: self.fraud_status.clone(),
            gross_amount: Some(self.gross_amount.clone()),
        }
    }
}

/// How callbacks are authenticated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// `sha512(order_id + status_code + gross_amount + server_key)`, hex
    #[default]
    BodyDigest,
    /// HMAC-SHA256 of the raw body keyed with the server key, hex, in
    /// [`SIGNATURE_HEADER`]
    HmacSha256,
}

impl SignatureScheme {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "body_digest" => Some(Self::BodyDigest),
            "hmac_sha256" => Some(Self::HmacSha256),
            _ => None,
        }
    }
}

/// Verifies callback authenticity before anything else looks at it
#[derive(Clone)]
pub struct CallbackVerifier {
    server_key: SecretString,
    scheme: SignatureScheme,
}

impl fmt::Debug for CallbackVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackVerifier")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl CallbackVerifier {
    pub fn new(server_key: SecretString, scheme: SignatureScheme) -> Self {
        Self { server_key, scheme }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Verify a parsed callback.
    ///
    /// `header` is the value of [`SIGNATURE_HEADER`], if the request had one.
    pub fn verify(
        &self,
        raw: &[u8],
        payload: &CallbackPayload,
        header: Option<&str>,
    ) -> PaymentResult<()> {
        let (provided, expected) = match self.scheme {
            SignatureScheme::BodyDigest => (
                header.or(payload.signature_key.as_deref()),
                self.body_digest(&payload.order_id, &payload.status_code, &payload.gross_amount),
            ),
            SignatureScheme::HmacSha256 => (header, self.hmac_sha256(raw)?),
        };

        match provided {
            Some(sig) if constant_time_compare(&sig.trim().to_lowercase(), &expected) => Ok(()),
            _ => Err(PaymentError::InvalidSignature),
        }
    }

    /// Compute the body digest signature
    pub fn body_digest(&self, order_id: &str, status_code: &str, gross_amount: &str) -> String {
        let mut hasher = Sha512::new();
        hasher.update(order_id.as_bytes());
        hasher.update(status_code.as_bytes());
        hasher.update(gross_amount.as_bytes());
        hasher.update(self.server_key.expose_secret().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compute the HMAC-SHA256 signature of a raw body
    pub fn hmac_sha256(&self, raw: &[u8]) -> PaymentResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.server_key.expose_secret().as_bytes())
            .map_err(|e| PaymentError::Config(format!("invalid HMAC key: {e}")))?;
        mac.update(raw);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signature a sender would attach for this scheme
    pub fn sign(&self, raw: &[u8], payload: &CallbackPayload) -> PaymentResult<String> {
        match self.scheme {
            SignatureScheme::BodyDigest => Ok(self.body_digest(
                &payload.order_id,
                &payload.status_code,
                &payload.gross_amount,
            )),
            SignatureScheme::HmacSha256 => self.hmac_sha256(raw),
        }
    }
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(scheme: SignatureScheme) -> CallbackVerifier {
        CallbackVerifier::new(SecretString::new("SB-Mid-server-test".into()), scheme)
    }

    fn payload() -> CallbackPayload {
        CallbackPayload {
            order_id: "INV-20240101-ABCDEF12".into(),
            transaction_id: Some("tx-123".into()),
            status_code: "200".into(),
            gross_amount: "500000.00".into(),
            transaction_status: "settlement".into(),
            fraud_status: None,
            payment_type: Some("bank_transfer".into()),
            signature_key: None,
        }
    }

    #[test]
    fn test_body_digest_matches_reference() {
        let v = verifier(SignatureScheme::BodyDigest);
        let expected = hex::encode(Sha512::digest(
            b"INV-20240101-ABCDEF12200500000.00SB-Mid-server-test",
        ));
        assert_eq!(v.body_digest("INV-20240101-ABCDEF12", "200", "500000.00"), expected);
    }

    #[test]
    fn test_body_digest_in_body_verifies() {
        let v = verifier(SignatureScheme::BodyDigest);
        let mut p = payload();
        p.signature_key = Some(v.body_digest(&p.order_id, &p.status_code, &p.gross_amount));
        let raw = serde_json::to_vec(&p).unwrap();

        assert!(v.verify(&raw, &p, None).is_ok());
    }

    #[test]
    fn test_tampered_amount_rejected() {
        let v = verifier(SignatureScheme::BodyDigest);
        let mut p = payload();
        p.signature_key = Some(v.body_digest(&p.order_id, &p.status_code, &p.gross_amount));
        p.gross_amount = "1.00".into();
        let raw = serde_json::to_vec(&p).unwrap();

        assert_eq!(v.verify(&raw, &p, None), Err(PaymentError::InvalidSignature));
    }

    #[test]
    fn test_missing_signature_rejected() {
        let v = verifier(SignatureScheme::BodyDigest);
        let p = payload();
        let raw = serde_json::to_vec(&p).unwrap();
        assert_eq!(v.verify(&raw, &p, None), Err(PaymentError::InvalidSignature));
    }

    #[test]
    fn test_hmac_header_verifies() {
        let v = verifier(SignatureScheme::HmacSha256);
        let p = payload();
        let raw = serde_json::to_vec(&p).unwrap();
        let sig = v.sign(&raw, &p).unwrap();

        assert!(v.verify(&raw, &p, Some(&sig)).is_ok());
        assert!(v.verify(&raw, &p, Some(&sig.to_uppercase())).is_ok());
        assert!(v.verify(b"{}", &p, Some(&sig)).is_err());
        assert!(v.verify(&raw, &p, None).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let ours = verifier(SignatureScheme::HmacSha256);
        let theirs =
            CallbackVerifier::new(SecretString::new("other".into()), SignatureScheme::HmacSha256);
        let p = payload();
        let raw = serde_json::to_vec(&p).unwrap();
        let sig = theirs.sign(&raw, &p).unwrap();

        assert!(ours.verify(&raw, &p, Some(&sig)).is_err());
    }

    #[test]
    fn test_parse_malformed() {
        let err = CallbackPayload::parse(b"not json").unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
        let err = CallbackPayload::parse(br#"{"order_id":"x"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
    }
}
