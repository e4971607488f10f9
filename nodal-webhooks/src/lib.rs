#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Inbound UPI QR payment notifications from external PSPs. The HMAC
//! signature is verified against the raw body before anything is parsed;
//! an unverified payload is never trusted.

use chrono::DateTime;
use chrono::Utc;
use hmac::Hmac;
use hmac::Mac;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::Serialize;
use sha2::Sha256;
use std::fmt::Display;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub type WebhookResult<T> = Result<T, WebhookError>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook signature verification failed")]
    InvalidSignature,
    #[error("webhook must carry a qrCodeId or an orderId")]
    MissingIdentifier,
    #[error("unrecognized webhook status: {0}")]
    UnknownStatus(String),
    #[error("invalid payload: {0}")]
    Invalid(String),
}

/// Wire model of the PSP notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpiWebhookPayload {
    #[serde(default)]
    pub qr_code_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub merchant_id: Option<String>,
    pub amount: Decimal,
    #[serde(default, rename = "customerVPA")]
    pub customer_vpa: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub utr: Option<String>,
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Success,
    Failed,
    Pending,
    Processing,
}

impl PaymentStatus {
    pub fn from_wire(raw: &str) -> WebhookResult<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "SUCCESS" | "COMPLETED" => Ok(PaymentStatus::Success),
            "FAILED" | "FAILURE" => Ok(PaymentStatus::Failed),
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            other => Err(WebhookError::UnknownStatus(other.into())),
        }
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Success => write!(f, "success"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Processing => write!(f, "processing"),
        }
    }
}

/// A payload that passed signature verification and field validation.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedWebhook {
    pub payload: UpiWebhookPayload,
    pub status: PaymentStatus,
}

/// Acknowledgement body returned to the PSP.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
}

/// HMAC-SHA256 over the raw body, hex-encoded. Exposed so outbound test
/// fixtures and PSP simulators can sign payloads the same way.
#[must_use]
pub fn compute_signature(secret: &[u8], raw_body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key size");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of the signature header.
pub fn verify_signature(
    secret: &[u8],
    raw_body: &[u8],
    signature_hex: &str,
) -> WebhookResult<()> {
    let provided = hex::decode(signature_hex.trim())
        .map_err(|_| WebhookError::InvalidSignature)?;
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(raw_body);
    mac.verify_slice(&provided)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Verifies the signature, parses the body, and validates the contract:
/// at least one of qrCodeId/orderId, a positive amount, and a known
/// status.
pub fn parse_webhook(
    secret: &[u8],
    raw_body: &[u8],
    signature_hex: &str,
) -> WebhookResult<VerifiedWebhook> {
    verify_signature(secret, raw_body, signature_hex)?;

    let payload: UpiWebhookPayload = serde_json::from_slice(raw_body)
        .map_err(|err| WebhookError::Invalid(err.to_string()))?;

    if payload.qr_code_id.as_deref().is_none_or(str::is_empty)
        && payload.order_id.as_deref().is_none_or(str::is_empty)
    {
        return Err(WebhookError::MissingIdentifier);
    }
    if payload.amount <= Decimal::ZERO {
        return Err(WebhookError::Invalid("amount must be positive".into()));
    }

    let status = PaymentStatus::from_wire(&payload.status)?;
    Ok(VerifiedWebhook { payload, status })
}

/// Builds the acknowledgement the PSP expects back.
#[must_use]
pub fn acknowledge(webhook: &VerifiedWebhook) -> WebhookAck {
    WebhookAck {
        success: true,
        acknowledged: true,
        transaction_id: webhook.payload.transaction_id.clone(),
        status: webhook.status,
    }
}
