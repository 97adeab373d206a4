//! Payment rows and provider identifiers

use serde::{Deserialize, Serialize};

/// Supported payment gateways
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentProvider {
    KakaoPay,
    NaverPay,
    PayPal,
}

impl PaymentProvider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "KAKAOPAY" => Some(PaymentProvider::KakaoPay),
            "NAVERPAY" => Some(PaymentProvider::NaverPay),
            "PAYPAL" => Some(PaymentProvider::PayPal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::KakaoPay => "KAKAOPAY",
            PaymentProvider::NaverPay => "NAVERPAY",
            PaymentProvider::PayPal => "PAYPAL",
        }
    }

    /// Path segment used by callback URLs (`/api/payments/callback/kakaopay`)
    pub fn path_key(&self) -> &'static str {
        match self {
            PaymentProvider::KakaoPay => "kakaopay",
            PaymentProvider::NaverPay => "naverpay",
            PaymentProvider::PayPal => "paypal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentStatus {
    Requested,
    Pending,
    Success,
    Failed,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Requested => "REQUESTED",
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Canceled => "CANCELED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "REQUESTED" => Some(PaymentStatus::Requested),
            "PENDING" => Some(PaymentStatus::Pending),
            "SUCCESS" => Some(PaymentStatus::Success),
            "FAILED" => Some(PaymentStatus::Failed),
            "CANCELED" | "CANCELLED" => Some(PaymentStatus::Canceled),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Success | PaymentStatus::Failed | PaymentStatus::Canceled
        )
    }
}

/// One token purchase attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRecord {
    pub payment_id: i64,
    pub login_id: String,
    pub provider: PaymentProvider,
    pub amount_krw: i64,
    pub token_amount: i64,
    pub status: PaymentStatus,
    pub provider_txn_id: String,
    pub request_payload: serde_json::Value,
    pub error_message: String,
    pub created_at: i64,
    pub updated_at: i64,
}
