//! Payment gateway adapters (KakaoPay, NaverPay, PayPal)
//!
//! Each provider has a two-step flow: `ready` opens a provider transaction and
//! yields the URL the browser is sent to; `approve` finalizes it after the
//! provider redirects back to one of our callback URLs.

use async_trait::async_trait;
use saju_common::config::{KakaoPayConfig, NaverPayConfig, PayPalConfig, PaymentsConfig};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{http_client, ProviderError};
use crate::models::{PaymentProvider, PaymentRecord};

/// Merchant order id shared by all providers
pub fn merchant_order_id(payment_id: i64) -> String {
    format!("48LAB-{}", payment_id)
}

/// Browser return targets handed to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackUrls {
    pub return_url: String,
    pub cancel_url: String,
    pub fail_url: String,
}

pub fn callback_urls(public_base_url: &str, provider: PaymentProvider, payment_id: i64) -> CallbackUrls {
    let base = format!(
        "{}/api/payments/callback/{}",
        public_base_url.trim_end_matches('/'),
        provider.path_key()
    );
    CallbackUrls {
        return_url: format!("{}?payment_id={}", base, payment_id),
        cancel_url: format!("{}/cancel?payment_id={}", base, payment_id),
        fail_url: format!("{}/fail?payment_id={}", base, payment_id),
    }
}

/// Order amount in the PayPal currency
///
/// KRW is sent as a whole number (at least 1). Other currencies are converted
/// at `fx_krw_per_unit`, rounded to cents, with a floor of 0.01.
pub fn paypal_amount(amount_krw: i64, currency: &str, fx_krw_per_unit: f64) -> String {
    if currency.eq_ignore_ascii_case("KRW") {
        return amount_krw.max(1).to_string();
    }
    let fx = if fx_krw_per_unit > 0.0 { fx_krw_per_unit } else { 1400.0 };
    let converted = (amount_krw as f64 / fx * 100.0).round() / 100.0;
    format!("{:.2}", converted.max(0.01))
}

/// Ready-step input
#[derive(Debug, Clone)]
pub struct ReadyRequest {
    pub payment_id: i64,
    pub provider: PaymentProvider,
    pub login_id: String,
    pub amount_krw: i64,
    pub token_amount: i64,
    pub item_name: String,
    pub callbacks: CallbackUrls,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadyResponse {
    pub provider_txn_id: String,
    pub redirect_url: String,
    pub raw: Value,
}

/// Values the provider appends to the return URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApprovalParams {
    /// KakaoPay
    #[serde(default)]
    pub pg_token: String,
    /// NaverPay
    #[serde(default, rename = "paymentId")]
    pub naver_payment_id: String,
    /// PayPal order id
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalResult {
    pub provider_txn_id: String,
    pub approved_payload: Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, ProviderError>;

    async fn approve(&self, payment: &PaymentRecord, params: &ApprovalParams) -> Result<ApprovalResult, ProviderError>;
}

/// All three providers over HTTP, configured from `[payments.*]`
pub struct HttpPaymentGateway {
    http_client: reqwest::Client,
    kakaopay: KakaoPayConfig,
    naverpay: NaverPayConfig,
    paypal: PayPalConfig,
}

fn text_field(value: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn missing(provider: PaymentProvider, what: &str) -> ProviderError {
    ProviderError::InvalidInput(format!("{} {} required", provider.as_str(), what))
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentsConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            http_client: http_client(config.timeout_secs)?,
            kakaopay: config.kakaopay.clone(),
            naverpay: config.naverpay.clone(),
            paypal: config.paypal.clone(),
        })
    }

    async fn post_json(
        &self,
        provider: PaymentProvider,
        request: reqwest::RequestBuilder,
        body: &Value,
    ) -> Result<Value, ProviderError> {
        let name = provider.as_str();
        let response = request
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(name, e))?;
        let response = ProviderError::check_status(name, response).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::parse(name, e.to_string()))
    }

    fn kakaopay_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, format!("SECRET_KEY {}", self.kakaopay.secret_key))
    }

    fn naverpay_request(&self, url: &str) -> reqwest::RequestBuilder {
        self.http_client
            .post(url)
            .header("X-Naver-Client-Id", &self.naverpay.client_id)
            .header("X-Naver-Client-Secret", &self.naverpay.client_secret)
            .header("X-NaverPay-Chain-Id", &self.naverpay.chain_id)
    }

    async fn paypal_access_token(&self) -> Result<String, ProviderError> {
        let name = PaymentProvider::PayPal.as_str();
        let response = self
            .http_client
            .post(&self.paypal.token_url)
            .basic_auth(&self.paypal.client_id, Some(&self.paypal.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(name, e))?;
        let response = ProviderError::check_status(name, response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::parse(name, e.to_string()))?;

        let token = text_field(&body, &["access_token"]);
        if token.is_empty() {
            return Err(ProviderError::parse(name, "token response has no access_token"));
        }
        Ok(token)
    }

    async fn ready_kakaopay(&self, request: &ReadyRequest) -> Result<ReadyResponse, ProviderError> {
        let body = json!({
            "cid": self.kakaopay.cid,
            "partner_order_id": merchant_order_id(request.payment_id),
            "partner_user_id": request.login_id,
            "item_name": request.item_name,
            "quantity": 1,
            "total_amount": request.amount_krw,
            "tax_free_amount": 0,
            "approval_url": request.callbacks.return_url,
            "cancel_url": request.callbacks.cancel_url,
            "fail_url": request.callbacks.fail_url,
        });
        let raw = self
            .post_json(PaymentProvider::KakaoPay, self.kakaopay_request(&self.kakaopay.ready_url), &body)
            .await?;

        Ok(ReadyResponse {
            provider_txn_id: text_field(&raw, &["tid"]),
            redirect_url: text_field(&raw, &["next_redirect_pc_url", "next_redirect_mobile_url"]),
            raw,
        })
    }

    async fn approve_kakaopay(&self, payment: &PaymentRecord, params: &ApprovalParams) -> Result<ApprovalResult, ProviderError> {
        let pg_token = params.pg_token.trim();
        if pg_token.is_empty() {
            return Err(missing(PaymentProvider::KakaoPay, "pg_token"));
        }

        let body = json!({
            "cid": self.kakaopay.cid,
            "tid": payment.provider_txn_id,
            "partner_order_id": merchant_order_id(payment.payment_id),
            "partner_user_id": payment.login_id,
            "pg_token": pg_token,
        });
        let raw = self
            .post_json(PaymentProvider::KakaoPay, self.kakaopay_request(&self.kakaopay.approve_url), &body)
            .await?;

        let tid = text_field(&raw, &["tid"]);
        Ok(ApprovalResult {
            provider_txn_id: if tid.is_empty() { payment.provider_txn_id.clone() } else { tid },
            approved_payload: raw,
        })
    }

    async fn ready_naverpay(&self, request: &ReadyRequest) -> Result<ReadyResponse, ProviderError> {
        let body = json!({
            "merchantPayKey": merchant_order_id(request.payment_id),
            "productName": request.item_name,
            "totalPayAmount": request.amount_krw,
            "taxScopeAmount": request.amount_krw,
            "taxExScopeAmount": 0,
            "returnUrl": request.callbacks.return_url,
            "cancelUrl": request.callbacks.cancel_url,
        });
        let raw = self
            .post_json(PaymentProvider::NaverPay, self.naverpay_request(&self.naverpay.ready_url), &body)
            .await?;

        Ok(ReadyResponse {
            provider_txn_id: text_field(&raw, &["paymentId", "reserveId", "payKey"]),
            redirect_url: text_field(&raw, &["forwardUrl", "paymentUrl"]),
            raw,
        })
    }

    async fn approve_naverpay(&self, payment: &PaymentRecord, params: &ApprovalParams) -> Result<ApprovalResult, ProviderError> {
        let naver_payment_id = match params.naver_payment_id.trim() {
            "" => payment.provider_txn_id.trim(),
            id => id,
        };
        if naver_payment_id.is_empty() {
            return Err(missing(PaymentProvider::NaverPay, "paymentId"));
        }

        let raw = self
            .post_json(
                PaymentProvider::NaverPay,
                self.naverpay_request(&self.naverpay.approve_url),
                &json!({ "paymentId": naver_payment_id }),
            )
            .await?;

        Ok(ApprovalResult {
            provider_txn_id: naver_payment_id.to_string(),
            approved_payload: raw,
        })
    }

    async fn ready_paypal(&self, request: &ReadyRequest) -> Result<ReadyResponse, ProviderError> {
        let access_token = self.paypal_access_token().await?;
        let currency = self.paypal.currency.trim().to_ascii_uppercase();
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.payment_id.to_string(),
                "description": format!("48LAB TOKEN {}", request.token_amount),
                "custom_id": format!("AMOUNT_KRW:{}", request.amount_krw),
                "amount": {
                    "currency_code": currency,
                    "value": paypal_amount(request.amount_krw, &currency, self.paypal.fx_krw_per_unit),
                },
            }],
            "application_context": {
                "return_url": request.callbacks.return_url,
                "cancel_url": request.callbacks.cancel_url,
                "shipping_preference": "NO_SHIPPING",
                "user_action": "PAY_NOW",
            },
        });
        let raw = self
            .post_json(
                PaymentProvider::PayPal,
                self.http_client
                    .post(&self.paypal.create_order_url)
                    .bearer_auth(&access_token),
                &body,
            )
            .await?;

        let redirect_url = raw["links"]
            .as_array()
            .and_then(|links| {
                links.iter().find(|link| {
                    link["rel"]
                        .as_str()
                        .is_some_and(|rel| rel.eq_ignore_ascii_case("approve"))
                })
            })
            .map(|link| text_field(link, &["href"]))
            .unwrap_or_default();

        Ok(ReadyResponse {
            provider_txn_id: text_field(&raw, &["id"]),
            redirect_url,
            raw,
        })
    }

    async fn approve_paypal(&self, payment: &PaymentRecord, params: &ApprovalParams) -> Result<ApprovalResult, ProviderError> {
        let order_id = match params.token.trim() {
            "" => payment.provider_txn_id.trim(),
            token => token,
        };
        if order_id.is_empty() {
            return Err(missing(PaymentProvider::PayPal, "order token"));
        }

        let access_token = self.paypal_access_token().await?;
        let capture_url = self.paypal.capture_order_url.replace("{order_id}", order_id);
        let raw = self
            .post_json(
                PaymentProvider::PayPal,
                self.http_client.post(&capture_url).bearer_auth(&access_token),
                &json!({}),
            )
            .await?;

        Ok(ApprovalResult {
            provider_txn_id: order_id.to_string(),
            approved_payload: raw,
        })
    }

    fn ensure_configured(&self, provider: PaymentProvider) -> Result<(), ProviderError> {
        let configured = match provider {
            PaymentProvider::KakaoPay => self.kakaopay.is_configured(),
            PaymentProvider::NaverPay => self.naverpay.is_configured(),
            PaymentProvider::PayPal => self.paypal.is_configured(),
        };
        if configured {
            Ok(())
        } else {
            Err(ProviderError::not_configured(provider.as_str()))
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn ready(&self, request: &ReadyRequest) -> Result<ReadyResponse, ProviderError> {
        self.ensure_configured(request.provider)?;

        let response = match request.provider {
            PaymentProvider::KakaoPay => self.ready_kakaopay(request).await?,
            PaymentProvider::NaverPay => self.ready_naverpay(request).await?,
            PaymentProvider::PayPal => self.ready_paypal(request).await?,
        };

        if response.redirect_url.is_empty() {
            return Err(ProviderError::parse(
                request.provider.as_str(),
                "ready response has no redirect URL",
            ));
        }

        tracing::info!(
            payment_id = request.payment_id,
            provider = request.provider.as_str(),
            provider_txn_id = %response.provider_txn_id,
            "Payment ready"
        );
        Ok(response)
    }

    async fn approve(&self, payment: &PaymentRecord, params: &ApprovalParams) -> Result<ApprovalResult, ProviderError> {
        self.ensure_configured(payment.provider)?;

        match payment.provider {
            PaymentProvider::KakaoPay => self.approve_kakaopay(payment, params).await,
            PaymentProvider::NaverPay => self.approve_naverpay(payment, params).await,
            PaymentProvider::PayPal => self.approve_paypal(payment, params).await,
        }
    }
}
