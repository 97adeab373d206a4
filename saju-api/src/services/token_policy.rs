//! Token prices and purchase packages

use saju_common::config::AnalysisConfig;

use crate::models::{AnalysisMode, PaymentProvider};

/// Purchasable packages: (KRW amount, tokens)
pub const TOKEN_PACKAGES: [(i64, i64); 5] = [
    (1_000, 10),
    (3_000, 30),
    (5_000, 50),
    (10_000, 110),
    (100_000, 1_200),
];

pub const SUPPORTED_PROVIDERS: [PaymentProvider; 3] = [
    PaymentProvider::KakaoPay,
    PaymentProvider::NaverPay,
    PaymentProvider::PayPal,
];

/// Tokens granted for `amount_krw`, if it is a package price
pub fn package_tokens(amount_krw: i64) -> Option<i64> {
    TOKEN_PACKAGES
        .iter()
        .find(|(krw, _)| *krw == amount_krw)
        .map(|(_, tokens)| *tokens)
}

pub fn supported_amounts() -> Vec<i64> {
    TOKEN_PACKAGES.iter().map(|(krw, _)| *krw).collect()
}

/// Token cost of one analysis in `mode` (never below 1)
pub fn cost_for_mode(config: &AnalysisConfig, mode: AnalysisMode) -> i64 {
    let cost = match mode {
        AnalysisMode::Premium => config.premium_token_cost,
        AnalysisMode::Trial => config.trial_token_cost,
    };
    cost.max(1)
}
