//! Login session signature validation
//!
//! The upstream login tier forwards the authenticated login id together with
//! a millisecond timestamp and a signature:
//!
//! ```text
//! signature = hex(SHA-256("<login_id>:<timestamp_ms>:<secret>"))
//! ```
//!
//! The timestamp must be no older than the configured max age and no more
//! than [`MAX_FUTURE_SKEW_MS`] ahead of the local clock. An empty secret
//! disables checking.
//!
//! This module has no HTTP framework dependencies; the axum extractor lives
//! in the service crate.

use sha2::{Digest, Sha256};

/// Tolerated clock skew for timestamps from the future
pub const MAX_FUTURE_SKEW_MS: i64 = 5_000;

/// Session validation failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAuthError {
    /// Timestamp outside the acceptable window
    InvalidTimestamp { timestamp: i64, now: i64, reason: String },

    /// Signature does not match the calculated value
    InvalidSignature,

    /// Timestamp header missing or unparsable
    MissingTimestamp,

    /// Signature header missing
    MissingSignature,
}

impl std::fmt::Display for SessionAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionAuthError::InvalidTimestamp { reason, .. } => {
                write!(f, "Invalid session timestamp: {}", reason)
            }
            SessionAuthError::InvalidSignature => write!(f, "Invalid session signature"),
            SessionAuthError::MissingTimestamp => write!(f, "Missing session timestamp"),
            SessionAuthError::MissingSignature => write!(f, "Missing session signature"),
        }
    }
}

impl std::error::Error for SessionAuthError {}

/// Check the timestamp window
pub fn validate_timestamp(timestamp: i64, now: i64, max_age_ms: i64) -> Result<(), SessionAuthError> {
    if timestamp > now + MAX_FUTURE_SKEW_MS {
        return Err(SessionAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("{}ms in the future", timestamp - now),
        });
    }
    if now - timestamp > max_age_ms {
        return Err(SessionAuthError::InvalidTimestamp {
            timestamp,
            now,
            reason: format!("{}ms old (max {}ms)", now - timestamp, max_age_ms),
        });
    }
    Ok(())
}

/// Calculate the hex signature for a login id and timestamp
pub fn calculate_signature(login_id: &str, timestamp: i64, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(login_id.as_bytes());
    hasher.update(b":");
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Validate timestamp and signature together
///
/// Comparison is case-insensitive on the hex digits.
pub fn validate_session(
    login_id: &str,
    timestamp: Option<i64>,
    signature: Option<&str>,
    secret: &str,
    now: i64,
    max_age_ms: i64,
) -> Result<(), SessionAuthError> {
    if secret.is_empty() {
        return Ok(());
    }

    let timestamp = timestamp.ok_or(SessionAuthError::MissingTimestamp)?;
    let signature = signature
        .filter(|s| !s.is_empty())
        .ok_or(SessionAuthError::MissingSignature)?;

    validate_timestamp(timestamp, now, max_age_ms)?;

    let expected = calculate_signature(login_id, timestamp, secret);
    if expected.eq_ignore_ascii_case(signature) {
        Ok(())
    } else {
        Err(SessionAuthError::InvalidSignature)
    }
}
