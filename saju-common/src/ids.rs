//! Identifier generation for results, share links and token references

use uuid::Uuid;

/// New analysis result id (hyphenated UUID v4)
pub fn new_result_id() -> String {
    Uuid::new_v4().to_string()
}

/// New public share token: two UUID v4 values with hyphens removed (64 hex chars)
pub fn new_share_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// New token-ledger reference id, e.g. `SAJU-1700000000000-3fa85f64`
///
/// `prefix` names the consuming service (`SAJU`, `FORTUNE`).
pub fn new_token_reference_id(prefix: &str, now_ms: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, now_ms, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_token_shape() {
        let token = new_share_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_reference_id_is_prefixed_and_unique() {
        let a = new_token_reference_id("SAJU", 42);
        let b = new_token_reference_id("SAJU", 42);
        assert!(a.starts_with("SAJU-42-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_result_ids_differ() {
        assert_ne!(new_result_id(), new_result_id());
    }
}
