//! In-memory cache of active prompt templates
//!
//! Templates change rarely, but every job reads them. A hit is kept for
//! [`HIT_TTL`]; a failed lookup caches "no template" for [`ERROR_TTL`] so a
//! broken database does not get hammered by every job.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::db::prompts::{self, PromptTemplate};

pub const HIT_TTL: Duration = Duration::from_secs(60);
pub const ERROR_TTL: Duration = Duration::from_secs(10);

/// Template service codes
pub const SERVICE_SAJU: &str = "SAJU";
pub const SERVICE_FORTUNE: &str = "FORTUNE";
pub const SERVICE_SAJU_TONE: &str = "SAJU_TONE";

#[derive(Debug, Clone)]
struct CacheEntry {
    template: Option<PromptTemplate>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct PromptCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

fn cache_key(service_code: &str, feature_key: &str, tone_key: &str) -> String {
    format!(
        "{}|{}|{}",
        service_code.trim().to_ascii_uppercase(),
        feature_key.trim().to_ascii_lowercase(),
        tone_key.trim().to_ascii_lowercase()
    )
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active template for the key, `None` when there is none (or lookup failed)
    pub async fn get(
        &self,
        pool: &SqlitePool,
        service_code: &str,
        feature_key: &str,
        tone_key: &str,
    ) -> Option<PromptTemplate> {
        let key = cache_key(service_code, feature_key, tone_key);
        let now = Instant::now();

        if let Some(entry) = self.entries.read().await.get(&key) {
            if entry.expires_at > now {
                return entry.template.clone();
            }
        }

        let service = service_code.trim().to_ascii_uppercase();
        let feature = feature_key.trim().to_ascii_lowercase();
        let tone = tone_key.trim().to_ascii_lowercase();

        let (template, ttl) = match prompts::find_active(pool, &service, &feature, &tone).await {
            Ok(template) => (template, HIT_TTL),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Prompt template lookup failed; using built-in prompt");
                (None, ERROR_TTL)
            }
        };

        self.entries.write().await.insert(
            key,
            CacheEntry {
                template: template.clone(),
                expires_at: now + ttl,
            },
        );
        template
    }

    /// Drop every cached entry (after templates are edited); returns how many went
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}
