use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rondo_core::{EngineError, EngineResult, ToolDescriptor};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The static payload eligible for vendor-side caching: everything
/// that stays fixed across rounds of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePayload {
    /// Joined system prompt text.
    pub system_instruction: String,
    /// Canonical (name-sorted) tool schema set.
    pub tool_schemas: Vec<ToolDescriptor>,
    /// Model the cache is bound to; vendors scope caches per model.
    pub model: String,
}

impl CachePayload {
    /// Derives the deterministic cache key: any byte of the system
    /// prompt, tool set, or model changing produces a different key.
    pub fn key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.system_instruction.as_bytes());
        hasher.update([0u8]);
        // serde_json maps are sorted, so this is canonical.
        hasher.update(
            serde_json::to_string(&self.tool_schemas)
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update([0u8]);
        hasher.update(self.model.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// An active vendor-side cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHandle {
    /// Vendor-assigned cache resource name.
    pub name: String,
    /// The payload key this handle was created for.
    pub key: String,
    /// Local expiry estimate, from the vendor TTL.
    pub expires_at: DateTime<Utc>,
}

impl CacheHandle {
    /// Whether the local TTL estimate has lapsed.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Vendor-side cache operations (Gemini cached-content in production,
/// mocks in tests).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Creates a cache entry with the given TTL.
    async fn create(&self, payload: &CachePayload, ttl: Duration) -> EngineResult<CacheHandle>;
    /// Deletes a cache entry. Best-effort.
    async fn delete(&self, name: &str) -> EngineResult<()>;
}

struct Entry {
    handle: Option<CacheHandle>,
}

/// Manages vendor-side context caches keyed by payload hash.
///
/// Purely an optimization: every failure path degrades to "no cache"
/// and never surfaces to the round orchestrator. Concurrent lookups
/// are cheap; creation is serialized per key so two sessions asking
/// for the same payload trigger exactly one vendor call (the second
/// waits for the first).
pub struct ContextCacheManager {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    entries: Mutex<HashMap<String, Arc<Mutex<Entry>>>>,
}

impl ContextCacheManager {
    /// Creates a manager with the vendor-enforced TTL to request.
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    async fn entry_for(&self, key: &str) -> Arc<Mutex<Entry>> {
        let mut entries = self.entries.lock().await;
        entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Entry { handle: None })))
            .clone()
    }

    /// Returns the handle for this payload, creating it on first use
    /// or after expiry. `None` means "proceed uncached".
    pub async fn get_or_create(&self, payload: &CachePayload) -> Option<CacheHandle> {
        let key = payload.key();
        let entry = self.entry_for(&key).await;
        let mut entry = entry.lock().await;

        if let Some(handle) = &entry.handle {
            if !handle.is_expired() {
                return Some(handle.clone());
            }
        }

        match self.backend.create(payload, self.ttl).await {
            Ok(mut handle) => {
                handle.key = key.clone();
                if handle.expires_at <= Utc::now() {
                    handle.expires_at = Utc::now()
                        + ChronoDuration::from_std(self.ttl)
                            .unwrap_or_else(|_| ChronoDuration::seconds(3600));
                }
                info!(key = %key, cache = %handle.name, "created context cache");
                entry.handle = Some(handle.clone());
                Some(handle)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "context cache creation failed; continuing uncached");
                entry.handle = None;
                None
            }
        }
    }

    /// Drops the stored handle for this payload and creates a fresh
    /// one. Used when the vendor reports the handle expired server-side
    /// before the local TTL estimate lapsed.
    pub async fn recreate(&self, payload: &CachePayload) -> Option<CacheHandle> {
        let key = payload.key();
        {
            let entry = self.entry_for(&key).await;
            let mut entry = entry.lock().await;
            if let Some(handle) = entry.handle.take() {
                let _ = self.backend.delete(&handle.name).await;
            }
        }
        self.get_or_create(payload).await
    }

    /// Deletes all known cache entries (start-of-session hygiene).
    pub async fn clear(&self) {
        let entries: Vec<Arc<Mutex<Entry>>> = {
            let mut map = self.entries.lock().await;
            map.drain().map(|(_, v)| v).collect()
        };
        for entry in entries {
            let mut entry = entry.lock().await;
            if let Some(handle) = entry.handle.take() {
                let _ = self.backend.delete(&handle.name).await;
            }
        }
    }

    /// Whether a vendor error looks like an expired or missing cache
    /// handle rather than a genuine request failure.
    pub fn is_expired_handle_error(error: &EngineError) -> bool {
        let text = error.to_string().to_lowercase();
        text.contains("cachedcontent") || (text.contains("cache") && text.contains("not found"))
    }
}
