use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use insight_core::{Result, TaskId};

use crate::artifacts::VersionRegistry;

/// Cache capability. Both `get` and `set` are fallible so that a backend
/// outage can be observed and degraded around; callers of
/// [`ArtifactLoadCache`] never see these errors.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;
    /// Reset the TTL of an existing entry.
    async fn touch(&self, key: &str, ttl: Duration) -> Result<()>;
}

// ===== In-memory backend =====

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Process-local TTL cache on a concurrent map.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.value.clone()));
            }
        }
        // Expired entries are dropped on the read path.
        self.entries
            .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn touch(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
        Ok(())
    }
}

// ===== Artifact load memoization =====

/// Default time-to-live for cached artifacts: 30 minutes.
pub const DEFAULT_ARTIFACT_TTL: Duration = Duration::from_secs(30 * 60);

/// Memoizes artifact loads behind a (name, scope, version) key.
///
/// A "latest" request is resolved to the concrete latest version through the
/// registry before the cache is consulted, so only explicit-version keys
/// exist and a newly registered version is picked up on the next resolve.
/// Cache backend errors degrade to a direct load; they are logged and never
/// surfaced to the caller.
pub struct ArtifactLoadCache {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl ArtifactLoadCache {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub fn with_default_ttl(cache: Arc<dyn Cache>) -> Self {
        Self::new(cache, DEFAULT_ARTIFACT_TTL)
    }

    fn cache_key(name: &str, scope: Option<&TaskId>, version: u32) -> String {
        let scope = scope.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
        format!("artifact_cache:{name}:{scope}:v{version}")
    }

    /// Fetch an artifact through the cache, falling back to `loader` on a
    /// miss. On a hit the TTL is refreshed and `loader` is not called.
    pub async fn get_or_load<F, Fut>(
        &self,
        registry: &VersionRegistry,
        name: &str,
        scope: Option<&TaskId>,
        version: Option<u32>,
        loader: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce(u32) -> Fut,
        Fut: Future<Output = Result<Vec<u8>>>,
    {
        let version = match version {
            Some(version) => version,
            None => registry.latest_version(name, scope)?,
        };
        let key = Self::cache_key(name, scope, version);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => {
                if let Err(err) = self.cache.touch(&key, self.ttl).await {
                    tracing::debug!(key, %err, "cache touch failed");
                }
                tracing::debug!(key, "artifact cache hit");
                return Ok(bytes);
            }
            Ok(None) => {}
            Err(err) => {
                // Fail-open: an unavailable cache backend reads as a miss.
                tracing::warn!(key, %err, "cache read failed, loading directly");
            }
        }

        let bytes = loader(version).await?;

        if let Err(err) = self.cache.set(&key, bytes.clone(), self.ttl).await {
            tracing::warn!(key, %err, "cache write failed, continuing");
        }
        Ok(bytes)
    }
}
