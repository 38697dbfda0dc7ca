//! Time-bounded read-through cache over the capability registry.
//!
//! Entries are keyed by `(id, version)` and by `(id, latest-published)`.
//! Positive entries expire after the configured TTL (default 5 minutes),
//! negative entries after a shorter TTL (default 30 seconds). When the
//! registry is unreachable and an expired entry is still held, the cached
//! manifest is served stale with a marker the pipeline copies onto the
//! policy decision.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::domain::{CapabilityId, CapabilityManifest, CapabilityVersion};

use super::error::Result;
use super::traits::CapabilityRegistry;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
enum CacheKey {
    Version(CapabilityId, CapabilityVersion),
    LatestPublished(CapabilityId),
}

struct CacheEntry {
    /// `None` caches a negative lookup
    manifest: Option<CapabilityManifest>,
    fetched_at: Instant,
}

/// A manifest served from the cache, with staleness marker.
#[derive(Debug, Clone)]
pub struct CachedManifest {
    pub manifest: CapabilityManifest,
    /// True when the registry was unreachable and an expired entry was served
    pub stale: bool,
}

/// Cache hit/miss counters.
#[derive(Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_serves: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn stale_serves(&self) -> u64 {
        self.stale_serves.load(Ordering::Relaxed)
    }
}

/// Read-through TTL cache over an external [`CapabilityRegistry`].
pub struct CapabilityCache {
    registry: Arc<dyn CapabilityRegistry>,
    ttl: Duration,
    negative_ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    stats: CacheStats,
}

impl CapabilityCache {
    pub fn new(registry: Arc<dyn CapabilityRegistry>, ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            negative_ttl,
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Resolve a manifest, hitting the registry only on cache miss.
    ///
    /// Returns `Ok(None)` for a capability the registry does not know
    /// (negatively cached), and an error only when the registry is
    /// unreachable with nothing cached to serve.
    pub async fn get(
        &self,
        id: &CapabilityId,
        version: Option<&CapabilityVersion>,
    ) -> Result<Option<CachedManifest>> {
        let key = match version {
            Some(v) => CacheKey::Version(id.clone(), v.clone()),
            None => CacheKey::LatestPublished(id.clone()),
        };

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                let ttl = if entry.manifest.is_some() {
                    self.ttl
                } else {
                    self.negative_ttl
                };
                if entry.fetched_at.elapsed() < ttl {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.manifest.clone().map(|manifest| CachedManifest {
                        manifest,
                        stale: false,
                    }));
                }
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        match self.registry.get_manifest(id, version.cloned()).await {
            Ok(found) => {
                let mut entries = self.entries.write().await;
                let now = Instant::now();
                if let Some(manifest) = &found {
                    // A latest-published resolution also warms the exact
                    // version key it resolved to.
                    entries.insert(
                        CacheKey::Version(manifest.id.clone(), manifest.version.clone()),
                        CacheEntry {
                            manifest: Some(manifest.clone()),
                            fetched_at: now,
                        },
                    );
                }
                entries.insert(
                    key,
                    CacheEntry {
                        manifest: found.clone(),
                        fetched_at: now,
                    },
                );
                Ok(found.map(|manifest| CachedManifest {
                    manifest,
                    stale: false,
                }))
            }
            Err(e) => {
                // Serve stale if we still hold an expired positive entry.
                let entries = self.entries.read().await;
                if let Some(CacheEntry {
                    manifest: Some(manifest),
                    ..
                }) = entries.get(&key)
                {
                    warn!(capability_id = %id, error = %e, "Registry unreachable; serving stale manifest");
                    self.stats.stale_serves.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(CachedManifest {
                        manifest: manifest.clone(),
                        stale: true,
                    }));
                }
                Err(e)
            }
        }
    }

    /// Drop every entry for a capability id. Called by the routing advisor
    /// after a status transition so the liveness guard observes it promptly.
    pub async fn invalidate(&self, id: &CapabilityId) {
        let mut entries = self.entries.write().await;
        entries.retain(|key, _| match key {
            CacheKey::Version(cached_id, _) | CacheKey::LatestPublished(cached_id) => {
                cached_id != id
            }
        });
        debug!(capability_id = %id, "Capability cache invalidated");
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
