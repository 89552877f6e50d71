//! A registry-partitioned cache of acquired tokens, keyed by registry host
//! (and optional tenant) plus the scope set the token was acquired for.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

/// Which scheme a cached token was acquired under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachedScheme {
    /// A base64 `username:password` pair, sent verbatim on every request.
    Basic,
    /// A Bearer token acquired from a token endpoint.
    Bearer,
}

#[derive(Debug, Default)]
struct CacheEntry {
    scheme: Option<CachedScheme>,
    tokens: HashMap<String, String>,
}

/// Caches tokens per `(tenant, host)` cache key and `scope_key`.
///
/// If a fresh token is recorded under a different scheme than the one
/// already cached for a cache key, the whole entry is reset: a registry that
/// switches from Bearer to Basic (or vice versa) invalidates every
/// previously cached scope for it, since a stale scheme otherwise produces a
/// cache hit for the wrong kind of credential.
#[derive(Clone, Default)]
pub struct TokenCache {
    entries: Arc<RwLock<HashMap<String, Arc<Mutex<CacheEntry>>>>>,
}

impl TokenCache {
    /// A cache with nothing stored.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache key for a given tenant (if any) and registry host.
    #[must_use]
    pub fn cache_key(tenant_id: Option<&str>, host: &str) -> String {
        match tenant_id {
            Some(tenant) if !tenant.is_empty() => format!("ORAS_AUTH_{tenant}|{host}"),
            _ => format!("ORAS_AUTH_{host}"),
        }
    }

    async fn entry(&self, key: &str) -> Arc<Mutex<CacheEntry>> {
        if let Some(existing) = self.entries.read().await.get(key) {
            return existing.clone();
        }
        let mut entries = self.entries.write().await;
        entries.entry(key.to_string()).or_default().clone()
    }

    /// Look up a cached token for `key`/`scope_key`, if one exists.
    pub async fn get(&self, key: &str, scope_key: &str) -> Option<(CachedScheme, String)> {
        let entry = self.entry(key).await;
        let entry = entry.lock().await;
        let scheme = entry.scheme?;
        let token = entry.tokens.get(scope_key)?.clone();
        Some((scheme, token))
    }

    /// Record a freshly acquired token.
    pub async fn set(&self, key: &str, scheme: CachedScheme, scope_key: &str, token: String) {
        let entry = self.entry(key).await;
        let mut entry = entry.lock().await;
        if entry.scheme != Some(scheme) {
            entry.scheme = Some(scheme);
            entry.tokens.clear();
        }
        entry.tokens.insert(scope_key.to_string(), token);
    }

    /// Drop a single cached token, e.g. after it was rejected with a fresh
    /// 401 despite having been cached.
    pub async fn invalidate(&self, key: &str, scope_key: &str) {
        if let Some(existing) = self.entries.read().await.get(key) {
            existing.lock().await.tokens.remove(scope_key);
        }
    }
}
