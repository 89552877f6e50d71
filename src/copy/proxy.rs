//! Manifest-caching read-through decorator over a copy source.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::drain_fetch;
use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::media_type;
use crate::storage::limited::LimitedStore;
use crate::storage::memory::MemoryStore;
use crate::storage::{stream_from_bytes, ByteStream, Existable, Fetchable};

/// Wraps a source storage backend and caches manifest/index bytes in a
/// bounded in-memory store, so that successor discovery and the eventual
/// push of the same node reuse a single fetch.
///
/// Never caches non-manifest content; the cache is explicitly bounded by
/// `max_metadata_bytes` and is expected to be dropped at the end of a copy.
pub struct ManifestCachingProxy<S: ?Sized> {
    inner: Arc<S>,
    cache: LimitedStore<MemoryStore>,
}

impl<S: Fetchable + Existable + ?Sized> ManifestCachingProxy<S> {
    /// Wrap `inner`, capping the manifest cache at `max_metadata_bytes`.
    #[must_use]
    pub fn new(inner: Arc<S>, max_metadata_bytes: u64) -> Self {
        Self {
            inner,
            cache: LimitedStore::new(MemoryStore::new(), max_metadata_bytes),
        }
    }
}

#[async_trait]
impl<S: Fetchable + Existable + Send + Sync + ?Sized> Existable for ManifestCachingProxy<S> {
    async fn exists(&self, target: &Descriptor) -> Result<bool> {
        self.inner.exists(target).await
    }
}

#[async_trait]
impl<S: Fetchable + Existable + Send + Sync + ?Sized> Fetchable for ManifestCachingProxy<S> {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream> {
        if !media_type::is_manifest_or_index(&target.media_type) {
            return self.inner.fetch(target).await;
        }

        if self.cache.exists(target).await? {
            trace!(digest = %target.digest, "manifest cache hit");
            return self.cache.fetch(target).await;
        }

        trace!(digest = %target.digest, "manifest cache miss, fetching from source");
        let bytes = drain_fetch(self.inner.as_ref(), target).await?;
        // Duplicate/size-limit failures are tolerated: the content is still
        // returned to the caller even if it couldn't be cached.
        let _ = self.cache.push(target, stream_from_bytes(bytes.clone())).await;
        Ok(stream_from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{drain_with_hash, Pushable};

    #[tokio::test]
    async fn non_manifest_fetch_bypasses_cache() {
        let source = Arc::new(MemoryStore::new());
        let content = b"a raw blob".to_vec();
        let digest = crate::digest::Digest::from_bytes(&content);
        let descriptor =
            Descriptor::new("application/octet-stream", digest.to_string(), content.len() as u64);
        source
            .push(&descriptor, stream_from_bytes(content.clone()))
            .await
            .unwrap();

        let proxy = ManifestCachingProxy::new(source, 1024);
        let (bytes, _, _) = drain_with_hash(proxy.fetch(&descriptor).await.unwrap()).await.unwrap();
        assert_eq!(bytes, content);
        assert!(!proxy.cache.exists(&descriptor).await.unwrap());
    }

    #[tokio::test]
    async fn manifest_fetch_is_cached_after_first_read() {
        let source = Arc::new(MemoryStore::new());
        let config = Descriptor::new(
            crate::media_type::IMAGE_CONFIG,
            crate::digest::Digest::from_bytes(b"{}").to_string(),
            2,
        );
        source.push(&config, stream_from_bytes(b"{}".to_vec())).await.unwrap();
        let manifest = crate::manifest::Manifest::new(config, vec![]);
        let bytes = serde_json::to_vec(&manifest).unwrap();
        let digest = crate::digest::Digest::from_bytes(&bytes);
        let descriptor = Descriptor::new(crate::media_type::IMAGE_MANIFEST, digest.to_string(), bytes.len() as u64);
        source.push(&descriptor, stream_from_bytes(bytes)).await.unwrap();

        let proxy = ManifestCachingProxy::new(source, 1024);
        proxy.fetch(&descriptor).await.unwrap();
        assert!(proxy.cache.exists(&descriptor).await.unwrap());
    }
}
