//! In-memory content-addressed store with a separate tag map and a
//! predecessor index, per spec §4.1's "Memory CAS" design.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    drain_with_hash, record_edges, stream_from_bytes, verify_descriptor, ByteStream, Deletable,
    Existable, Fetchable, PredecessorFindable, Pushable, ReferrerListable, Resolvable, TagListable,
    Taggable,
};
use crate::descriptor::{BasicDescriptor, Descriptor};
use crate::error::{Error, Result};

/// A concurrent, in-memory CAS: digest-keyed content, a tag-to-descriptor
/// map, and the reverse-predecessor index used for referrer discovery.
///
/// Cloning is cheap and shares the same underlying storage (all state lives
/// behind `Arc`), matching the teacher's `OciCache`-style handle types.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    content: RwLock<HashMap<BasicDescriptor, Vec<u8>>>,
    descriptors: RwLock<HashMap<BasicDescriptor, Descriptor>>,
    tags: RwLock<HashMap<String, Descriptor>>,
    predecessors: RwLock<HashMap<BasicDescriptor, HashSet<BasicDescriptor>>>,
}

impl MemoryStore {
    /// Construct an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Existable for MemoryStore {
    async fn exists(&self, target: &Descriptor) -> Result<bool> {
        Ok(self.inner.content.read().await.contains_key(&target.basic()))
    }
}

#[async_trait]
impl Fetchable for MemoryStore {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream> {
        let content = self.inner.content.read().await;
        let bytes = content
            .get(&target.basic())
            .cloned()
            .ok_or_else(|| Error::not_found(&target.digest))?;
        Ok(stream_from_bytes(bytes))
    }
}

#[async_trait]
impl Pushable for MemoryStore {
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<()> {
        let key = expected.basic();
        if self.inner.content.read().await.contains_key(&key) {
            return Err(Error::AlreadyExists(expected.digest.clone()));
        }

        let (bytes, digest, size) = drain_with_hash(content).await?;
        verify_descriptor(expected, &digest, size)?;

        let mut content_map = self.inner.content.write().await;
        if content_map.contains_key(&key) {
            return Err(Error::AlreadyExists(expected.digest.clone()));
        }

        if crate::media_type::is_manifest_or_index(&expected.media_type) {
            let mut predecessors = self.inner.predecessors.write().await;
            record_edges(&mut predecessors, expected, &bytes);
        }

        content_map.insert(key.clone(), bytes);
        self.inner
            .descriptors
            .write()
            .await
            .insert(key, expected.clone());
        Ok(())
    }
}

#[async_trait]
impl Resolvable for MemoryStore {
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.inner
            .tags
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found(reference))
    }
}

#[async_trait]
impl Taggable for MemoryStore {
    async fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        if !self.inner.content.read().await.contains_key(&descriptor.basic()) {
            return Err(Error::not_found(&descriptor.digest));
        }
        self.inner
            .tags
            .write()
            .await
            .insert(reference.to_string(), descriptor.clone());
        Ok(())
    }
}

#[async_trait]
impl Deletable for MemoryStore {
    async fn delete(&self, target: &Descriptor) -> Result<()> {
        let key = target.basic();
        let removed = self.inner.content.write().await.remove(&key).is_some();
        if !removed {
            return Err(Error::not_found(&target.digest));
        }
        self.inner.descriptors.write().await.remove(&key);
        self.inner.predecessors.write().await.remove(&key);
        self.inner
            .tags
            .write()
            .await
            .retain(|_, d| d.basic() != key);
        Ok(())
    }
}

#[async_trait]
impl PredecessorFindable for MemoryStore {
    async fn predecessors(&self, node: &Descriptor) -> Result<Vec<Descriptor>> {
        let predecessors = self.inner.predecessors.read().await;
        let Some(keys) = predecessors.get(&node.basic()) else {
            return Ok(Vec::new());
        };
        let descriptors = self.inner.descriptors.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| descriptors.get(k).cloned())
            .collect())
    }
}

#[async_trait]
impl TagListable for MemoryStore {
    async fn tags(&self) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self.inner.tags.read().await.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }
}

#[async_trait]
impl ReferrerListable for MemoryStore {
    async fn referrers(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>> {
        let candidates = self.predecessors(subject).await?;
        let content = self.inner.content.read().await;
        let mut out = Vec::new();
        for candidate in candidates {
            let Some(bytes) = content.get(&candidate.basic()) else {
                continue;
            };
            let Ok(decoded) = crate::manifest::ManifestOrIndex::decode(bytes, &candidate.media_type) else {
                continue;
            };
            let Some(candidate_subject) = decoded.subject() else {
                continue;
            };
            if candidate_subject.basic() != subject.basic() {
                continue;
            }
            if let Some(wanted) = artifact_type {
                if candidate.artifact_type.as_deref() != Some(wanted) {
                    continue;
                }
            }
            out.push(candidate);
        }
        Ok(out)
    }
}
