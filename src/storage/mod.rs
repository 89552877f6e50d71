//! Storage capability set: discrete traits a backend implements a la carte,
//! composed by callers into a "Target" (Fetch/Push/Exists/Resolve/Tag) or a
//! full "Repository" (adds reference fetch/push, referrer listing, delete).
//!
//! Modeled as capabilities rather than one fat trait, following the same
//! "small trait per behavior" shape the teacher uses for its cache backends
//! (`OciCache`) and extraction helpers.

mod cursor;
pub mod file;
pub mod limited;
pub mod memory;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use cursor::MemoryCursor;

use crate::descriptor::{BasicDescriptor, Descriptor};
use crate::digest::StreamingHasher;
use crate::error::{Error, Result};

/// A boxed, owned byte stream used for both fetch results and push inputs.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Wrap an in-memory buffer as a [`ByteStream`].
#[must_use]
pub fn stream_from_bytes(bytes: Vec<u8>) -> ByteStream {
    Box::pin(MemoryCursor::new(bytes))
}

/// Drain a [`ByteStream`] while hashing it inline, returning the bytes, the
/// computed digest, and the observed size — the shared primitive behind
/// every backend's `push`.
pub async fn drain_with_hash(mut reader: ByteStream) -> Result<(Vec<u8>, crate::digest::Digest, u64)> {
    use tokio::io::AsyncReadExt;

    let mut hasher = StreamingHasher::new();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        buf.extend_from_slice(&chunk[..n]);
    }
    let size = hasher.observed_size();
    let digest = hasher.finalize();
    Ok((buf, digest, size))
}

/// Verify that bytes read (or about to be written) match a descriptor's
/// declared digest and size, per spec §4.1's push/fetch verification rule.
pub fn verify_descriptor(expected: &Descriptor, digest: &crate::digest::Digest, size: u64) -> Result<()> {
    if size != expected.size {
        return Err(Error::size_mismatch(&expected.digest, expected.size, size));
    }
    if digest.to_string() != expected.digest {
        return Err(Error::digest_mismatch(&expected.digest, &expected.digest, digest.to_string()));
    }
    Ok(())
}

/// True iff content with this digest is present.
#[async_trait]
pub trait Existable: Send + Sync {
    /// Check existence of `target` in this store.
    async fn exists(&self, target: &Descriptor) -> Result<bool>;
}

/// Fetch content by descriptor.
#[async_trait]
pub trait Fetchable: Send + Sync {
    /// Fetch the bytes identified by `target`. Fails with *not found* if absent.
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream>;
}

/// Push content, verified against its declared descriptor.
#[async_trait]
pub trait Pushable: Send + Sync {
    /// Push `content`, which MUST produce exactly `expected.size` bytes
    /// hashing to `expected.digest`. A duplicate push (content already
    /// present) fails with *already exists*, which callers treat as success.
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<()>;
}

/// Resolve a tag/reference string to the descriptor it currently points at.
#[async_trait]
pub trait Resolvable: Send + Sync {
    /// Resolve `reference`. *Not found* if the tag is absent.
    async fn resolve(&self, reference: &str) -> Result<Descriptor>;
}

/// Attach a mutable tag to a descriptor.
#[async_trait]
pub trait Taggable: Send + Sync {
    /// Tag `descriptor` as `reference`. Requires the descriptor to already
    /// exist. Overwrites any previous value for `reference`.
    async fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()>;
}

/// Delete content by descriptor. Optional capability: not every backend
/// supports deletion (some registries reject manifest deletes with 405).
#[async_trait]
pub trait Deletable: Send + Sync {
    /// Remove `target` and update any indices that reference it.
    async fn delete(&self, target: &Descriptor) -> Result<()>;
}

/// Fetch content together with the descriptor a reference resolved to, in
/// one round trip (used by remote repositories, where resolution and fetch
/// share a single HTTP request).
#[async_trait]
pub trait ReferenceFetchable: Send + Sync {
    /// Resolve `reference` and fetch its content in one call.
    async fn fetch_reference(&self, reference: &str) -> Result<(Descriptor, ByteStream)>;
}

/// Push content and tag it under a reference in one call.
#[async_trait]
pub trait ReferencePushable: Send + Sync {
    /// Push `content` as `expected`, then tag it as `reference`.
    async fn push_reference(&self, expected: &Descriptor, content: ByteStream, reference: &str) -> Result<()>;
}

/// Look up the set of nodes that point at a given node in the content graph.
#[async_trait]
pub trait PredecessorFindable: Send + Sync {
    /// The predecessors of `node` — may be empty for nodes with no inbound edges.
    async fn predecessors(&self, node: &Descriptor) -> Result<Vec<Descriptor>>;
}

/// List tags known to this store.
#[async_trait]
pub trait TagListable: Send + Sync {
    /// All known tags, in an implementation-defined but stable order.
    async fn tags(&self) -> Result<Vec<String>>;
}

/// List referrers (manifests whose `subject` points at a given descriptor).
#[async_trait]
pub trait ReferrerListable: Send + Sync {
    /// Referrers of `subject`, optionally filtered by `artifact_type`.
    async fn referrers(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>>;
}

/// Record the basic-descriptor edges of a decoded manifest/index into a
/// predecessor index, shared by the memory and file stores.
pub(crate) fn record_edges(
    index: &mut std::collections::HashMap<BasicDescriptor, std::collections::HashSet<BasicDescriptor>>,
    node: &Descriptor,
    bytes: &[u8],
) {
    let Ok(decoded) = crate::manifest::ManifestOrIndex::decode(bytes, &node.media_type) else {
        return;
    };
    let node_key = node.basic();
    for successor in decoded.successors() {
        index
            .entry(successor.basic())
            .or_default()
            .insert(node_key.clone());
    }
}
