//! The graph copy engine (C7): bounded-concurrency DAG traversal between any
//! two storage backends, with manifest caching, cross-repo mount, and
//! pre/post/skip callbacks.
//!
//! Event callbacks are modeled as small async-trait hooks rather than plain
//! closures, per the design note that multicast-style handlers should be
//! ordered lists of callbacks invoked sequentially; fields that report a
//! decision (pre-copy, mount candidates, root remapping) take a single
//! optional hook, while fire-and-forget notifications (`post_copy`,
//! `on_copy_skipped`, `on_mounted`) take a `Vec` so more than one observer
//! can be attached.

pub mod extended;
pub mod graph;
pub mod proxy;

use std::sync::Arc;

use async_trait::async_trait;

use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::storage::{Existable, Fetchable, PredecessorFindable, Pushable};

pub use extended::{extended_copy_graph, ExtendedCopyGraphOptions};
pub use graph::{copy, copy_graph, CopyGraphOptions, CopyOptions};
pub use proxy::ManifestCachingProxy;

/// Default worker-pool size for [`copy_graph`], chosen within the spec's
/// documented 3-10 band.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Default cap on bytes the manifest-caching proxy holds at once.
pub const DEFAULT_MAX_METADATA_BYTES: u64 = 4 * 1024 * 1024;

/// Anything the copy engine can read from: a source Target.
pub trait CopySource: Fetchable + Existable + Send + Sync {}
impl<T: Fetchable + Existable + Send + Sync + ?Sized> CopySource for T {}

/// Anything the copy engine can write to: a destination Target.
pub trait CopyDestination: Fetchable + Pushable + Existable + Send + Sync {}
impl<T: Fetchable + Pushable + Existable + Send + Sync + ?Sized> CopyDestination for T {}

/// A source that also exposes its predecessor graph, required for
/// [`extended_copy_graph`].
pub trait ExtendedCopySource: CopySource + PredecessorFindable {}
impl<T: CopySource + PredecessorFindable + ?Sized> ExtendedCopySource for T {}

/// The outcome of a [`PreCopyHook`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreCopyAction {
    /// Proceed with fetching and pushing this node.
    Continue,
    /// Skip this node entirely (its successors were already copied).
    SkipNode,
}

/// Called once per node, after its successors have all completed, before it
/// is fetched and pushed. May veto the copy.
#[async_trait]
pub trait PreCopyHook: Send + Sync {
    /// Decide whether `node` should be copied.
    async fn pre_copy(&self, node: &Descriptor) -> Result<PreCopyAction>;
}

/// Called after a node has been successfully pushed.
#[async_trait]
pub trait PostCopyHook: Send + Sync {
    /// Notified after `node` is pushed to the destination.
    async fn post_copy(&self, node: &Descriptor);
}

/// Called when a node was already present at the destination and thus skipped.
#[async_trait]
pub trait SkipHook: Send + Sync {
    /// Notified that `node` already existed at the destination.
    async fn on_copy_skipped(&self, node: &Descriptor);
}

/// Supplies candidate source repositories a blob might be mounted from.
#[async_trait]
pub trait MountFromHook: Send + Sync {
    /// Repository names (on the destination registry) to try mounting from.
    async fn mount_from(&self, node: &Descriptor) -> Vec<String>;
}

/// Performs the actual cross-repository mount against a destination registry.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Attempt to mount `descriptor` from `from_repo`. `Ok(true)` means the
    /// mount succeeded and no fetch/push is needed; `Ok(false)` means the
    /// registry declined and the engine should fall back to a normal copy.
    async fn mount(&self, descriptor: &Descriptor, from_repo: &str) -> Result<bool>;
}

/// Called after a successful mount.
#[async_trait]
pub trait MountedHook: Send + Sync {
    /// Notified that `node` was mounted from `from_repo` instead of copied.
    async fn on_mounted(&self, node: &Descriptor, from_repo: &str);
}

/// Overrides successor discovery for a fetched node.
#[async_trait]
pub trait FindSuccessorsHook: Send + Sync {
    /// Compute the direct successors of `node`, given its fetched `content`.
    async fn find_successors(&self, node: &Descriptor, content: &[u8]) -> Result<Vec<Descriptor>>;
}

/// Overrides predecessor discovery during root discovery in
/// [`extended_copy_graph`].
#[async_trait]
pub trait FindPredecessorsHook: Send + Sync {
    /// The predecessors of `node`, used instead of the source's own index.
    async fn find_predecessors(&self, node: &Descriptor) -> Result<Vec<Descriptor>>;
}

/// Remaps the resolved root descriptor before copying, used by [`copy`].
#[async_trait]
pub trait MapRootHook: Send + Sync {
    /// Transform the resolved root descriptor before the copy begins.
    async fn map_root(&self, root: &Descriptor) -> Result<Descriptor>;
}

/// The default successor rule: config + layers (+ subject) for manifests,
/// manifests (+ subject) for indices, none for anything else.
pub(crate) fn default_successors(node: &Descriptor, content: &[u8]) -> Vec<Descriptor> {
    if !crate::media_type::is_manifest_or_index(&node.media_type) {
        return Vec::new();
    }
    match crate::manifest::ManifestOrIndex::decode(content, &node.media_type) {
        Ok(decoded) => decoded.successors(),
        Err(_) => Vec::new(),
    }
}

pub(crate) async fn drain_fetch<S: Fetchable + ?Sized>(src: &S, node: &Descriptor) -> Result<Vec<u8>> {
    let mut stream = src.fetch(node).await?;
    let mut buf = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf).await?;
    Ok(buf)
}

pub(crate) type HookList<T> = Vec<Arc<T>>;
