//! `CopyGraph` / `Copy`: bounded-concurrency DAG traversal between a source
//! and a destination, per spec §4.2.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

use super::{
    default_successors, drain_fetch, CopyDestination, CopySource, FindSuccessorsHook, HookList,
    MapRootHook, MountFromHook, MountedHook, Mounter, PostCopyHook, PreCopyAction, PreCopyHook,
    SkipHook, DEFAULT_CONCURRENCY, DEFAULT_MAX_METADATA_BYTES,
};
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::media_type;
use crate::storage::{stream_from_bytes, Resolvable, Taggable};

/// Options controlling a single [`copy_graph`] invocation.
pub struct CopyGraphOptions {
    /// Worker-pool size; must be > 0. Default [`DEFAULT_CONCURRENCY`].
    pub concurrency: usize,
    /// Cap on bytes the manifest-caching proxy holds at once.
    pub max_metadata_bytes: u64,
    /// Veto hook invoked once per node, after its successors complete.
    pub pre_copy: Option<Arc<dyn PreCopyHook>>,
    /// Notified after a node is pushed.
    pub post_copy: HookList<dyn PostCopyHook>,
    /// Notified when a node was already present at the destination.
    pub on_copy_skipped: HookList<dyn SkipHook>,
    /// Supplies candidate repositories to mount a blob from.
    pub mount_from: Option<Arc<dyn MountFromHook>>,
    /// Performs the mount itself against the destination registry.
    pub mounter: Option<Arc<dyn Mounter>>,
    /// Notified after a successful mount.
    pub on_mounted: HookList<dyn MountedHook>,
    /// Overrides successor discovery.
    pub find_successors: Option<Arc<dyn FindSuccessorsHook>>,
}

impl CopyGraphOptions {
    /// Options with every default from spec §6.
    #[must_use]
    pub fn new() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            pre_copy: None,
            post_copy: HookList::default(),
            on_copy_skipped: HookList::default(),
            mount_from: None,
            mounter: None,
            on_mounted: HookList::default(),
            find_successors: None,
        }
    }
}

impl Default for CopyGraphOptions {
    /// Delegates to [`CopyGraphOptions::new`] so `CopyGraphOptions::default()`
    /// carries the spec's real defaults (`concurrency =
    /// `[`DEFAULT_CONCURRENCY`]`) rather than Rust's zeroed-field derive,
    /// which `copy_graph` would otherwise reject outright.
    fn default() -> Self {
        Self::new()
    }
}

/// Options for the top-level [`copy`] convenience function.
#[derive(Default)]
pub struct CopyOptions {
    /// Options for the underlying `CopyGraph` traversal.
    pub copy_graph: CopyGraphOptions,
    /// Remaps the resolved root descriptor before the copy begins.
    pub map_root: Option<Arc<dyn MapRootHook>>,
}

struct Shared<Src: ?Sized> {
    src: Arc<Src>,
    semaphore: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
    options: Arc<CopyGraphOptions>,
}

/// Copy the transitive closure of `root` from `src` into `dst`.
///
/// `src` must already be wrapped by a manifest-caching proxy (or any other
/// [`CopySource`]) appropriate for the caller's use case; `copy_graph` does
/// not construct one itself so that callers can share a single proxy/cache
/// across multiple calls.
#[instrument(skip(src, dst, options), fields(digest = %root.digest))]
pub async fn copy_graph<Src, Dst>(
    src: Arc<Src>,
    dst: Arc<Dst>,
    root: Descriptor,
    options: CopyGraphOptions,
) -> Result<()>
where
    Src: CopySource + 'static,
    Dst: CopyDestination + 'static,
{
    if options.concurrency == 0 {
        return Err(Error::Unsupported("CopyGraphOptions.concurrency must be > 0".into()));
    }
    let shared = Arc::new(Shared {
        src,
        semaphore: Arc::new(Semaphore::new(options.concurrency)),
        cancelled: Arc::new(AtomicBool::new(false)),
        options: Arc::new(options),
    });
    copy_node(shared, dst, root).await
}

fn copy_node<Src, Dst>(
    shared: Arc<Shared<Src>>,
    dst: Arc<Dst>,
    node: Descriptor,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>
where
    Src: CopySource + 'static,
    Dst: CopyDestination + 'static,
{
    Box::pin(async move {
        if shared.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let permit = shared
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Cancelled)?;

        if dst.exists(&node).await? {
            drop(permit);
            for hook in &shared.options.on_copy_skipped {
                hook.on_copy_skipped(&node).await;
            }
            debug!(digest = %node.digest, "copy: already present, skipped");
            return Ok(());
        }

        if !media_type::is_manifest_or_index(&node.media_type) {
            if let (Some(candidates_hook), Some(mounter)) = (&shared.options.mount_from, &shared.options.mounter) {
                for repo in candidates_hook.mount_from(&node).await {
                    match mounter.mount(&node, &repo).await {
                        Ok(true) => {
                            for hook in &shared.options.on_mounted {
                                hook.on_mounted(&node, &repo).await;
                            }
                            drop(permit);
                            return Ok(());
                        }
                        Ok(false) => continue,
                        Err(_) => continue,
                    }
                }
            }
        }

        let bytes = match drain_fetch(shared.src.as_ref(), &node).await {
            Ok(bytes) => bytes,
            Err(e) => {
                shared.cancelled.store(true, Ordering::SeqCst);
                drop(permit);
                return Err(e);
            }
        };

        let successors = match &shared.options.find_successors {
            Some(hook) => hook.find_successors(&node, &bytes).await?,
            None => default_successors(&node, &bytes),
        };
        drop(permit);

        if !successors.is_empty() {
            let children = successors
                .into_iter()
                .map(|succ| copy_node(shared.clone(), dst.clone(), succ));
            if let Err(e) = try_join_all(children).await {
                shared.cancelled.store(true, Ordering::SeqCst);
                return Err(e);
            }
        }

        let permit = shared
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Cancelled)?;

        if let Some(hook) = &shared.options.pre_copy {
            match hook.pre_copy(&node).await {
                Ok(PreCopyAction::SkipNode) => {
                    drop(permit);
                    return Ok(());
                }
                Ok(PreCopyAction::Continue) => {}
                Err(e) => {
                    shared.cancelled.store(true, Ordering::SeqCst);
                    drop(permit);
                    return Err(e);
                }
            }
        }

        match dst.push(&node, stream_from_bytes(bytes)).await {
            Ok(()) | Err(Error::AlreadyExists(_)) => {}
            Err(e) => {
                shared.cancelled.store(true, Ordering::SeqCst);
                drop(permit);
                return Err(e);
            }
        }
        drop(permit);

        for hook in &shared.options.post_copy {
            hook.post_copy(&node).await;
        }
        debug!(digest = %node.digest, "copy: pushed");
        Ok(())
    })
}

/// Resolve `src_ref` against `src`, copy its transitive graph into `dst`, and
/// tag the root on `dst` under `dst_ref` (defaulting to `src_ref`).
pub async fn copy<Src, Dst>(
    src: Arc<Src>,
    src_ref: &str,
    dst: Arc<Dst>,
    dst_ref: Option<&str>,
    options: CopyOptions,
) -> Result<Descriptor>
where
    Src: CopySource + Resolvable + 'static,
    Dst: CopyDestination + Taggable + 'static,
{
    let resolved = src.resolve(src_ref).await?;
    let root = match &options.map_root {
        Some(hook) => hook.map_root(&resolved).await?,
        None => resolved,
    };

    copy_graph(src, dst.clone(), root.clone(), options.copy_graph).await?;

    let tag = dst_ref.unwrap_or(src_ref);
    dst.tag(&root, tag).await?;
    info!(%src_ref, dst_ref = %tag, digest = %root.digest, "copy: complete");
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::Pushable;

    async fn push_bytes(store: &MemoryStore, content: &[u8], media_type: &str) -> Descriptor {
        let digest = crate::digest::Digest::from_bytes(content);
        let descriptor = Descriptor::new(media_type, digest.to_string(), content.len() as u64);
        store
            .push(&descriptor, stream_from_bytes(content.to_vec()))
            .await
            .unwrap();
        descriptor
    }

    #[tokio::test]
    async fn copy_graph_copies_full_transitive_closure() {
        let src = Arc::new(MemoryStore::new());
        let config = push_bytes(&src, b"{}", media_type::IMAGE_CONFIG).await;
        let layer = push_bytes(&src, b"layer bytes", media_type::IMAGE_LAYER_GZIP).await;
        let manifest = crate::manifest::Manifest::new(config.clone(), vec![layer.clone()]);
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        let manifest_descriptor = push_bytes(&src, &manifest_bytes, media_type::IMAGE_MANIFEST).await;

        let dst = Arc::new(MemoryStore::new());
        copy_graph(src, dst.clone(), manifest_descriptor.clone(), CopyGraphOptions::new())
            .await
            .unwrap();

        assert!(dst.exists(&config).await.unwrap());
        assert!(dst.exists(&layer).await.unwrap());
        assert!(dst.exists(&manifest_descriptor).await.unwrap());
    }

    #[tokio::test]
    async fn copy_graph_skips_nodes_already_at_destination() {
        let src = Arc::new(MemoryStore::new());
        let config = push_bytes(&src, b"{}", media_type::IMAGE_CONFIG).await;
        let manifest = crate::manifest::Manifest::new(config.clone(), vec![]);
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        let manifest_descriptor = push_bytes(&src, &manifest_bytes, media_type::IMAGE_MANIFEST).await;

        let dst = Arc::new(MemoryStore::new());
        dst.push(&config, stream_from_bytes(b"{}".to_vec())).await.unwrap();

        copy_graph(src, dst.clone(), manifest_descriptor.clone(), CopyGraphOptions::new())
            .await
            .unwrap();
        assert!(dst.exists(&manifest_descriptor).await.unwrap());
    }

    #[tokio::test]
    async fn copy_tags_the_root_on_destination() {
        let src = Arc::new(MemoryStore::new());
        let config = push_bytes(&src, b"{}", media_type::IMAGE_CONFIG).await;
        let manifest = crate::manifest::Manifest::new(config, vec![]);
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        let manifest_descriptor = push_bytes(&src, &manifest_bytes, media_type::IMAGE_MANIFEST).await;
        src.tag(&manifest_descriptor, "v1").await.unwrap();

        let dst = Arc::new(MemoryStore::new());
        let root = copy(src, "v1", dst.clone(), None, CopyOptions::default()).await.unwrap();

        assert_eq!(root, manifest_descriptor);
        assert_eq!(dst.resolve("v1").await.unwrap(), manifest_descriptor);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected() {
        let src = Arc::new(MemoryStore::new());
        let dst = Arc::new(MemoryStore::new());
        let root = push_bytes(&src, b"x", "application/octet-stream").await;
        let options = CopyGraphOptions {
            concurrency: 0,
            ..CopyGraphOptions::new()
        };
        let err = copy_graph(src, dst, root, options).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
