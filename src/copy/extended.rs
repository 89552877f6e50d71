//! `ExtendedCopyGraph`: discover root descriptors by walking predecessors,
//! then `CopyGraph` from each, per spec §4.2.

use std::collections::HashSet;
use std::sync::Arc;

use super::{copy_graph, CopyDestination, CopyGraphOptions, ExtendedCopySource, FindPredecessorsHook};
use crate::descriptor::{BasicDescriptor, Descriptor};
use crate::error::Result;
use crate::storage::PredecessorFindable;

/// Options for [`extended_copy_graph`].
#[derive(Default)]
pub struct ExtendedCopyGraphOptions {
    /// Options for each underlying `CopyGraph` call.
    pub copy_graph: CopyGraphOptions,
    /// How many predecessor levels to walk before stopping; 0 = unlimited.
    pub depth: u32,
    /// Overrides predecessor discovery.
    pub find_predecessors: Option<Arc<dyn FindPredecessorsHook>>,
}

/// Walk predecessors of `node` up to `depth` levels (0 = unlimited) to find
/// root descriptors, then copy the transitive closure of each into `dst`.
pub async fn extended_copy_graph<Src, Dst>(
    src: Arc<Src>,
    dst: Arc<Dst>,
    node: Descriptor,
    options: ExtendedCopyGraphOptions,
) -> Result<()>
where
    Src: ExtendedCopySource + 'static,
    Dst: CopyDestination + 'static,
{
    let roots = discover_roots(src.as_ref(), node, options.depth, &options.find_predecessors).await?;
    for root in roots {
        // Each root gets its own copy-graph options; only the destination
        // and source are shared. Reconstructing avoids threading ownership
        // of hooks through a move inside the loop.
        let per_root_options = CopyGraphOptions {
            concurrency: options.copy_graph.concurrency,
            max_metadata_bytes: options.copy_graph.max_metadata_bytes,
            pre_copy: options.copy_graph.pre_copy.clone(),
            post_copy: options.copy_graph.post_copy.clone(),
            on_copy_skipped: options.copy_graph.on_copy_skipped.clone(),
            mount_from: options.copy_graph.mount_from.clone(),
            mounter: options.copy_graph.mounter.clone(),
            on_mounted: options.copy_graph.on_mounted.clone(),
            find_successors: options.copy_graph.find_successors.clone(),
        };
        copy_graph(src.clone(), dst.clone(), root, per_root_options).await?;
    }
    Ok(())
}

async fn discover_roots<Src>(
    src: &Src,
    start: Descriptor,
    depth: u32,
    find_predecessors: &Option<Arc<dyn FindPredecessorsHook>>,
) -> Result<Vec<Descriptor>>
where
    Src: PredecessorFindable,
{
    let mut frontier = vec![start.clone()];
    let mut visited: HashSet<BasicDescriptor> = HashSet::new();
    visited.insert(start.basic());
    let mut level = 0u32;

    loop {
        if depth != 0 && level >= depth {
            break;
        }
        let mut next_frontier = Vec::new();
        for current in &frontier {
            let predecessors = match find_predecessors {
                Some(hook) => hook.find_predecessors(current).await?,
                None => src.predecessors(current).await?,
            };
            for predecessor in predecessors {
                if visited.insert(predecessor.basic()) {
                    next_frontier.push(predecessor);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
        level += 1;
    }

    Ok(frontier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{stream_from_bytes, Existable, Pushable};

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
    async fn extended_copy_finds_referrer_root_and_copies_it() {
        let src = Arc::new(MemoryStore::new());
        let config = push_bytes(&src, b"{}", crate::media_type::IMAGE_CONFIG).await;
        let subject_manifest = crate::manifest::Manifest::new(config.clone(), vec![]);
        let subject_bytes = serde_json::to_vec(&subject_manifest).unwrap();
        let subject_descriptor = push_bytes(&src, &subject_bytes, crate::media_type::IMAGE_MANIFEST).await;

        let mut referrer = crate::manifest::Manifest::new(config, vec![]);
        referrer.subject = Some(subject_descriptor.clone());
        let referrer_bytes = serde_json::to_vec(&referrer).unwrap();
        let referrer_descriptor = push_bytes(&src, &referrer_bytes, crate::media_type::IMAGE_MANIFEST).await;

        let dst = Arc::new(MemoryStore::new());
        extended_copy_graph(
            src,
            dst.clone(),
            subject_descriptor.clone(),
            ExtendedCopyGraphOptions {
                copy_graph: CopyGraphOptions::new(),
                depth: 0,
                find_predecessors: None,
            },
        )
        .await
        .unwrap();

        assert!(dst.exists(&subject_descriptor).await.unwrap());
        assert!(dst.exists(&referrer_descriptor).await.unwrap());
    }
}
