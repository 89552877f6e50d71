//! Name-addressed file store mapped onto a virtual CAS, per spec §4.1.
//!
//! Named content (anything carrying `org.opencontainers.image.title`) is
//! written at its declared name under the working directory; everything
//! else falls through to an in-memory fallback capped at a configurable
//! size. Directories can be packed to a tar+gzip blob and, on push with the
//! corresponding annotation, unpacked back out.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::limited::{LimitedStore, DEFAULT_UNNAMED_CAP_BYTES};
use super::memory::MemoryStore;
use super::{
    drain_with_hash, record_edges, stream_from_bytes, verify_descriptor, ByteStream, Deletable,
    Existable, Fetchable, PredecessorFindable, Pushable, Resolvable, TagListable, Taggable,
};
use crate::descriptor::{self, BasicDescriptor, Descriptor};
use crate::error::{Error, Result};
use crate::media_type;

/// Tunables for a [`FileStore`], mirroring spec §6's `RepositoryOptions`-style
/// plain struct configuration.
#[derive(Debug, Clone)]
pub struct FileStoreOptions {
    /// Allow resolved write paths to escape the working directory.
    pub allow_path_traversal_on_write: bool,
    /// Reject writes that would overwrite an existing file.
    pub disable_overwrite: bool,
    /// Cap, in bytes, on content pushed through the unnamed fallback store.
    pub unnamed_cap_bytes: u64,
    /// Whether to unpack tar+gzip content marked with the unpack annotation.
    pub enable_unpack: bool,
}

impl Default for FileStoreOptions {
    fn default() -> Self {
        Self {
            allow_path_traversal_on_write: false,
            disable_overwrite: false,
            unnamed_cap_bytes: DEFAULT_UNNAMED_CAP_BYTES,
            enable_unpack: true,
        }
    }
}

struct Inner {
    working_dir: PathBuf,
    options: FileStoreOptions,
    digest_to_path: RwLock<HashMap<BasicDescriptor, PathBuf>>,
    descriptors: RwLock<HashMap<BasicDescriptor, Descriptor>>,
    /// Name-to-content registration used for the duplicate-name/write-dedup
    /// check in `push_named`; distinct from `tags`, which tracks mutable
    /// reference pointers (a name is registered once, a tag can be moved).
    names: RwLock<HashMap<String, bool>>,
    /// Mutable tag string -> descriptor map, populated both by named pushes
    /// (the title doubles as a tag) and by `Taggable::tag`, mirroring
    /// `MemoryStore`'s separate tag map per spec §4.1.
    tags: RwLock<HashMap<String, Descriptor>>,
    name_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    predecessors: RwLock<HashMap<BasicDescriptor, HashSet<BasicDescriptor>>>,
    tmp_files: RwLock<Vec<PathBuf>>,
    fallback: LimitedStore<MemoryStore>,
    closed: RwLock<bool>,
}

/// A filesystem-backed store rooted at a working directory, matching the OCI
/// layout convention `<workingDir>/blobs/<alg>/<hex>` for unnamed content and
/// name-addressed paths for everything else.
#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

impl FileStore {
    /// Open (creating if absent) a file store rooted at `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>, options: FileStoreOptions) -> Result<Self> {
        let working_dir = working_dir.into();
        std::fs::create_dir_all(&working_dir)?;
        let fallback = LimitedStore::new(MemoryStore::new(), options.unnamed_cap_bytes);
        Ok(Self {
            inner: Arc::new(Inner {
                working_dir,
                options,
                digest_to_path: RwLock::new(HashMap::new()),
                descriptors: RwLock::new(HashMap::new()),
                names: RwLock::new(HashMap::new()),
                tags: RwLock::new(HashMap::new()),
                name_locks: RwLock::new(HashMap::new()),
                predecessors: RwLock::new(HashMap::new()),
                tmp_files: RwLock::new(Vec::new()),
                fallback,
                closed: RwLock::new(false),
            }),
        })
    }

    async fn ensure_open(&self) -> Result<()> {
        if *self.inner.closed.read().await {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    async fn name_lock(&self, name: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.inner.name_locks.read().await.get(name) {
            return lock.clone();
        }
        let mut locks = self.inner.name_locks.write().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn resolve_path(&self, name: &str) -> Result<PathBuf> {
        let candidate = self.inner.working_dir.join(name);
        if self.inner.options.allow_path_traversal_on_write {
            return Ok(candidate);
        }
        // Resolve lexically: a name store has not been written yet, so the
        // path may not exist on disk for `canonicalize` to normalize. Reject
        // any component that would climb above the working directory.
        let mut depth: i64 = 0;
        for component in Path::new(name).components() {
            match component {
                std::path::Component::ParentDir => depth -= 1,
                std::path::Component::Normal(_) => depth += 1,
                std::path::Component::CurDir => {}
                _ => return Err(Error::PathTraversalDisallowed(name.to_string())),
            }
            if depth < 0 {
                return Err(Error::PathTraversalDisallowed(name.to_string()));
            }
        }
        Ok(candidate)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, bytes)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    async fn push_named(&self, expected: &Descriptor, content: ByteStream, name: &str) -> Result<()> {
        let lock = self.name_lock(name).await;
        let _guard = lock.lock().await;

        if self.inner.names.read().await.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }

        let target_path = self.resolve_path(name)?;
        if target_path.exists() && self.inner.options.disable_overwrite {
            return Err(Error::OverwriteDisallowed(name.to_string()));
        }

        let (bytes, digest, size) = drain_with_hash(content).await?;
        verify_descriptor(expected, &digest, size)?;

        let wants_unpack = self.inner.options.enable_unpack
            && expected.annotation(descriptor::ANNOTATION_UNPACK) == Some("true");

        if wants_unpack {
            self.unpack_tar_gzip(&bytes, expected, &target_path)?;
        } else {
            self.write_atomic(&target_path, &bytes)?;
        }

        if media_type::is_manifest_or_index(&expected.media_type) {
            let mut predecessors = self.inner.predecessors.write().await;
            record_edges(&mut predecessors, expected, &bytes);
        }

        self.inner.names.write().await.insert(name.to_string(), true);
        self.inner
            .digest_to_path
            .write()
            .await
            .insert(expected.basic(), target_path);
        self.inner
            .descriptors
            .write()
            .await
            .insert(expected.basic(), expected.clone());
        // A name doubles as its content's tag, so it stays resolvable even
        // if the descriptor is later re-tagged under another reference.
        self.inner.tags.write().await.insert(name.to_string(), expected.clone());

        debug!(name, digest = %expected.digest, "file store: pushed named content");
        Ok(())
    }

    fn unpack_tar_gzip(&self, bytes: &[u8], expected: &Descriptor, target_dir: &Path) -> Result<()> {
        if let Some(expected_inner) = expected.annotation(descriptor::ANNOTATION_DIGEST) {
            // The annotation records the *tar* (pre-gzip) digest; recompute
            // it from the decompressed stream, since the outer (gzip) digest
            // was already verified against `expected.digest` by the caller.
            let mut decoder = GzDecoder::new(bytes);
            let mut tar_bytes = Vec::new();
            std::io::Read::read_to_end(&mut decoder, &mut tar_bytes)?;
            let actual_inner = crate::digest::Digest::from_bytes(&tar_bytes);
            if actual_inner.to_string() != expected_inner {
                return Err(Error::digest_mismatch(
                    &expected.digest,
                    expected_inner,
                    actual_inner.to_string(),
                ));
            }
            std::fs::create_dir_all(target_dir)?;
            let mut archive = tar::Archive::new(&tar_bytes[..]);
            archive.unpack(target_dir)?;
            return Ok(());
        }
        warn!("unpack annotation set without a content-digest annotation; unpacking unverified");
        std::fs::create_dir_all(target_dir)?;
        let decoder = GzDecoder::new(bytes);
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(target_dir)?;
        Ok(())
    }

    /// Pack a directory into a tar+gzip blob, compute both its outer (gzip)
    /// and inner (tar) digests, and push it as named content. Returns the
    /// resulting descriptor, annotated so a later push elsewhere can unpack it.
    pub async fn add_directory(&self, dir: impl AsRef<Path>, name: &str) -> Result<Descriptor> {
        self.ensure_open().await?;
        let dir = dir.as_ref().to_path_buf();

        // Pack to a real temp file rather than an in-memory buffer, and keep
        // it around (tracked in `tmp_files`) so `close()` has something to
        // dispose of, per the working-directory lifecycle.
        let mut tar_tmp = tempfile::NamedTempFile::new_in(&self.inner.working_dir)?;
        {
            let mut builder = tar::Builder::new(&mut tar_tmp);
            builder.append_dir_all(".", &dir)?;
            builder.finish()?;
        }
        let tar_path = tar_tmp.into_temp_path().keep().map_err(|e| Error::Io(e.error))?;
        self.inner.tmp_files.write().await.push(tar_path.clone());
        let tar_bytes = std::fs::read(&tar_path)?;
        let inner_digest = crate::digest::Digest::from_bytes(&tar_bytes);

        let mut gz_tmp = tempfile::NamedTempFile::new_in(&self.inner.working_dir)?;
        {
            let mut encoder = GzEncoder::new(&mut gz_tmp, Compression::default());
            std::io::Write::write_all(&mut encoder, &tar_bytes)?;
            encoder.finish()?;
        }
        let gz_path = gz_tmp.into_temp_path().keep().map_err(|e| Error::Io(e.error))?;
        self.inner.tmp_files.write().await.push(gz_path.clone());
        let gz_bytes = std::fs::read(&gz_path)?;
        let outer_digest = crate::digest::Digest::from_bytes(&gz_bytes);

        trace!(%inner_digest, %outer_digest, "packed directory");

        let descriptor = Descriptor::new(media_type::DIRECTORY_CONTENT, outer_digest.to_string(), gz_bytes.len() as u64)
            .with_title(name)
            .with_annotation(descriptor::ANNOTATION_UNPACK, "true")
            .with_annotation(descriptor::ANNOTATION_DIGEST, inner_digest.to_string());

        self.push(&descriptor, stream_from_bytes(gz_bytes)).await?;
        Ok(descriptor)
    }

    /// Dispose of this store: delete all registered temporary files and
    /// reject any further operation with *store closed*.
    pub async fn close(&self) -> Result<()> {
        let mut closed = self.inner.closed.write().await;
        if *closed {
            return Ok(());
        }
        for path in self.inner.tmp_files.write().await.drain(..) {
            let _ = std::fs::remove_file(path);
        }
        *closed = true;
        Ok(())
    }
}

#[async_trait]
impl Existable for FileStore {
    async fn exists(&self, target: &Descriptor) -> Result<bool> {
        self.ensure_open().await?;
        if self.inner.digest_to_path.read().await.contains_key(&target.basic()) {
            return Ok(true);
        }
        self.inner.fallback.exists(target).await
    }
}

#[async_trait]
impl Fetchable for FileStore {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream> {
        self.ensure_open().await?;
        let path = self.inner.digest_to_path.read().await.get(&target.basic()).cloned();
        match path {
            Some(path) => {
                let bytes = std::fs::read(&path)?;
                Ok(stream_from_bytes(bytes))
            }
            None => self.inner.fallback.fetch(target).await,
        }
    }
}

#[async_trait]
impl Pushable for FileStore {
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<()> {
        self.ensure_open().await?;
        if self.exists(expected).await? {
            return Err(Error::AlreadyExists(expected.digest.clone()));
        }
        match expected.title() {
            Some(name) => self.push_named(expected, content, name).await,
            None => self.inner.fallback.push(expected, content).await,
        }
    }
}

#[async_trait]
impl Resolvable for FileStore {
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.ensure_open().await?;
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
impl Taggable for FileStore {
    async fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        self.ensure_open().await?;
        if !self.exists(descriptor).await? {
            return Err(Error::not_found(&descriptor.digest));
        }
        // Tagging only moves the independent tag pointer; it must never
        // overwrite `descriptors`, or a content's original name (itself a
        // tag, set by `push_named`) would stop resolving.
        self.inner.tags.write().await.insert(reference.to_string(), descriptor.clone());
        Ok(())
    }
}

#[async_trait]
impl Deletable for FileStore {
    async fn delete(&self, target: &Descriptor) -> Result<()> {
        self.ensure_open().await?;
        let path = self.inner.digest_to_path.write().await.remove(&target.basic());
        match path {
            Some(path) => {
                if path.is_dir() {
                    std::fs::remove_dir_all(&path)?;
                } else {
                    std::fs::remove_file(&path)?;
                }
                self.inner.descriptors.write().await.remove(&target.basic());
                self.inner.predecessors.write().await.remove(&target.basic());
                self.inner.tags.write().await.retain(|_, d| d.basic() != target.basic());
                Ok(())
            }
            None => Err(Error::not_found(&target.digest)),
        }
    }
}

#[async_trait]
impl PredecessorFindable for FileStore {
    async fn predecessors(&self, node: &Descriptor) -> Result<Vec<Descriptor>> {
        self.ensure_open().await?;
        let predecessors = self.inner.predecessors.read().await;
        let Some(keys) = predecessors.get(&node.basic()) else {
            return Ok(Vec::new());
        };
        let descriptors = self.inner.descriptors.read().await;
        Ok(keys.iter().filter_map(|k| descriptors.get(k).cloned()).collect())
    }
}

#[async_trait]
impl TagListable for FileStore {
    async fn tags(&self) -> Result<Vec<String>> {
        self.ensure_open().await?;
        let mut tags: Vec<String> = self.inner.tags.read().await.keys().cloned().collect();
        tags.sort();
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn descriptor_for(content: &[u8], media_type: &str) -> Descriptor {
        let digest = crate::digest::Digest::from_bytes(content);
        Descriptor::new(media_type, digest.to_string(), content.len() as u64)
    }

    #[tokio::test]
    async fn push_and_fetch_unnamed_content_via_fallback() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), FileStoreOptions::default()).unwrap();
        let content = b"unnamed blob".to_vec();
        let descriptor = descriptor_for(&content, "application/octet-stream");

        store.push(&descriptor, stream_from_bytes(content.clone())).await.unwrap();
        assert!(store.exists(&descriptor).await.unwrap());

        let mut fetched = store.fetch(&descriptor).await.unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut fetched, &mut buf).await.unwrap();
        assert_eq!(buf, content);
    }

    #[tokio::test]
    async fn push_named_content_writes_to_working_dir() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), FileStoreOptions::default()).unwrap();
        let content = b"hello.txt contents".to_vec();
        let descriptor = descriptor_for(&content, "text/plain").with_title("hello.txt");

        store.push(&descriptor, stream_from_bytes(content.clone())).await.unwrap();

        let on_disk = std::fs::read(dir.path().join("hello.txt")).unwrap();
        assert_eq!(on_disk, content);
    }

    #[tokio::test]
    async fn duplicate_name_push_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), FileStoreOptions::default()).unwrap();
        let content = b"first".to_vec();
        let descriptor = descriptor_for(&content, "text/plain").with_title("same-name.txt");
        store.push(&descriptor, stream_from_bytes(content)).await.unwrap();

        let other_content = b"second".to_vec();
        let other_descriptor = descriptor_for(&other_content, "text/plain").with_title("same-name.txt");
        let err = store
            .push(&other_descriptor, stream_from_bytes(other_content))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateName(_)));
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), FileStoreOptions::default()).unwrap();
        let content = b"escape".to_vec();
        let descriptor = descriptor_for(&content, "text/plain").with_title("../escape.txt");
        let err = store.push(&descriptor, stream_from_bytes(content)).await.unwrap_err();
        assert!(matches!(err, Error::PathTraversalDisallowed(_)));
    }

    #[tokio::test]
    async fn overwrite_disallowed_when_disabled() {
        let dir = TempDir::new().unwrap();
        let options = FileStoreOptions {
            disable_overwrite: true,
            ..FileStoreOptions::default()
        };
        let store = FileStore::new(dir.path(), options).unwrap();
        std::fs::write(dir.path().join("exists.txt"), b"preexisting").unwrap();

        let content = b"new content".to_vec();
        let descriptor = descriptor_for(&content, "text/plain").with_title("exists.txt");
        let err = store.push(&descriptor, stream_from_bytes(content)).await.unwrap_err();
        assert!(matches!(err, Error::OverwriteDisallowed(_)));
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), FileStoreOptions::default()).unwrap();
        store.close().await.unwrap();

        let content = b"too late".to_vec();
        let descriptor = descriptor_for(&content, "text/plain").with_title("late.txt");
        let err = store.push(&descriptor, stream_from_bytes(content)).await.unwrap_err();
        assert!(matches!(err, Error::StoreClosed));
    }

    #[tokio::test]
    async fn directory_round_trips_through_pack_and_unpack() {
        let src_dir = TempDir::new().unwrap();
        std::fs::write(src_dir.path().join("a.txt"), b"file a").unwrap();
        std::fs::create_dir(src_dir.path().join("sub")).unwrap();
        std::fs::write(src_dir.path().join("sub/b.txt"), b"file b").unwrap();

        let store_dir = TempDir::new().unwrap();
        let store = FileStore::new(store_dir.path(), FileStoreOptions::default()).unwrap();

        let packed = store.add_directory(src_dir.path(), "payload").await.unwrap();
        assert_eq!(packed.annotation(descriptor::ANNOTATION_UNPACK), Some("true"));

        let unpack_dir = TempDir::new().unwrap();
        let unpack_store = FileStore::new(unpack_dir.path(), FileStoreOptions::default()).unwrap();
        let mut fetched = store.fetch(&packed).await.unwrap();
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut fetched, &mut bytes).await.unwrap();

        unpack_store
            .push(&packed.clone().with_title("payload"), stream_from_bytes(bytes))
            .await
            .unwrap();

        let restored = std::fs::read(unpack_dir.path().join("payload/a.txt")).unwrap();
        assert_eq!(restored, b"file a");
        let restored_sub = std::fs::read(unpack_dir.path().join("payload/sub/b.txt")).unwrap();
        assert_eq!(restored_sub, b"file b");
    }

    #[tokio::test]
    async fn tagging_named_content_keeps_the_original_name_resolvable() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path(), FileStoreOptions::default()).unwrap();
        let content = b"hello.txt contents".to_vec();
        let descriptor = descriptor_for(&content, "text/plain").with_title("hello.txt");
        store.push(&descriptor, stream_from_bytes(content)).await.unwrap();

        store.tag(&descriptor, "latest").await.unwrap();

        let by_name = store.resolve("hello.txt").await.unwrap();
        let by_tag = store.resolve("latest").await.unwrap();
        assert_eq!(by_name, descriptor);
        assert_eq!(by_tag, descriptor);

        let mut tags = store.tags().await.unwrap();
        tags.sort();
        assert_eq!(tags, vec!["hello.txt".to_string(), "latest".to_string()]);
    }

    #[tokio::test]
    async fn add_directory_registers_real_temp_files_cleaned_up_on_close() {
        let src_dir = TempDir::new().unwrap();
        std::fs::write(src_dir.path().join("a.txt"), b"file a").unwrap();

        let store_dir = TempDir::new().unwrap();
        let store = FileStore::new(store_dir.path(), FileStoreOptions::default()).unwrap();
        store.add_directory(src_dir.path(), "payload").await.unwrap();

        let tmp_paths = store.inner.tmp_files.read().await.clone();
        assert_eq!(tmp_paths.len(), 2, "tar and gzip temp files should both be tracked");
        for path in &tmp_paths {
            assert!(path.exists());
        }

        store.close().await.unwrap();
        for path in &tmp_paths {
            assert!(!path.exists());
        }
    }
}
