//! The packer (C10): assemble and push OCI image manifests, v1.0 and v1.1,
//! with validation and timestamp injection.
//!
//! Mirrors the "pack a manifest atop any existing Target" shape used
//! throughout this crate's copy engine: callers hand in layer descriptors
//! already pushed to `target`, and this module builds, pushes, and returns
//! the manifest descriptor tying them together.

use std::collections::HashMap;

use chrono::Utc;

use crate::descriptor::{empty_descriptor, Descriptor};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::media_type;
use crate::storage::{stream_from_bytes, Existable, Pushable};

/// The `org.opencontainers.image.created` annotation key, injected with the
/// current time if the caller didn't supply one.
pub const ANNOTATION_CREATED: &str = "org.opencontainers.image.created";

/// Which manifest shape to pack: OCI 1.1 artifact manifests carry a
/// first-class `artifactType` and `subject`; OCI 1.0 manifests predate both
/// and encode the artifact type as the config's media type instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackManifestVersion {
    /// Pre-1.1 manifest: no manifest-level `artifactType` or `subject`.
    V1_0,
    /// OCI 1.1 manifest: `artifactType` and `subject` are first-class fields.
    V1_1,
}

/// Tunables for [`pack_manifest`].
#[derive(Clone, Default)]
pub struct PackManifestOptions {
    /// A config descriptor already pushed to the target. If absent, the
    /// well-known empty config (or, for [`PackManifestVersion::V1_0`], an
    /// empty config stamped with `artifactType` as its media type) is
    /// pushed and used instead.
    pub config_descriptor: Option<Descriptor>,
    /// Annotations attached to the config descriptor's own content (only
    /// meaningful when this call creates the config).
    pub config_annotations: Option<HashMap<String, String>>,
    /// Annotations attached to the manifest itself.
    pub manifest_annotations: Option<HashMap<String, String>>,
    /// The descriptor this manifest refers to, making it a referrer.
    /// Rejected for [`PackManifestVersion::V1_0`], which has no `subject` field.
    pub subject: Option<Descriptor>,
}

/// Assemble a manifest over `layers`, push it (and any config/layer this
/// call synthesizes) to `target`, and return its descriptor.
///
/// `artifact_type` must be non-empty for [`PackManifestVersion::V1_1`] unless
/// `options.config_descriptor` is set (the config's own media type then
/// stands in for it). For [`PackManifestVersion::V1_0`] it is always
/// required, since it has nowhere else to live but the config's media type.
pub async fn pack_manifest<T>(
    target: &T,
    version: PackManifestVersion,
    artifact_type: &str,
    layers: Vec<Descriptor>,
    options: PackManifestOptions,
) -> Result<Descriptor>
where
    T: Pushable + Existable,
{
    match version {
        PackManifestVersion::V1_1 => pack_v1_1(target, artifact_type, layers, options).await,
        PackManifestVersion::V1_0 => pack_v1_0(target, artifact_type, layers, options).await,
    }
}

async fn pack_v1_1<T>(
    target: &T,
    artifact_type: &str,
    mut layers: Vec<Descriptor>,
    options: PackManifestOptions,
) -> Result<Descriptor>
where
    T: Pushable + Existable,
{
    if artifact_type.is_empty() && options.config_descriptor.is_none() {
        return Err(Error::InvalidMediaType(
            "artifact_type or an explicit config_descriptor is required".to_string(),
        ));
    }

    let config = match options.config_descriptor {
        Some(d) => d,
        None => {
            let annotations = options.config_annotations.unwrap_or_default();
            push_empty_config(target, media_type::EMPTY_JSON, annotations).await?
        }
    };

    if layers.is_empty() {
        layers.push(push_empty_layer(target).await?);
    }

    let mut annotations = options.manifest_annotations.unwrap_or_default();
    inject_created(&mut annotations);

    let manifest = Manifest {
        schema_version: crate::manifest::SCHEMA_VERSION,
        media_type: media_type::IMAGE_MANIFEST.to_string(),
        artifact_type: if artifact_type.is_empty() {
            None
        } else {
            Some(artifact_type.to_string())
        },
        config,
        layers,
        subject: options.subject,
        annotations: Some(annotations),
    };

    push_manifest(target, &manifest).await
}

async fn pack_v1_0<T>(
    target: &T,
    artifact_type: &str,
    mut layers: Vec<Descriptor>,
    options: PackManifestOptions,
) -> Result<Descriptor>
where
    T: Pushable + Existable,
{
    if options.subject.is_some() {
        return Err(Error::Unsupported(
            "subject is not supported on OCI 1.0 manifests".to_string(),
        ));
    }
    if artifact_type.is_empty() && options.config_descriptor.is_none() {
        return Err(Error::InvalidMediaType(
            "artifact_type or an explicit config_descriptor is required".to_string(),
        ));
    }

    let config = match options.config_descriptor {
        Some(d) => d,
        None => {
            let annotations = options.config_annotations.unwrap_or_default();
            push_empty_config(target, artifact_type, annotations).await?
        }
    };

    if layers.is_empty() {
        layers.push(push_empty_layer(target).await?);
    }

    let mut annotations = options.manifest_annotations.unwrap_or_default();
    inject_created(&mut annotations);

    let manifest = Manifest {
        schema_version: crate::manifest::SCHEMA_VERSION,
        media_type: media_type::IMAGE_MANIFEST.to_string(),
        artifact_type: None,
        config,
        layers,
        subject: None,
        annotations: Some(annotations),
    };

    push_manifest(target, &manifest).await
}

fn inject_created(annotations: &mut HashMap<String, String>) {
    annotations
        .entry(ANNOTATION_CREATED.to_string())
        .or_insert_with(|| Utc::now().to_rfc3339());
}

async fn push_empty_config<T>(target: &T, media_type: &str, annotations: HashMap<String, String>) -> Result<Descriptor>
where
    T: Pushable + Existable,
{
    let mut descriptor = Descriptor::new(media_type, crate::media_type::EMPTY_DIGEST, 2);
    if !annotations.is_empty() {
        descriptor.annotations = Some(annotations);
    }
    push_if_absent(target, &descriptor, b"{}".to_vec()).await?;
    Ok(descriptor)
}

async fn push_empty_layer<T>(target: &T) -> Result<Descriptor>
where
    T: Pushable + Existable,
{
    let descriptor = empty_descriptor();
    push_if_absent(target, &descriptor, b"{}".to_vec()).await?;
    Ok(descriptor)
}

async fn push_manifest<T>(target: &T, manifest: &Manifest) -> Result<Descriptor>
where
    T: Pushable + Existable,
{
    let bytes = manifest.to_canonical_json()?;
    let digest = crate::digest::Digest::from_bytes(&bytes);
    let descriptor = Descriptor::new(manifest.media_type.clone(), digest.to_string(), bytes.len() as u64);
    push_if_absent(target, &descriptor, bytes).await?;
    Ok(descriptor)
}

async fn push_if_absent<T>(target: &T, descriptor: &Descriptor, bytes: Vec<u8>) -> Result<()>
where
    T: Pushable + Existable,
{
    if target.exists(descriptor).await? {
        return Ok(());
    }
    match target.push(descriptor, stream_from_bytes(bytes)).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_already_exists() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn v1_1_pack_uses_empty_config_and_layer_when_unset() {
        let store = MemoryStore::new();
        let descriptor = pack_manifest(
            &store,
            PackManifestVersion::V1_1,
            "application/vnd.example.thing",
            Vec::new(),
            PackManifestOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(descriptor.media_type, media_type::IMAGE_MANIFEST);
        assert!(crate::storage::Existable::exists(&store, &descriptor).await.unwrap());
    }

    #[tokio::test]
    async fn v1_1_pack_requires_artifact_type_or_config() {
        let store = MemoryStore::new();
        let err = pack_manifest(
            &store,
            PackManifestVersion::V1_1,
            "",
            Vec::new(),
            PackManifestOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::InvalidMediaType(_)));
    }

    #[tokio::test]
    async fn v1_1_pack_injects_created_annotation_when_absent() {
        let store = MemoryStore::new();
        let descriptor = pack_manifest(
            &store,
            PackManifestVersion::V1_1,
            "application/vnd.example.thing",
            Vec::new(),
            PackManifestOptions::default(),
        )
        .await
        .unwrap();

        let mut stream = crate::storage::Fetchable::fetch(&store, &descriptor).await.unwrap();
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut bytes).await.unwrap();
        let manifest: Manifest = serde_json::from_slice(&bytes).unwrap();
        assert!(manifest.annotations.unwrap().contains_key(ANNOTATION_CREATED));
    }

    #[tokio::test]
    async fn v1_0_pack_rejects_subject() {
        let store = MemoryStore::new();
        let options = PackManifestOptions {
            subject: Some(Descriptor::new(media_type::IMAGE_MANIFEST, "sha256:aa", 1)),
            ..Default::default()
        };
        let err = pack_manifest(
            &store,
            PackManifestVersion::V1_0,
            "application/vnd.example.thing",
            Vec::new(),
            options,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[tokio::test]
    async fn v1_0_pack_encodes_artifact_type_as_config_media_type() {
        let store = MemoryStore::new();
        let descriptor = pack_manifest(
            &store,
            PackManifestVersion::V1_0,
            "application/vnd.example.thing",
            Vec::new(),
            PackManifestOptions::default(),
        )
        .await
        .unwrap();

        let mut stream = crate::storage::Fetchable::fetch(&store, &descriptor).await.unwrap();
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut bytes).await.unwrap();
        let manifest: Manifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(manifest.config.media_type, "application/vnd.example.thing");
        assert!(manifest.artifact_type.is_none());
    }

    #[tokio::test]
    async fn repacking_with_existing_layers_reuses_them_without_synthesizing() {
        let store = MemoryStore::new();
        let layer_bytes = b"layer content".to_vec();
        let layer = Descriptor::new(media_type::IMAGE_LAYER_GZIP, crate::digest::Digest::from_bytes(&layer_bytes).to_string(), layer_bytes.len() as u64);
        crate::storage::Pushable::push(&store, &layer, stream_from_bytes(layer_bytes)).await.unwrap();

        let descriptor = pack_manifest(
            &store,
            PackManifestVersion::V1_1,
            "application/vnd.example.thing",
            vec![layer.clone()],
            PackManifestOptions::default(),
        )
        .await
        .unwrap();

        let mut stream = crate::storage::Fetchable::fetch(&store, &descriptor).await.unwrap();
        let mut bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut bytes).await.unwrap();
        let manifest: Manifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(manifest.layers, vec![layer]);
    }
}
