//! Well-known OCI and Docker media type constants.

/// OCI image manifest.
pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image config.
pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
/// OCI "empty" descriptor payload media type.
pub const EMPTY_JSON: &str = "application/vnd.oci.empty.v1+json";
/// OCI image layer (uncompressed tar).
pub const IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
/// OCI image layer (gzip-compressed tar).
pub const IMAGE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// OCI image layer (zstd-compressed tar).
pub const IMAGE_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
/// OCI non-distributable image layer (uncompressed tar).
pub const IMAGE_LAYER_NONDISTRIBUTABLE: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar";
/// OCI non-distributable image layer (gzip-compressed tar).
pub const IMAGE_LAYER_NONDISTRIBUTABLE_GZIP: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";

/// Docker manifest v2 schema 2.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// Docker container image config.
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// Docker foreign (non-distributable) layer.
pub const DOCKER_FOREIGN_LAYER: &str = "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

/// Media type used by the file store for directory content packed as tar+gzip,
/// before it is unpacked on push.
pub const DIRECTORY_CONTENT: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// The digest of the canonical empty JSON object `{}`, used by [`EMPTY_JSON`].
pub const EMPTY_DIGEST: &str =
    "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a";

/// Default set of media types accepted when fetching a manifest, matching
/// the design's default `Accept` list.
#[must_use]
pub fn default_manifest_media_types() -> Vec<String> {
    vec![
        IMAGE_MANIFEST.to_string(),
        IMAGE_INDEX.to_string(),
        DOCKER_MANIFEST_LIST.to_string(),
        DOCKER_MANIFEST.to_string(),
    ]
}

/// True if `media_type` identifies a manifest (single-artifact) document,
/// as opposed to an index.
#[must_use]
pub fn is_manifest(media_type: &str) -> bool {
    matches!(media_type, IMAGE_MANIFEST | DOCKER_MANIFEST)
}

/// True if `media_type` identifies an index (multi-manifest) document.
#[must_use]
pub fn is_index(media_type: &str) -> bool {
    matches!(media_type, IMAGE_INDEX | DOCKER_MANIFEST_LIST)
}

/// True if `media_type` identifies any manifest or index document this crate
/// knows how to decode successors from.
#[must_use]
pub fn is_manifest_or_index(media_type: &str) -> bool {
    is_manifest(media_type) || is_index(media_type)
}
