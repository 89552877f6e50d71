//! Manifest and index document types.
//!
//! Both are versioned JSON documents: a [`Manifest`] describes a single
//! artifact (a config plus an ordered list of layers); an [`Index`]
//! describes a collection of manifests, most commonly one per platform.

use std::collections::HashMap;

use crate::descriptor::Descriptor;
use crate::media_type;

/// The only schema version this crate understands.
pub const SCHEMA_VERSION: u32 = 2;

/// An OCI (or Docker-compatible) image manifest: a single config descriptor
/// plus an ordered list of layer descriptors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Manifest {
    /// Always 2.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    /// The manifest's own media type.
    #[serde(rename = "mediaType")]
    pub media_type: String,

    /// Artifact type, for manifests that carry one (OCI 1.1 artifacts).
    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// The image (or artifact) configuration.
    pub config: Descriptor,

    /// Ordered layer descriptors.
    pub layers: Vec<Descriptor>,

    /// The manifest this one refers to, if it is a referrer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    /// Arbitrary annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl Manifest {
    /// Construct a manifest with the OCI image manifest media type.
    #[must_use]
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: media_type::IMAGE_MANIFEST.to_string(),
            artifact_type: None,
            config,
            layers,
            subject: None,
            annotations: None,
        }
    }

    /// The direct successors of this manifest in the copy/predecessor graph:
    /// its config, its layers, and its subject if set.
    #[must_use]
    pub fn successors(&self) -> Vec<Descriptor> {
        let mut out = Vec::with_capacity(self.layers.len() + 2);
        out.push(self.config.clone());
        out.extend(self.layers.iter().cloned());
        if let Some(subject) = &self.subject {
            out.push(subject.clone());
        }
        out
    }

    /// Serialize to canonical JSON (RFC 8785-ish: sorted keys, no insignificant
    /// whitespace) so the resulting bytes digest deterministically regardless
    /// of struct field order.
    pub fn to_canonical_json(&self) -> crate::error::Result<Vec<u8>> {
        canonical_json(self)
    }
}

/// An OCI (or Docker-compatible) image index: an ordered list of manifest
/// descriptors, most often one per platform.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Index {
    /// Always 2.
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    /// The index's own media type.
    #[serde(rename = "mediaType")]
    pub media_type: String,

    /// Artifact type, for OCI 1.1 artifact indexes.
    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// The manifests this index collects.
    pub manifests: Vec<Descriptor>,

    /// The manifest this index refers to, if it is a referrer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    /// Arbitrary annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl Index {
    /// Construct an empty index with the OCI image index media type.
    #[must_use]
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            media_type: media_type::IMAGE_INDEX.to_string(),
            artifact_type: None,
            manifests,
            subject: None,
            annotations: None,
        }
    }

    /// The direct successors of this index: its manifests and its subject if set.
    #[must_use]
    pub fn successors(&self) -> Vec<Descriptor> {
        let mut out = self.manifests.clone();
        if let Some(subject) = &self.subject {
            out.push(subject.clone());
        }
        out
    }

    /// Serialize to canonical JSON. See [`Manifest::to_canonical_json`].
    pub fn to_canonical_json(&self) -> crate::error::Result<Vec<u8>> {
        canonical_json(self)
    }
}

/// Either a [`Manifest`] or an [`Index`], as decoded from raw bytes by
/// inspecting the `mediaType` field (falling back to structural sniffing,
/// since the field is technically optional on the wire for legacy Docker
/// payloads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOrIndex {
    /// A single-artifact manifest.
    Manifest(Manifest),
    /// A collection of manifests.
    Index(Index),
}

impl ManifestOrIndex {
    /// Decode raw bytes whose declared media type is `media_type`.
    pub fn decode(bytes: &[u8], media_type: &str) -> crate::error::Result<Self> {
        if media_type::is_index(media_type) {
            Ok(Self::Index(serde_json::from_slice(bytes)?))
        } else if media_type::is_manifest(media_type) {
            Ok(Self::Manifest(serde_json::from_slice(bytes)?))
        } else {
            // Fall back to structural sniffing: an index has a "manifests" key,
            // a manifest has a "config" key.
            let value: serde_json::Value = serde_json::from_slice(bytes)?;
            if value.get("manifests").is_some() {
                Ok(Self::Index(serde_json::from_slice(bytes)?))
            } else if value.get("config").is_some() {
                Ok(Self::Manifest(serde_json::from_slice(bytes)?))
            } else {
                Err(crate::error::Error::InvalidMediaType(media_type.to_string()))
            }
        }
    }

    /// The direct successors of the wrapped document.
    #[must_use]
    pub fn successors(&self) -> Vec<Descriptor> {
        match self {
            Self::Manifest(m) => m.successors(),
            Self::Index(i) => i.successors(),
        }
    }

    /// The subject descriptor, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&Descriptor> {
        match self {
            Self::Manifest(m) => m.subject.as_ref(),
            Self::Index(i) => i.subject.as_ref(),
        }
    }
}

fn canonical_json(value: &impl serde::Serialize) -> crate::error::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = olpc_cjson::CanonicalFormatter::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    Ok(buf)
}
