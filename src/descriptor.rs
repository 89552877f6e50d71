//! The content-identity triple and its optional metadata.

use std::collections::HashMap;

use crate::media_type;

/// A content-addressed identity: media type, digest, and size, plus optional
/// metadata. Two descriptors are content-equal iff their (media type, digest,
/// size) triple matches.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Descriptor {
    /// The media type of the referenced content. Never empty.
    #[serde(rename = "mediaType")]
    pub media_type: String,

    /// The digest of the referenced content, e.g. `sha256:...`.
    pub digest: String,

    /// The size, in bytes, of the referenced content.
    pub size: u64,

    /// Alternate URLs the content may be downloaded from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,

    /// Arbitrary string annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,

    /// Inline content, base64-encoded by serde as raw bytes per the OCI spec.
    #[serde(skip_serializing_if = "Option::is_none", with = "base64_opt", default)]
    pub data: Option<Vec<u8>>,

    /// The type of an artifact this descriptor refers to, when it is itself a manifest.
    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// The platform this descriptor targets, for entries in an image index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

mod base64_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use base64::Engine;
        match value {
            Some(bytes) => {
                serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use base64::Engine;
        let opt = Option::<String>::deserialize(deserializer)?;
        opt.map(|s| {
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
    }
}

impl Descriptor {
    /// Construct a descriptor from its required fields.
    #[must_use]
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            urls: None,
            annotations: None,
            data: None,
            artifact_type: None,
            platform: None,
        }
    }

    /// The basic descriptor: just (media type, digest, size), with optional
    /// fields stripped. Two descriptors with the same basic form are
    /// content-equal per the design's CAS key.
    #[must_use]
    pub fn basic(&self) -> BasicDescriptor {
        BasicDescriptor {
            media_type: self.media_type.clone(),
            digest: self.digest.clone(),
            size: self.size,
        }
    }

    /// The value of the `org.opencontainers.image.title` annotation, if set.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_TITLE))
            .map(String::as_str)
    }

    /// Attach a `org.opencontainers.image.title` annotation.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.with_annotation(ANNOTATION_TITLE, title)
    }

    /// Attach an arbitrary annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// The value of a given annotation key, if set.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.as_ref().and_then(|a| a.get(key)).map(String::as_str)
    }
}

/// The `org.opencontainers.image.title` annotation key.
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";

/// The file-store annotation marking content that should be unpacked on push.
pub const ANNOTATION_UNPACK: &str = "io.deis.oras.content.unpack";

/// The file-store annotation carrying the inner (pre-compression) digest of
/// packed directory content.
pub const ANNOTATION_DIGEST: &str = "io.deis.oras.content.digest";

/// The content-identity triple alone, used as a CAS key. Hashable so it can
/// key concurrent maps in the storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicDescriptor {
    /// Media type.
    pub media_type: String,
    /// Digest.
    pub digest: String,
    /// Size in bytes.
    pub size: u64,
}

impl From<&Descriptor> for BasicDescriptor {
    fn from(d: &Descriptor) -> Self {
        d.basic()
    }
}

impl From<Descriptor> for BasicDescriptor {
    fn from(d: Descriptor) -> Self {
        d.basic()
    }
}

/// A platform specification, matching the OCI image-spec `platform` object.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Platform {
    /// CPU architecture, e.g. `"amd64"`.
    pub architecture: String,
    /// Operating system, e.g. `"linux"`.
    pub os: String,
    /// Operating system version, if relevant (mainly Windows).
    #[serde(rename = "os.version", skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    /// Operating system features required.
    #[serde(rename = "os.features", skip_serializing_if = "Option::is_none")]
    pub os_features: Option<Vec<String>>,
    /// CPU variant, e.g. `"v7"` for arm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Construct a platform from architecture and OS alone.
    #[must_use]
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            os_version: None,
            os_features: None,
            variant: None,
        }
    }

    /// Whether `candidate` satisfies this platform selector: architecture and
    /// OS must match exactly, and if this platform specifies a variant, the
    /// candidate must match it too.
    #[must_use]
    pub fn matches(&self, candidate: &Platform) -> bool {
        self.architecture == candidate.architecture
            && self.os == candidate.os
            && (self.variant.is_none() || self.variant == candidate.variant)
    }
}

/// The well-known empty-config descriptor: constant content `{}`, constant
/// digest, media type [`media_type::EMPTY_JSON`].
#[must_use]
pub fn empty_descriptor() -> Descriptor {
    Descriptor::new(media_type::EMPTY_JSON, media_type::EMPTY_DIGEST, 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_descriptor_ignores_optional_fields() {
        let a = Descriptor::new("application/json", "sha256:aa", 3).with_title("a.json");
        let b = Descriptor::new("application/json", "sha256:aa", 3);
        assert_eq!(a.basic(), b.basic());
    }

    #[test]
    fn title_round_trips_through_annotation() {
        let d = Descriptor::new("application/json", "sha256:aa", 3).with_title("hello.txt");
        assert_eq!(d.title(), Some("hello.txt"));
    }

    #[test]
    fn empty_descriptor_matches_well_known_constant() {
        let d = empty_descriptor();
        assert_eq!(d.digest, media_type::EMPTY_DIGEST);
        assert_eq!(d.size, 2);
        assert_eq!(d.media_type, media_type::EMPTY_JSON);
    }

    #[test]
    fn platform_matches_respects_variant() {
        let arm_v7 = Platform {
            architecture: "arm".into(),
            os: "linux".into(),
            os_version: None,
            os_features: None,
            variant: Some("v7".into()),
        };
        let arm_v8 = Platform {
            variant: Some("v8".into()),
            ..arm_v7.clone()
        };
        let arm_generic = Platform::new("arm", "linux");

        assert!(arm_v7.matches(&arm_v7));
        assert!(!arm_v7.matches(&arm_v8));
        assert!(arm_generic.matches(&arm_v7));
    }

    #[test]
    fn serde_round_trip() {
        let d = Descriptor::new("application/vnd.oci.image.layer.v1.tar+gzip", "sha256:bb", 42)
            .with_title("layer.tar.gz");
        let json = serde_json::to_string(&d).unwrap();
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(d, back);
    }
}
