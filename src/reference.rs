//! Reference parsing: `registry[/repository][:tag|@digest]`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

const DOCKER_HUB_HOST: &str = "docker.io";
const DOCKER_HUB_NETWORK_HOST: &str = "registry-1.docker.io";

static REPOSITORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(([._]|__|-*)[a-z0-9]+)*(/[a-z0-9]+(([._]|__|-*)[a-z0-9]+)*)*$").unwrap()
});

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").unwrap());

/// Which kind of content reference a [`Reference`] carries, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentReference {
    /// No tag or digest was given; the reference names just a repository (or registry).
    None,
    /// A mutable tag.
    Tag(String),
    /// An immutable digest.
    Digest(String),
}

/// A parsed OCI reference: `registry[/repository][:tag|@digest]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    registry: String,
    repository: String,
    content: ContentReference,
}

impl Reference {
    /// The registry host as written in the reference.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// The registry host to actually connect to: `docker.io` is aliased to
    /// `registry-1.docker.io` for network purposes, matching Docker Hub's
    /// split between its user-facing name and its distribution endpoint.
    #[must_use]
    pub fn network_host(&self) -> &str {
        if self.registry == DOCKER_HUB_HOST {
            DOCKER_HUB_NETWORK_HOST
        } else {
            &self.registry
        }
    }

    /// The repository path, empty if none was given.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// The tag, if the content reference is a tag.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.content {
            ContentReference::Tag(t) => Some(t),
            _ => None,
        }
    }

    /// The digest, if the content reference is a digest.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        match &self.content {
            ContentReference::Digest(d) => Some(d),
            _ => None,
        }
    }

    /// The tag-or-digest string suitable for use as a manifest URL `reference`
    /// path segment, if one was given.
    #[must_use]
    pub fn content_reference(&self) -> Option<&str> {
        match &self.content {
            ContentReference::None => None,
            ContentReference::Tag(t) => Some(t),
            ContentReference::Digest(d) => Some(d),
        }
    }

    /// Build a new reference on the same registry/repository but with a
    /// different tag.
    #[must_use]
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            content: ContentReference::Tag(tag.into()),
        }
    }

    /// Build a new reference on the same registry/repository but with a
    /// different digest.
    #[must_use]
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            content: ContentReference::Digest(digest.into()),
        }
    }

    /// Parse a reference string.
    ///
    /// Unlike Docker's reference grammar, an absent content reference is
    /// valid and is *not* defaulted to `:latest` — the design treats
    /// "registry/repo" as a complete reference with no content reference.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::invalid_reference(s, "reference is empty"));
        }

        // Split off a trailing "@digest" first, since digests may themselves
        // contain ':' and must not be confused with a tag separator.
        let (before_digest, digest) = match s.rsplit_once('@') {
            Some((left, right)) => (left, Some(right)),
            None => (s, None),
        };

        // The registry is the part before the first '/'; everything else is
        // the repository. A reference with no '/' names just a registry.
        let (registry, rest) = match before_digest.split_once('/') {
            Some((registry, rest)) => (registry, rest),
            None => (before_digest, ""),
        };
        if registry.is_empty() {
            return Err(Error::invalid_reference(s, "registry must not be empty"));
        }

        let (repository, tag) = match rest.rsplit_once(':') {
            // A ':' inside a host:port style registry has already been
            // consumed above; here we're splitting the repository from an
            // optional trailing tag. Guard against a ':' that is actually
            // part of a port by requiring the repository portion be non-empty
            // once rest itself is non-empty.
            Some((repo, tag)) if !rest.is_empty() => (repo, Some(tag)),
            _ => (rest, None),
        };

        if !repository.is_empty() && !REPOSITORY_RE.is_match(repository) {
            return Err(Error::invalid_reference(
                s,
                format!("invalid repository '{repository}'"),
            ));
        }
        if let Some(tag) = tag {
            if !TAG_RE.is_match(tag) {
                return Err(Error::invalid_reference(s, format!("invalid tag '{tag}'")));
            }
        }
        if let Some(digest) = digest {
            crate::digest::Digest::parse(digest)
                .map_err(|e| Error::invalid_reference(s, format!("invalid digest: {e}")))?;
        }

        let content = match (tag, digest) {
            (_, Some(d)) => ContentReference::Digest(d.to_string()),
            (Some(t), None) => ContentReference::Tag(t.to_string()),
            (None, None) => ContentReference::None,
        };

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            content,
        })
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.registry)?;
        if !self.repository.is_empty() {
            write!(f, "/{}", self.repository)?;
        }
        match &self.content {
            ContentReference::None => {}
            ContentReference::Tag(t) => write!(f, ":{t}")?,
            ContentReference::Digest(d) => write!(f, "@{d}")?,
        }
        Ok(())
    }
}

impl std::str::FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)
    }
}
