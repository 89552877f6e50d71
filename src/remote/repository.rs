//! [`Repository`]: the OCI Distribution v2 client, implementing this
//! crate's storage capability traits against a single `host/name` pair on a
//! remote registry, per spec §4.3.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use tracing::{debug, instrument, trace, warn};

use super::upload::UploadSession;
use super::url;
use super::{decode_error_response, HttpClient};
use crate::copy::Mounter;
use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::manifest::{Index, ManifestOrIndex};
use crate::media_type;
use crate::reference::Reference;
use crate::storage::{
    drain_with_hash, stream_from_bytes, ByteStream, Deletable, Existable, Fetchable,
    ReferenceFetchable, ReferencePushable, ReferrerListable, Resolvable, Taggable, TagListable,
};

/// Default cap on bytes the repository will read into memory for a single
/// manifest/index fetch or the referrers-tag-schema fallback document.
pub const DEFAULT_MAX_METADATA_BYTES: u64 = 4 * 1024 * 1024;

/// Tunables for a [`Repository`], constructed with plain struct literals /
/// `..Default::default()` per spec §6's `RepositoryOptions`.
#[derive(Clone)]
pub struct RepositoryOptions {
    /// Use `http://` instead of `https://`.
    pub plain_http: bool,
    /// `Accept` list for manifest GET/HEAD, in preference order.
    pub manifest_media_types: Vec<String>,
    /// `?n=` page size hint for tag listing; `0` lets the registry choose.
    pub tag_list_page_size: u32,
    /// Cap on bytes read into memory for a single manifest/index.
    pub max_metadata_bytes: u64,
    /// Partitions the token cache for multi-tenant callers; unused directly
    /// by `Repository` but threaded through to the `AuthClient` callers
    /// construct alongside it.
    pub tenant_id: Option<String>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            plain_http: false,
            manifest_media_types: media_type::default_manifest_media_types(),
            tag_list_page_size: 0,
            max_metadata_bytes: DEFAULT_MAX_METADATA_BYTES,
            tenant_id: None,
        }
    }
}

/// Whether a registry has been observed to support the referrers API.
/// Guards against races: once set, it may only be set again to the same
/// value (spec §4.3's "referrers state already set").
#[derive(Default)]
struct ReferrersState(AtomicU8);

const STATE_UNKNOWN: u8 = 0;
const STATE_SUPPORTED: u8 = 1;
const STATE_UNSUPPORTED: u8 = 2;

impl ReferrersState {
    fn get(&self) -> Option<bool> {
        match self.0.load(Ordering::SeqCst) {
            STATE_SUPPORTED => Some(true),
            STATE_UNSUPPORTED => Some(false),
            _ => None,
        }
    }

    fn set(&self, supported: bool) -> Result<()> {
        let target = if supported { STATE_SUPPORTED } else { STATE_UNSUPPORTED };
        match self.0.compare_exchange(STATE_UNKNOWN, target, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => Ok(()),
            Err(existing) if existing == target => Ok(()),
            Err(existing) => Err(Error::ReferrersStateAlreadySet {
                existing: existing == STATE_SUPPORTED,
                attempted: supported,
            }),
        }
    }
}

/// An OCI Distribution v2 repository client bound to one `host/name`.
///
/// Generic over [`HttpClient`] so callers can pass a plain [`reqwest::Client`]
/// for anonymous registries or an [`crate::auth::AuthClient`] for ones that
/// require the token challenge protocol; `Repository` itself is agnostic.
pub struct Repository {
    host: String,
    name: String,
    client: Arc<dyn HttpClient>,
    options: RepositoryOptions,
    referrers_state: ReferrersState,
}

impl Repository {
    /// Bind a client to `reference`'s registry/repository.
    #[must_use]
    pub fn new(reference: &Reference, client: Arc<dyn HttpClient>, options: RepositoryOptions) -> Self {
        Self {
            host: reference.network_host().to_string(),
            name: reference.repository().to_string(),
            client,
            options,
            referrers_state: ReferrersState::default(),
        }
    }

    fn accept_header(&self) -> String {
        self.options.manifest_media_types.join(", ")
    }

    fn blob_url(&self, digest: &str) -> String {
        url::blob(&self.host, self.options.plain_http, &self.name, digest)
    }

    fn manifest_url(&self, reference: &str) -> String {
        url::manifest(&self.host, self.options.plain_http, &self.name, reference)
    }

    /// `HEAD /v2/<name>/manifests/<reference>`.
    #[instrument(skip(self), fields(repo = %self.name, reference))]
    pub async fn head_manifest(&self, reference: &str) -> Result<Descriptor> {
        let url = self.manifest_url(reference);
        let request = self.client.head(&url).header(ACCEPT, self.accept_header()).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::OK => descriptor_from_headers(reference, &response),
            StatusCode::NOT_FOUND => Err(Error::not_found(reference)),
            status => Err(decode_error_response("HEAD", &url, status, response).await),
        }
    }

    /// `GET /v2/<name>/manifests/<reference>`, verifying the read bytes
    /// against the resolved digest (the tag case) or the requested digest
    /// (the digest case).
    #[instrument(skip(self), fields(repo = %self.name, reference))]
    pub async fn get_manifest(&self, reference: &str) -> Result<(Descriptor, Vec<u8>)> {
        let url = self.manifest_url(reference);
        let request = self.client.get(&url).header(ACCEPT, self.accept_header()).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::OK => {
                let media_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(media_type::IMAGE_MANIFEST)
                    .to_string();
                let header_digest = response
                    .headers()
                    .get("docker-content-digest")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let bytes = response.bytes().await?.to_vec();
                if bytes.len() as u64 > self.options.max_metadata_bytes {
                    return Err(Error::SizeLimitExceeded {
                        size: bytes.len() as u64,
                        limit: self.options.max_metadata_bytes,
                    });
                }
                let computed = Digest::from_bytes(&bytes).to_string();

                // Self-consistency: a declared `Docker-Content-Digest` must match
                // the bytes actually read, tag or digest reference alike.
                if let Some(declared) = &header_digest {
                    if *declared != computed {
                        return Err(Error::digest_mismatch(reference, declared.clone(), computed));
                    }
                }

                // The digest case: the reference itself names a digest, so the
                // content read back must hash to exactly that, independent of
                // whatever (possibly absent, possibly merely self-consistent)
                // header the registry sent.
                let requested_digest = Digest::parse(reference).ok().map(|d| d.to_string());
                if let Some(requested) = &requested_digest {
                    if *requested != computed {
                        return Err(Error::digest_mismatch(reference, requested.clone(), computed));
                    }
                }

                let digest = requested_digest.or(header_digest).unwrap_or(computed);
                let descriptor = Descriptor::new(media_type, digest, bytes.len() as u64);
                Ok((descriptor, bytes))
            }
            StatusCode::NOT_FOUND => Err(Error::not_found(reference)),
            status => Err(decode_error_response("GET", &url, status, response).await),
        }
    }

    /// `PUT /v2/<name>/manifests/<reference>` with `bytes` verbatim.
    #[instrument(skip(self, bytes), fields(repo = %self.name, reference, len = bytes.len()))]
    pub async fn put_manifest(&self, reference: &str, media_type: &str, bytes: Vec<u8>) -> Result<Descriptor> {
        let url = self.manifest_url(reference);
        let digest = Digest::from_bytes(&bytes).to_string();
        let size = bytes.len() as u64;
        let request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, media_type)
            .header(CONTENT_LENGTH, size)
            .body(bytes)
            .build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::ACCEPTED => {
                debug!(%digest, "put_manifest: accepted");
                Ok(Descriptor::new(media_type, digest, size))
            }
            status => Err(decode_error_response("PUT", &url, status, response).await),
        }
    }

    /// `DELETE /v2/<name>/manifests/<reference>`.
    pub async fn delete_manifest(&self, reference: &str) -> Result<()> {
        let url = self.manifest_url(reference);
        let request = self.client.delete(&url).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::not_found(reference)),
            StatusCode::METHOD_NOT_ALLOWED => Err(Error::Unsupported("manifest deletion".into())),
            status => Err(decode_error_response("DELETE", &url, status, response).await),
        }
    }

    /// `HEAD /v2/<name>/blobs/<digest>`.
    pub async fn head_blob(&self, digest: &str) -> Result<bool> {
        let url = self.blob_url(digest);
        let request = self.client.head(&url).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(decode_error_response("HEAD", &url, status, response).await),
        }
    }

    /// `GET /v2/<name>/blobs/<digest>`, verifying size and digest of the
    /// bytes actually read against `digest`.
    pub async fn get_blob(&self, digest: &str) -> Result<Vec<u8>> {
        let url = self.blob_url(digest);
        let request = self.client.get(&url).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::OK => {
                let bytes = response.bytes().await?.to_vec();
                let computed = Digest::from_bytes(&bytes).to_string();
                if computed != digest {
                    return Err(Error::digest_mismatch(digest, digest, computed));
                }
                Ok(bytes)
            }
            StatusCode::NOT_FOUND => Err(Error::not_found(digest)),
            status => Err(decode_error_response("GET", &url, status, response).await),
        }
    }

    /// `POST /v2/<name>/blobs/uploads/` then `PUT <location>?digest=...`,
    /// skipping the round trip entirely if the blob already exists.
    #[instrument(skip(self, bytes), fields(repo = %self.name, digest = %digest, len = bytes.len()))]
    pub async fn push_blob(&self, digest: &str, bytes: Vec<u8>) -> Result<()> {
        if self.head_blob(digest).await? {
            return Err(Error::AlreadyExists(digest.to_string()));
        }
        let start_url = url::blob_uploads(&self.host, self.options.plain_http, &self.name);
        let session = UploadSession::start(self.client.as_ref(), &start_url).await?;
        session.complete(self.client.as_ref(), digest, bytes).await
    }

    /// `DELETE /v2/<name>/blobs/<digest>`.
    pub async fn delete_blob(&self, digest: &str) -> Result<()> {
        let url = self.blob_url(digest);
        let request = self.client.delete(&url).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::not_found(digest)),
            StatusCode::METHOD_NOT_ALLOWED => Err(Error::Unsupported("blob deletion".into())),
            status => Err(decode_error_response("DELETE", &url, status, response).await),
        }
    }

    /// Issue a blob `GET` without following any redirect the registry
    /// returns, surfacing the `Location` it points at.
    ///
    /// Correctness here depends on the underlying [`HttpClient`]'s
    /// [`reqwest::Client`] being built with `redirect::Policy::none()` —
    /// reqwest's redirect handling is configured per-client, not per-request,
    /// so a caller intending to use this must build their client that way.
    pub async fn blob_location(&self, digest: &str) -> Result<Option<String>> {
        let url = self.blob_url(digest);
        let request = self.client.get(&url).build()?;
        let response = self.client.execute(request).await?;
        if response.status().is_redirection() {
            return Ok(response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string));
        }
        Ok(None)
    }

    /// List every tag known to this repository, following `Link` headers
    /// across pages.
    pub async fn list_tags(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut next = Some(self.first_tags_url());
        while let Some(url) = next {
            let request = self.client.get(&url).build()?;
            let response = self.client.execute(request).await?;
            let status = response.status();
            if status != StatusCode::OK {
                return Err(decode_error_response("GET", &url, status, response).await);
            }
            next = next_link(&response);
            let body: TagsList = response.json().await?;
            out.extend(body.tags);
        }
        Ok(out)
    }

    fn first_tags_url(&self) -> String {
        let base = url::tags_list(&self.host, self.options.plain_http, &self.name);
        if self.options.tag_list_page_size > 0 {
            format!("{base}?n={}", self.options.tag_list_page_size)
        } else {
            base
        }
    }

    /// `GET /v2/_catalog`, following `Link` headers across pages.
    pub async fn catalog(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut next = Some(url::catalog(&self.host, self.options.plain_http));
        while let Some(url) = next {
            let request = self.client.get(&url).build()?;
            let response = self.client.execute(request).await?;
            let status = response.status();
            if status != StatusCode::OK {
                return Err(decode_error_response("GET", &url, status, response).await);
            }
            next = next_link(&response);
            let body: CatalogList = response.json().await?;
            out.extend(body.repositories);
        }
        Ok(out)
    }

    /// Referrers of `subject`, via the native API when supported, falling
    /// back to the referrers-tag-schema index otherwise.
    #[instrument(skip(self), fields(repo = %self.name, subject = %subject.digest))]
    pub async fn list_referrers(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>> {
        if self.referrers_state.get() != Some(false) {
            match self.try_native_referrers(subject, artifact_type).await? {
                Some(descriptors) => {
                    self.referrers_state.set(true)?;
                    return Ok(descriptors);
                }
                None => {
                    self.referrers_state.set(false)?;
                }
            }
        }
        warn!(subject = %subject.digest, "referrers API unsupported, falling back to tag schema");
        self.referrers_via_tag_schema(subject, artifact_type).await
    }

    async fn try_native_referrers(
        &self,
        subject: &Descriptor,
        artifact_type: Option<&str>,
    ) -> Result<Option<Vec<Descriptor>>> {
        let mut req_url = url::referrers(&self.host, self.options.plain_http, &self.name, &subject.digest);
        if let Some(at) = artifact_type {
            req_url = format!("{req_url}?artifactType={at}");
        }
        let request = self.client.get(&req_url).header(ACCEPT, media_type::IMAGE_INDEX).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::OK => {
                let server_filtered = response
                    .headers()
                    .get("oci-filters-applied")
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|v| v.contains("artifactType"));
                let bytes = response.bytes().await?;
                let index: Index = serde_json::from_slice(&bytes)?;
                let manifests = if server_filtered {
                    index.manifests
                } else {
                    filter_by_artifact_type(index.manifests, artifact_type)
                };
                Ok(Some(manifests))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(decode_error_response("GET", &req_url, status, response).await),
        }
    }

    async fn referrers_via_tag_schema(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>> {
        let tag = url::referrers_tag_schema(&subject.digest);
        match self.get_manifest(&tag).await {
            Ok((_, bytes)) => {
                let index: Index = serde_json::from_slice(&bytes)?;
                Ok(filter_by_artifact_type(index.manifests, artifact_type))
            }
            Err(Error::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// After pushing a manifest whose `subject` is set, keep the
    /// referrers-tag-schema index current when the registry is known not to
    /// support the native referrers API.
    async fn maybe_update_referrers_index(&self, manifest: &Descriptor, subject: &Descriptor) -> Result<()> {
        if self.referrers_state.get().is_none() {
            // Unknown: probe once so we don't maintain a shadow index a
            // registry with native support will just ignore.
            let supported = self.try_native_referrers(subject, None).await?.is_some();
            self.referrers_state.set(supported)?;
        }
        if self.referrers_state.get() != Some(false) {
            return Ok(());
        }

        let tag = url::referrers_tag_schema(&subject.digest);
        let mut index = match self.get_manifest(&tag).await {
            Ok((_, bytes)) => serde_json::from_slice::<Index>(&bytes)?,
            Err(Error::NotFound(_)) => Index::new(Vec::new()),
            Err(e) => return Err(e),
        };
        let already_present = index.manifests.iter().any(|m| m.basic() == manifest.basic());
        if already_present {
            return Ok(());
        }
        index.manifests.push(manifest.clone());
        let bytes = index.to_canonical_json()?;
        self.put_manifest(&tag, &index.media_type, bytes).await?;
        Ok(())
    }
}

fn filter_by_artifact_type(manifests: Vec<Descriptor>, artifact_type: Option<&str>) -> Vec<Descriptor> {
    match artifact_type {
        Some(at) => manifests
            .into_iter()
            .filter(|m| m.artifact_type.as_deref() == Some(at))
            .collect(),
        None => manifests,
    }
}

fn descriptor_from_headers(reference: &str, response: &reqwest::Response) -> Result<Descriptor> {
    let media_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(media_type::IMAGE_MANIFEST)
        .to_string();
    let digest = response
        .headers()
        .get("docker-content-digest")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| Digest::parse(reference).ok().map(|d| d.to_string()))
        .ok_or_else(|| Error::Unsupported("registry omitted Docker-Content-Digest for a tag reference".into()))?;
    let size = response.headers().get(CONTENT_LENGTH).and_then(|v| v.to_str().ok()).and_then(|v| v.parse().ok()).unwrap_or(0);
    Ok(Descriptor::new(media_type, digest, size))
}

static LINK_NEXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).unwrap());

fn next_link(response: &reqwest::Response) -> Option<String> {
    let header = response.headers().get("link")?.to_str().ok()?;
    LINK_NEXT_RE.captures(header).map(|c| c[1].to_string())
}

#[derive(serde::Deserialize)]
struct TagsList {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(serde::Deserialize)]
struct CatalogList {
    #[serde(default)]
    repositories: Vec<String>,
}

#[async_trait]
impl Existable for Repository {
    async fn exists(&self, target: &Descriptor) -> Result<bool> {
        if media_type::is_manifest_or_index(&target.media_type) {
            match self.head_manifest(&target.digest).await {
                Ok(_) => Ok(true),
                Err(Error::NotFound(_)) => Ok(false),
                Err(e) => Err(e),
            }
        } else {
            self.head_blob(&target.digest).await
        }
    }
}

#[async_trait]
impl Fetchable for Repository {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream> {
        if media_type::is_manifest_or_index(&target.media_type) {
            let (_, bytes) = self.get_manifest(&target.digest).await?;
            Ok(stream_from_bytes(bytes))
        } else {
            let bytes = self.get_blob(&target.digest).await?;
            Ok(stream_from_bytes(bytes))
        }
    }
}

#[async_trait]
impl crate::storage::Pushable for Repository {
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<()> {
        let (bytes, digest, size) = drain_with_hash(content).await?;
        crate::storage::verify_descriptor(expected, &digest, size)?;

        if media_type::is_manifest_or_index(&expected.media_type) {
            self.put_manifest(&expected.digest, &expected.media_type, bytes.clone()).await?;
            if let Ok(decoded) = ManifestOrIndex::decode(&bytes, &expected.media_type) {
                if let Some(subject) = decoded.subject() {
                    self.maybe_update_referrers_index(expected, subject).await?;
                }
            }
            Ok(())
        } else {
            self.push_blob(&expected.digest, bytes).await
        }
    }
}

#[async_trait]
impl Resolvable for Repository {
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.head_manifest(reference).await
    }
}

#[async_trait]
impl Taggable for Repository {
    async fn tag(&self, descriptor: &Descriptor, reference: &str) -> Result<()> {
        let (_, bytes) = self.get_manifest(&descriptor.digest).await?;
        self.put_manifest(reference, &descriptor.media_type, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl Deletable for Repository {
    async fn delete(&self, target: &Descriptor) -> Result<()> {
        if media_type::is_manifest_or_index(&target.media_type) {
            self.delete_manifest(&target.digest).await
        } else {
            self.delete_blob(&target.digest).await
        }
    }
}

#[async_trait]
impl ReferenceFetchable for Repository {
    async fn fetch_reference(&self, reference: &str) -> Result<(Descriptor, ByteStream)> {
        let (descriptor, bytes) = self.get_manifest(reference).await?;
        Ok((descriptor, stream_from_bytes(bytes)))
    }
}

#[async_trait]
impl ReferencePushable for Repository {
    async fn push_reference(&self, expected: &Descriptor, content: ByteStream, reference: &str) -> Result<()> {
        let (bytes, digest, size) = drain_with_hash(content).await?;
        crate::storage::verify_descriptor(expected, &digest, size)?;
        self.put_manifest(reference, &expected.media_type, bytes.clone()).await?;
        if let Ok(decoded) = ManifestOrIndex::decode(&bytes, &expected.media_type) {
            if let Some(subject) = decoded.subject() {
                self.maybe_update_referrers_index(expected, subject).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TagListable for Repository {
    async fn tags(&self) -> Result<Vec<String>> {
        self.list_tags().await
    }
}

#[async_trait]
impl ReferrerListable for Repository {
    async fn referrers(&self, subject: &Descriptor, artifact_type: Option<&str>) -> Result<Vec<Descriptor>> {
        self.list_referrers(subject, artifact_type).await
    }
}

#[async_trait]
impl Mounter for Repository {
    async fn mount(&self, descriptor: &Descriptor, from_repo: &str) -> Result<bool> {
        let req_url = url::mount(&self.host, self.options.plain_http, &self.name, &descriptor.digest, from_repo);
        let request = self.client.post(&req_url).build()?;
        let response = self.client.execute(request).await?;
        match response.status() {
            StatusCode::CREATED => {
                trace!(digest = %descriptor.digest, from_repo, "mount succeeded");
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
