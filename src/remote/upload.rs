//! Blob upload state machine (spec §4.3): `Start -> Open(location) -> Complete`
//! or `Failed`. A monolithic PUT is the common case; `patch_chunk` lets a
//! caller drive a resumable, chunked upload instead when the registry
//! returns a `Range`-bearing `202` it wants to resume against.

use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;

use super::HttpClient;
use crate::error::{Error, Result};

/// An open blob upload session: the registry has accepted a `POST` to start
/// an upload and returned a `Location` the client PUTs (or PATCHes) against.
pub struct UploadSession {
    location: String,
}

impl UploadSession {
    /// `POST /v2/<name>/blobs/uploads/`, returning the session opened at the
    /// `Location` header the registry replies with.
    pub async fn start(client: &dyn HttpClient, start_url: &str) -> Result<Self> {
        let request = client.post(start_url).build()?;
        let response = client.execute(request).await?;
        match response.status() {
            StatusCode::ACCEPTED | StatusCode::CREATED => {
                let location = location_header(&response, start_url)?;
                Ok(Self { location })
            }
            status => Err(super::decode_error_response("POST", start_url, status, response).await),
        }
    }

    /// The current upload location, carried across a chunked sequence (the
    /// registry may rewrite it on every `PATCH` response).
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Complete a monolithic upload: `PUT <location>?digest=<digest>` with
    /// the whole blob as the body.
    pub async fn complete(self, client: &dyn HttpClient, digest: &str, body: Vec<u8>) -> Result<()> {
        let url = append_query(&self.location, "digest", digest);
        let request = client
            .put(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .build()?;
        let response = client.execute(request).await?;
        match response.status() {
            StatusCode::CREATED | StatusCode::OK => Ok(()),
            status => Err(super::decode_error_response("PUT", &url, status, response).await),
        }
    }

    /// `PATCH <location>` with one chunk of the blob, advancing the session
    /// to whatever new `Location` the registry returns. `offset` is the byte
    /// offset this chunk starts at, used for the `Content-Range` header.
    pub async fn patch_chunk(&mut self, client: &dyn HttpClient, offset: u64, chunk: Vec<u8>) -> Result<()> {
        let end = offset + chunk.len() as u64;
        let request = client
            .patch(&self.location)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, chunk.len())
            .header(CONTENT_RANGE, format!("{offset}-{}", end.saturating_sub(1)))
            .body(chunk)
            .build()?;
        let response = client.execute(request).await?;
        match response.status() {
            StatusCode::ACCEPTED => {
                self.location = location_header(&response, &self.location)?;
                Ok(())
            }
            status => Err(super::decode_error_response("PATCH", &self.location, status, response).await),
        }
    }
}

fn location_header(response: &reqwest::Response, fallback_base: &str) -> Result<String> {
    let raw = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unsupported("upload response missing Location header".into()))?;
    // The Location header may be relative; resolve it against the URL we
    // just requested so callers always get an absolute URL to PUT/PATCH.
    match reqwest::Url::parse(raw) {
        Ok(url) => Ok(url.to_string()),
        Err(_) => {
            let base = reqwest::Url::parse(fallback_base)
                .map_err(|e| Error::Unsupported(format!("invalid upload base URL: {e}")))?;
            Ok(base
                .join(raw)
                .map_err(|e| Error::Unsupported(format!("invalid upload Location header: {e}")))?
                .to_string())
        }
    }
}

fn append_query(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!(
        "{url}{separator}{key}={}",
        percent_encode_minimal(value)
    )
}

/// Encodes just the `:` a digest carries; everything else in a digest string
/// is already URL-safe hex/alg characters.
fn percent_encode_minimal(value: &str) -> String {
    value.replace(':', "%3A")
}
