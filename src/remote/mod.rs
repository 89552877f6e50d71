//! The remote repository client (C8): HTTP operations against an OCI
//! Distribution v2 / Docker Registry v2 endpoint, per spec §4.3.

pub mod repository;
pub mod upload;
pub mod url;

pub use repository::{Repository, RepositoryOptions};

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};

use crate::error::{Error, RegistryErrorsEnvelope, Result};

/// Anything that can build and send HTTP requests: a plain [`reqwest::Client`]
/// or an [`crate::auth::AuthClient`] wrapping one. [`Repository`] is generic
/// over this so a caller can opt into (or out of) the authenticating
/// middleware without the repository needing to know which.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Start a `GET` request builder.
    fn get(&self, url: &str) -> RequestBuilder;
    /// Start a `HEAD` request builder.
    fn head(&self, url: &str) -> RequestBuilder;
    /// Start a `PUT` request builder.
    fn put(&self, url: &str) -> RequestBuilder;
    /// Start a `POST` request builder.
    fn post(&self, url: &str) -> RequestBuilder;
    /// Start a `PATCH` request builder.
    fn patch(&self, url: &str) -> RequestBuilder;
    /// Start a `DELETE` request builder.
    fn delete(&self, url: &str) -> RequestBuilder;
    /// Send a built request, handling auth transparently if this
    /// implementation wraps the authenticating middleware.
    async fn execute(&self, request: reqwest::Request) -> Result<Response>;
}

#[async_trait]
impl HttpClient for reqwest::Client {
    fn get(&self, url: &str) -> RequestBuilder {
        reqwest::Client::get(self, url)
    }
    fn head(&self, url: &str) -> RequestBuilder {
        reqwest::Client::head(self, url)
    }
    fn put(&self, url: &str) -> RequestBuilder {
        reqwest::Client::put(self, url)
    }
    fn post(&self, url: &str) -> RequestBuilder {
        reqwest::Client::post(self, url)
    }
    fn patch(&self, url: &str) -> RequestBuilder {
        reqwest::Client::patch(self, url)
    }
    fn delete(&self, url: &str) -> RequestBuilder {
        reqwest::Client::delete(self, url)
    }
    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        Ok(reqwest::Client::execute(self, request).await?)
    }
}

#[async_trait]
impl HttpClient for crate::auth::AuthClient {
    fn get(&self, url: &str) -> RequestBuilder {
        self.http().get(url)
    }
    fn head(&self, url: &str) -> RequestBuilder {
        self.http().head(url)
    }
    fn put(&self, url: &str) -> RequestBuilder {
        self.http().put(url)
    }
    fn post(&self, url: &str) -> RequestBuilder {
        self.http().post(url)
    }
    fn patch(&self, url: &str) -> RequestBuilder {
        self.http().patch(url)
    }
    fn delete(&self, url: &str) -> RequestBuilder {
        self.http().delete(url)
    }
    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        crate::auth::AuthClient::execute(self, request).await
    }
}

/// The registry error envelope deserialized, when possible, from a
/// non-2xx response body, attached to [`Error::Response`].
pub async fn decode_error_response(method: &str, url: &str, status: StatusCode, response: Response) -> Error {
    let errors = response
        .bytes()
        .await
        .ok()
        .and_then(|body| serde_json::from_slice::<RegistryErrorsEnvelope>(&body).ok());
    Error::Response {
        method: method.to_string(),
        url: url.to_string(),
        status: status.as_u16(),
        errors,
    }
}
