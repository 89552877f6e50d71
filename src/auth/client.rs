//! The authenticating HTTP client: intercepts `401` responses, resolves the
//! `WWW-Authenticate` challenge, acquires a token via the Basic or Bearer
//! flow, caches it, and retries the request exactly once.

use std::sync::Arc;

use base64::Engine;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Request, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::cache::{CachedScheme, TokenCache};
use super::challenge::{self, Scheme};
use super::credential::{Credential, CredentialProvider};
use super::scope::ScopeManager;
use super::DEFAULT_CLIENT_ID;
use crate::error::{Error, Result};

/// Options controlling [`AuthClient`]'s behavior.
pub struct AuthClientOptions {
    /// Distinguishes token caches for multiple logical identities sharing one
    /// process, e.g. multi-tenant services. `None` for the common single-tenant case.
    pub tenant_id: Option<String>,
    /// Force the OAuth2 flow (refresh/password grant) even when no refresh
    /// token is configured, instead of the simpler distribution GET flow.
    pub force_attempt_oauth2: bool,
    /// The `client_id` sent in OAuth2 token requests.
    pub client_id: String,
}

impl Default for AuthClientOptions {
    fn default() -> Self {
        Self {
            tenant_id: None,
            force_attempt_oauth2: false,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

/// Wraps a plain [`reqwest::Client`], transparently handling registry
/// authentication challenges.
///
/// A request that already carries an `Authorization` header is sent as-is
/// and never intercepted: the caller has taken responsibility for auth
/// itself. Otherwise, a cached token for the request's host (and current
/// scope set) is attached if one exists; if the server still answers `401`,
/// the challenge is parsed, a fresh token acquired and cached, and the
/// request retried exactly once.
pub struct AuthClient {
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    cache: TokenCache,
    scopes: ScopeManager,
    options: AuthClientOptions,
}

impl AuthClient {
    /// Build a client around `http`, resolving credentials via `credentials`.
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: Arc<dyn CredentialProvider>, options: AuthClientOptions) -> Self {
        Self {
            http,
            credentials,
            cache: TokenCache::new(),
            scopes: ScopeManager::new(),
            options,
        }
    }

    /// The plain transport underneath this handler, for callers that need to
    /// build requests (query params, bodies) before routing them through
    /// [`AuthClient::execute`].
    #[must_use]
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The scope manager backing this client's Bearer token acquisitions.
    /// Callers that know in advance which repositories they'll touch can
    /// pre-register scopes here so a single token covers all of them.
    #[must_use]
    pub fn scopes(&self) -> &ScopeManager {
        &self.scopes
    }

    /// Send `request`, transparently handling a `401` challenge and retrying
    /// once if the body can be cloned.
    #[instrument(skip(self, request), fields(url = %request.url()))]
    pub async fn execute(&self, request: Request) -> Result<Response> {
        if request.headers().contains_key(AUTHORIZATION) {
            return Ok(self.http.execute(request).await?);
        }

        let host = request.url().host_str().unwrap_or_default().to_string();
        let cache_key = TokenCache::cache_key(self.options.tenant_id.as_deref(), &host);
        let scope_key = self.scopes.scope_key(&host).await;

        // Kept aside so the same request can be replayed after a 401; a
        // streaming body (not cloneable) means no retry is possible.
        let retry_template = request.try_clone();

        let mut first_attempt = request;
        if let Some((scheme, token)) = self.cache.get(&cache_key, &scope_key).await {
            attach(&mut first_attempt, scheme, &token);
        }

        let response = self.http.execute(first_attempt).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(header) = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
        else {
            return Ok(response);
        };
        let Some(mut retry_request) = retry_template else {
            debug!("401 received but request body cannot be cloned, not retrying");
            return Ok(response);
        };

        let challenge = challenge::parse(&header)?;
        let (scheme, token) = self.acquire_token(&host, &challenge).await?;
        self.cache.set(&cache_key, scheme, &scope_key, token.clone()).await;
        attach(&mut retry_request, scheme, &token);

        Ok(self.http.execute(retry_request).await?)
    }

    async fn acquire_token(&self, host: &str, challenge: &challenge::Challenge) -> Result<(CachedScheme, String)> {
        match &challenge.scheme {
            Scheme::Basic => {
                let credential = self.credentials.resolve(host).await?;
                if credential.username.is_empty() || credential.password.is_empty() {
                    return Err(Error::MissingCredentials(host.to_string()));
                }
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", credential.username, credential.password));
                Ok((CachedScheme::Basic, encoded))
            }
            Scheme::Bearer => {
                let realm = challenge
                    .param("realm")
                    .ok_or_else(|| Error::MissingAuthParameter("realm".into()))?;
                let service = challenge.param("service").unwrap_or_default();

                let mut scopes: Vec<String> = challenge
                    .param("scope")
                    .map(|s| s.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default();
                scopes.extend(self.scopes.render(host).await);
                scopes.sort();
                scopes.dedup();

                let credential = self.credentials.resolve(host).await.unwrap_or_default();
                let token = if !credential.access_token.is_empty() {
                    credential.access_token.clone()
                } else if credential.refresh_token.is_empty() && !self.options.force_attempt_oauth2 {
                    self.distribution_token_flow(realm, service, &scopes, &credential).await?
                } else {
                    self.oauth2_token_flow(realm, service, &scopes, &credential).await?
                };
                Ok((CachedScheme::Bearer, token))
            }
            Scheme::Unknown(scheme) => Err(Error::AuthenticationFailed(format!(
                "unsupported authentication scheme '{scheme}'"
            ))),
        }
    }

    /// `GET <realm>?service=<service>&scope=<scope>...`, per the Docker
    /// registry token authentication spec. Anonymous pulls use this flow
    /// with no `Authorization` header at all.
    async fn distribution_token_flow(
        &self,
        realm: &str,
        service: &str,
        scopes: &[String],
        credential: &Credential,
    ) -> Result<String> {
        let mut request = self.http.get(realm).query(&[("service", service)]);
        for scope in scopes {
            request = request.query(&[("scope", scope)]);
        }
        if !credential.username.is_empty() {
            request = request.basic_auth(&credential.username, Some(&credential.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::AuthenticationFailed(format!("token endpoint returned {status}")));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
        }
        let body: TokenResponse = response.json().await?;
        body.access_token
            .or(body.token)
            .ok_or_else(|| Error::AuthenticationFailed("token endpoint returned neither 'token' nor 'access_token'".into()))
    }

    /// `POST <realm>` with a form-encoded OAuth2 refresh-token or
    /// password grant, per the OAuth2 extension to the distribution spec.
    async fn oauth2_token_flow(
        &self,
        realm: &str,
        service: &str,
        scopes: &[String],
        credential: &Credential,
    ) -> Result<String> {
        let mut form = vec![
            ("service".to_string(), service.to_string()),
            ("client_id".to_string(), self.options.client_id.clone()),
        ];
        if !credential.refresh_token.is_empty() {
            form.push(("grant_type".to_string(), "refresh_token".to_string()));
            form.push(("refresh_token".to_string(), credential.refresh_token.clone()));
        } else {
            form.push(("grant_type".to_string(), "password".to_string()));
            form.push(("username".to_string(), credential.username.clone()));
            form.push(("password".to_string(), credential.password.clone()));
        }
        if !scopes.is_empty() {
            form.push(("scope".to_string(), scopes.join(" ")));
        }

        let response = self.http.post(realm).form(&form).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::AuthenticationFailed(format!("token endpoint returned {status}")));
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }
        let body: TokenResponse = response.json().await?;
        Ok(body.access_token)
    }
}

fn attach(request: &mut Request, scheme: CachedScheme, token: &str) {
    let value = match scheme {
        CachedScheme::Basic => format!("Basic {token}"),
        CachedScheme::Bearer => format!("Bearer {token}"),
    };
    if let Ok(header_value) = reqwest::header::HeaderValue::from_str(&value) {
        request.headers_mut().insert(AUTHORIZATION, header_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::StaticCredential;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn anonymous_request_succeeds_without_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/busybox/tags/list"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let client = AuthClient::new(
            reqwest::Client::new(),
            Arc::new(crate::auth::credential::NoCredential),
            AuthClientOptions::default(),
        );
        let request = reqwest::Client::new()
            .get(format!("{}/v2/library/busybox/tags/list", server.uri()))
            .build()
            .unwrap();
        let response = client.execute(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bearer_challenge_is_resolved_and_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/library/busybox/tags/list"))
            .and(header("authorization", "Bearer faketoken"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/library/busybox/tags/list"))
            .respond_with(ResponseTemplate::new(401).insert_header(
                "www-authenticate",
                format!(
                    r#"Bearer realm="{}/token",service="registry.example.com",scope="repository:library/busybox:pull""#,
                    server.uri()
                ),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("service", "registry.example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "faketoken"})))
            .mount(&server)
            .await;

        let client = AuthClient::new(
            reqwest::Client::new(),
            Arc::new(crate::auth::credential::NoCredential),
            AuthClientOptions::default(),
        );
        let request = reqwest::Client::new()
            .get(format!("{}/v2/library/busybox/tags/list", server.uri()))
            .build()
            .unwrap();
        let response = client.execute(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let host = reqwest::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
        let cached = client
            .cache
            .get(&TokenCache::cache_key(None, &host), "repository:library/busybox:pull")
            .await;
        assert!(cached.is_some());
    }

    #[tokio::test]
    async fn basic_challenge_without_credentials_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(
                ResponseTemplate::new(401).insert_header("www-authenticate", r#"Basic realm="registry""#),
            )
            .mount(&server)
            .await;

        let client = AuthClient::new(
            reqwest::Client::new(),
            Arc::new(crate::auth::credential::NoCredential),
            AuthClientOptions::default(),
        );
        let request = reqwest::Client::new().get(format!("{}/v2/", server.uri())).build().unwrap();
        let err = client.execute(request).await.unwrap_err();
        assert!(matches!(err, Error::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn basic_challenge_with_credentials_attaches_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/"))
            .respond_with(
                ResponseTemplate::new(401).insert_header("www-authenticate", r#"Basic realm="registry""#),
            )
            .mount(&server)
            .await;

        let client = AuthClient::new(
            reqwest::Client::new(),
            Arc::new(StaticCredential::new(Credential {
                username: "user".into(),
                password: "pass".into(),
                ..Default::default()
            })),
            AuthClientOptions::default(),
        );
        let request = reqwest::Client::new().get(format!("{}/v2/", server.uri())).build().unwrap();
        let response = client.execute(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
