//! Credential resolution: a pure function from registry host to the
//! material needed to satisfy a Basic or Bearer challenge.

use async_trait::async_trait;

use crate::error::Result;

/// The credential material for a single registry host.
///
/// Exactly one of `(username, password)`, `refresh_token`, or `access_token`
/// is normally populated; which one determines which token flow the auth
/// client drives when it hits a `Bearer` challenge.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    /// Username for Basic auth or the OAuth2 password grant.
    pub username: String,
    /// Password for Basic auth or the OAuth2 password grant.
    pub password: String,
    /// A long-lived refresh token, driving the OAuth2 refresh-token grant.
    pub refresh_token: String,
    /// A pre-acquired bearer token, used as-is with no token endpoint call.
    pub access_token: String,
}

impl Credential {
    /// True if none of the four fields are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_empty()
            && self.password.is_empty()
            && self.refresh_token.is_empty()
            && self.access_token.is_empty()
    }
}

/// Resolves credentials for a registry host.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Look up the credential for `host`. Returning `Ok(Credential::default())`
    /// (an empty credential) means "no credentials available"; this is not
    /// itself an error, since anonymous pulls are common.
    async fn resolve(&self, host: &str) -> Result<Credential>;
}

/// A provider that always returns no credentials; used when a caller is
/// certain every target registry allows anonymous pulls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredential;

#[async_trait]
impl CredentialProvider for NoCredential {
    async fn resolve(&self, _host: &str) -> Result<Credential> {
        Ok(Credential::default())
    }
}

/// A provider returning the same credential for every host.
#[derive(Debug, Clone)]
pub struct StaticCredential(Credential);

impl StaticCredential {
    /// Wrap a credential to be returned for any host.
    #[must_use]
    pub fn new(credential: Credential) -> Self {
        Self(credential)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn resolve(&self, _host: &str) -> Result<Credential> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_credential_resolves_empty() {
        let cred = NoCredential.resolve("registry.example.com").await.unwrap();
        assert!(cred.is_empty());
    }

    #[tokio::test]
    async fn static_credential_ignores_host() {
        let provider = StaticCredential::new(Credential {
            username: "user".into(),
            password: "pass".into(),
            ..Default::default()
        });
        let a = provider.resolve("a.example.com").await.unwrap();
        let b = provider.resolve("b.example.com").await.unwrap();
        assert_eq!(a.username, b.username);
        assert!(!a.is_empty());
    }
}
