//! Tokenizes a `WWW-Authenticate` response header per RFC 7235 §4.1, using
//! the `http-auth` crate for the actual auth-param grammar rather than
//! hand-rolling quoted-string escaping rules.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Which authentication scheme a challenge names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    /// HTTP Basic, RFC 7617.
    Basic,
    /// The Docker/OCI distribution Bearer token scheme.
    Bearer,
    /// Anything else; the auth client cannot act on it.
    Unknown(String),
}

impl Scheme {
    fn from_str(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("basic") {
            Self::Basic
        } else if raw.eq_ignore_ascii_case("bearer") {
            Self::Bearer
        } else {
            Self::Unknown(raw.to_string())
        }
    }
}

/// A single challenge: its scheme and lower-cased auth-params.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// The challenge's authentication scheme.
    pub scheme: Scheme,
    params: HashMap<String, String>,
}

impl Challenge {
    /// The value of an auth-param, looked up case-insensitively.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(&key.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Parse a `WWW-Authenticate` header value. Registries send exactly one
/// challenge in practice; if a header somehow carries more than one, the
/// first `Bearer` challenge wins, else the first challenge of any scheme.
pub fn parse(header_value: &str) -> Result<Challenge> {
    let challenges =
        http_auth::parse_challenges(header_value).map_err(|e| Error::ChallengeFormat(e.to_string()))?;

    let chosen = challenges
        .iter()
        .find(|c| c.scheme.eq_ignore_ascii_case("bearer"))
        .or_else(|| challenges.first())
        .ok_or_else(|| Error::ChallengeFormat("no challenge present in header".into()))?;

    let mut params = HashMap::with_capacity(chosen.params.len());
    for param in &chosen.params {
        params.insert(param.key.to_string().to_ascii_lowercase(), param.val.to_unescaped());
    }
    Ok(Challenge {
        scheme: Scheme::from_str(chosen.scheme),
        params,
    })
}
