//! The authenticating HTTP middleware (C9): challenge parsing, Basic/Bearer
//! token acquisition, scope management, and a registry-partitioned token
//! cache, per spec §4.4.

pub mod cache;
pub mod challenge;
pub mod client;
pub mod credential;
pub mod scope;

pub use cache::{CachedScheme, TokenCache};
pub use challenge::{Challenge, Scheme};
pub use client::{AuthClient, AuthClientOptions};
pub use credential::{Credential, CredentialProvider, NoCredential, StaticCredential};
pub use scope::ScopeManager;

/// The user-agent-style identifier sent as `client_id` in the OAuth2 token
/// flow when the caller hasn't configured one of their own.
pub const DEFAULT_CLIENT_ID: &str = "oci-client";
