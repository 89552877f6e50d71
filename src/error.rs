//! Crate-wide error type.
//!
//! One variant per failure mode named in the design's error taxonomy.
//! Each carries the fields needed to build a useful message rather than
//! a single opaque string, following the pattern used throughout this
//! crate's storage and remote-client modules.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A single error returned by a registry in its JSON error envelope.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
pub struct RegistryErrorDetail {
    /// Machine-readable error code (e.g. `"BLOB_UNKNOWN"`).
    pub code: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional structured detail.
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl std::fmt::Display for RegistryErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors produced by this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Content or reference was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A push was a no-op because the content already existed.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Digest computed from the bytes read/written differs from the declared one.
    #[error("digest mismatch for {subject}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// What was being verified (a blob digest, a manifest reference, ...).
        subject: String,
        /// The digest the caller declared.
        expected: String,
        /// The digest actually computed.
        actual: String,
    },

    /// Declared size differs from the number of bytes observed.
    #[error("size mismatch for {subject}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// What was being verified.
        subject: String,
        /// Declared size.
        expected: u64,
        /// Observed size.
        actual: u64,
    },

    /// A push exceeded a configured size cap.
    #[error("size limit exceeded: {size} bytes exceeds cap of {limit} bytes")]
    SizeLimitExceeded {
        /// Size of the content that was rejected.
        size: u64,
        /// The configured cap.
        limit: u64,
    },

    /// A reference string failed to parse.
    #[error("invalid reference '{0}': {1}")]
    InvalidReference(String, String),

    /// A media type string was rejected.
    #[error("invalid media type '{0}'")]
    InvalidMediaType(String),

    /// A digest string failed validation.
    #[error("invalid digest '{0}': {1}")]
    InvalidDigest(String, String),

    /// An RFC 3339 timestamp could not be parsed.
    #[error("invalid date-time '{0}'")]
    InvalidDateTime(String),

    /// The file store was asked to register a name twice.
    #[error("duplicate name: {0}")]
    DuplicateName(String),

    /// A named push/add was missing its required name annotation.
    #[error("missing name annotation")]
    MissingName,

    /// An operation needed a content reference (tag or digest) that was absent.
    #[error("missing reference")]
    MissingReference,

    /// A file store write would have escaped the working directory.
    #[error("path traversal disallowed for '{0}'")]
    PathTraversalDisallowed(String),

    /// A file store write would have overwritten an existing file with overwrite disabled.
    #[error("overwrite disallowed for '{0}'")]
    OverwriteDisallowed(String),

    /// An operation was attempted on a disposed file store.
    #[error("store closed")]
    StoreClosed,

    /// The backend or registry does not implement the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Token acquisition failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The credential provider returned nothing for a registry that required auth.
    #[error("missing credentials for registry '{0}'")]
    MissingCredentials(String),

    /// A `WWW-Authenticate` challenge was missing a parameter this client requires.
    #[error("missing auth parameter '{0}' in challenge")]
    MissingAuthParameter(String),

    /// A `WWW-Authenticate` header could not be tokenized per RFC 7235 §2.1.
    #[error("malformed WWW-Authenticate header: {0}")]
    ChallengeFormat(String),

    /// An attempt to set the referrers-API support state conflicted with a prior observation.
    #[error("referrers state already set to {existing:?}, cannot set to {attempted:?}")]
    ReferrersStateAlreadySet {
        /// The state already recorded.
        existing: bool,
        /// The state this call tried to record.
        attempted: bool,
    },

    /// A non-2xx/3xx response from a registry, decoded where possible.
    #[error("{method} {url} returned {status}{}", errors.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    Response {
        /// The HTTP method used.
        method: String,
        /// The request URL.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Decoded registry error envelope, if the body parsed as one.
        errors: Option<RegistryErrorsEnvelope>,
    },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Underlying HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The `{"errors": [...]}` envelope OCI distribution servers return on failure.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
pub struct RegistryErrorsEnvelope {
    /// The individual errors reported.
    #[serde(default)]
    pub errors: Vec<RegistryErrorDetail>,
}

impl std::fmt::Display for RegistryErrorsEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{joined}")
    }
}

impl Error {
    /// Build a [`Error::NotFound`] for the given subject.
    #[must_use]
    pub fn not_found(subject: impl Into<String>) -> Self {
        Self::NotFound(subject.into())
    }

    /// Build a [`Error::DigestMismatch`].
    #[must_use]
    pub fn digest_mismatch(
        subject: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::DigestMismatch {
            subject: subject.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Build a [`Error::SizeMismatch`].
    #[must_use]
    pub fn size_mismatch(subject: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::SizeMismatch {
            subject: subject.into(),
            expected,
            actual,
        }
    }

    /// Build an [`Error::InvalidReference`].
    #[must_use]
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference(reference.into(), reason.into())
    }

    /// True if this error represents a duplicate/already-exists push, which the copy
    /// engine and storage layers treat as success.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// True if this error represents an absent resource.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
            || matches!(self, Self::Response { status: 404, .. })
    }
}
