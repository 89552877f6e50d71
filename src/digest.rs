//! Digest computation and validation.
//!
//! Digests are `algorithm:hex` strings, e.g.
//! `sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9`.
//! SHA-256 and SHA-512 are the two algorithms this crate recognizes, as
//! spec'd by the OCI image spec's descriptor digest grammar.

use sha2::{Digest as _, Sha256, Sha512};
use std::io::Read;

use crate::error::{Error, Result};

/// The default digest algorithm used when none is specified.
pub const DEFAULT_ALGORITHM: &str = "sha256";

/// A parsed, validated content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

/// A supported digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// SHA-256, 32-byte digest, 64 hex characters.
    Sha256,
    /// SHA-512, 64-byte digest, 128 hex characters.
    Sha512,
}

impl Algorithm {
    fn as_str(self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    fn expected_hex_len(self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sha256" => Some(Algorithm::Sha256),
            "sha512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

impl Digest {
    /// Parse and validate a digest string of the form `algorithm:hex`.
    pub fn parse(s: &str) -> Result<Self> {
        let (algo_str, hex) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(s.to_string(), "missing ':' separator".into()))?;
        let algorithm = Algorithm::parse(algo_str).ok_or_else(|| {
            Error::InvalidDigest(s.to_string(), format!("unsupported algorithm '{algo_str}'"))
        })?;
        if hex.len() != algorithm.expected_hex_len() {
            return Err(Error::InvalidDigest(
                s.to_string(),
                format!(
                    "expected {} hex characters for {}, got {}",
                    algorithm.expected_hex_len(),
                    algorithm.as_str(),
                    hex.len()
                ),
            ));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) || hex.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(Error::InvalidDigest(
                s.to_string(),
                "digest must be lowercase hex".into(),
            ));
        }
        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }

    /// Compute the default-algorithm (SHA-256) digest of a byte slice.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = Sha256::digest(data);
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(hash),
        }
    }

    /// Compute the digest of a byte slice using a specific algorithm, e.g.
    /// for registries or artifacts that require SHA-512 rather than this
    /// crate's SHA-256 default.
    #[must_use]
    pub fn from_bytes_with_algorithm(data: &[u8], algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha256 => Self::from_bytes(data),
            Algorithm::Sha512 => Self {
                algorithm: Algorithm::Sha512,
                hex: hex::encode(Sha512::digest(data)),
            },
        }
    }

    /// Compute the SHA-256 digest of a reader, streaming rather than buffering.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(hasher.finalize()),
        })
    }

    /// The algorithm portion, e.g. `"sha256"`.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        self.algorithm.as_str()
    }

    /// The hex portion of the digest, without the algorithm prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

impl std::str::FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Digest::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Digest::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.to_string()
    }
}

/// A streaming hasher that also verifies the total byte count as data is fed in.
///
/// Used by storage backends to compute a digest inline while writing, per
/// the design's "Push streams bytes and computes the digest inline" rule.
pub struct StreamingHasher {
    hasher: Sha256,
    observed_size: u64,
}

impl Default for StreamingHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingHasher {
    /// Create a fresh hasher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            observed_size: 0,
        }
    }

    /// Feed a chunk of bytes into the hasher.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.observed_size += chunk.len() as u64;
    }

    /// Total bytes observed so far.
    #[must_use]
    pub fn observed_size(&self) -> u64 {
        self.observed_size
    }

    /// Finalize and produce the computed digest.
    #[must_use]
    pub fn finalize(self) -> Digest {
        Digest {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(self.hasher.finalize()),
        }
    }
}

/// The well-known digest of the empty string, used by the empty-config descriptor.
pub fn sha256_of_empty() -> Digest {
    Digest::from_bytes(b"")
}
