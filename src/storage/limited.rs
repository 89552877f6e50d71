//! A size-capped decorator over any push target, used as the file store's
//! fallback for unnamed content (default cap: 4 MiB) per spec §4.1.

use async_trait::async_trait;

use super::{ByteStream, Existable, Fetchable, Pushable};
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

/// The file store's default cap on unnamed (fallback) content.
pub const DEFAULT_UNNAMED_CAP_BYTES: u64 = 4 * 1024 * 1024;

/// Wraps any storage backend and rejects pushes whose declared size exceeds
/// `limit`, failing with *size limit exceeded* before any bytes are read.
#[derive(Clone)]
pub struct LimitedStore<T> {
    inner: T,
    limit: u64,
}

impl<T> LimitedStore<T> {
    /// Wrap `inner`, capping pushes at `limit` bytes.
    #[must_use]
    pub fn new(inner: T, limit: u64) -> Self {
        Self { inner, limit }
    }

    /// The underlying store.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Existable> Existable for LimitedStore<T> {
    async fn exists(&self, target: &Descriptor) -> Result<bool> {
        self.inner.exists(target).await
    }
}

#[async_trait]
impl<T: Fetchable> Fetchable for LimitedStore<T> {
    async fn fetch(&self, target: &Descriptor) -> Result<ByteStream> {
        self.inner.fetch(target).await
    }
}

#[async_trait]
impl<T: Pushable> Pushable for LimitedStore<T> {
    async fn push(&self, expected: &Descriptor, content: ByteStream) -> Result<()> {
        if expected.size > self.limit {
            return Err(Error::SizeLimitExceeded {
                size: expected.size,
                limit: self.limit,
            });
        }
        self.inner.push(expected, content).await
    }
}
