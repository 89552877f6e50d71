//! A client library for OCI-compatible artifact registries.
//!
//! This crate moves content-addressed graphs of bytes — manifests, indices,
//! configs, and blobs — between three kinds of storage: a remote registry
//! speaking the OCI Distribution HTTP API ([`remote`]), an in-memory
//! content-addressed store ([`storage::memory`]), and a local
//! filesystem-backed store ([`storage::file`]). It also packages new
//! artifacts ([`pack`]), resolves and tags references ([`reference`]),
//! discovers referrers, and authenticates to registries using the
//! Docker/OCI token challenge protocol ([`auth`]).
//!
//! # Example
//!
//! ```ignore
//! use oci_client::copy::{copy, CopyOptions};
//! use oci_client::reference::Reference;
//! use oci_client::remote::{Repository, RepositoryOptions};
//! use oci_client::storage::memory::MemoryStore;
//! use std::sync::Arc;
//!
//! let reference: Reference = "registry.example.com/library/busybox:latest".parse()?;
//! let src = Repository::new(&reference, Arc::new(reqwest::Client::new()), RepositoryOptions::default());
//! let dst = MemoryStore::new();
//! let root = copy(&src, "latest", &dst, None, CopyOptions::default()).await?;
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod copy;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod manifest;
pub mod media_type;
pub mod pack;
pub mod reference;
pub mod remote;
pub mod storage;

pub use descriptor::{BasicDescriptor, Descriptor, Platform};
pub use digest::Digest;
pub use error::{Error, Result};
pub use manifest::{Index, Manifest, ManifestOrIndex};
pub use pack::{pack_manifest, PackManifestOptions, PackManifestVersion};
pub use reference::Reference;
