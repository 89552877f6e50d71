//! OCI Distribution v2 URL construction (spec §4.3).
//!
//! Pure functions: given a registry host, repository name, and whether the
//! connection is plain HTTP, build the path for each endpoint. Kept free of
//! any I/O so they can be unit tested without a mock server.

/// Build the base `scheme://host` prefix for a registry connection.
#[must_use]
pub fn base(host: &str, plain_http: bool) -> String {
    let scheme = if plain_http { "http" } else { "https" };
    format!("{scheme}://{host}")
}

/// `/v2/<name>/blobs/<digest>`
#[must_use]
pub fn blob(host: &str, plain_http: bool, name: &str, digest: &str) -> String {
    format!("{}/v2/{name}/blobs/{digest}", base(host, plain_http))
}

/// `/v2/<name>/blobs/uploads/`, the endpoint a blob upload session is
/// started against.
#[must_use]
pub fn blob_uploads(host: &str, plain_http: bool, name: &str) -> String {
    format!("{}/v2/{name}/blobs/uploads/", base(host, plain_http))
}

/// `/v2/<name>/manifests/<reference>` — `reference` is a tag or a digest.
#[must_use]
pub fn manifest(host: &str, plain_http: bool, name: &str, reference: &str) -> String {
    format!("{}/v2/{name}/manifests/{reference}", base(host, plain_http))
}

/// `/v2/<name>/tags/list`
#[must_use]
pub fn tags_list(host: &str, plain_http: bool, name: &str) -> String {
    format!("{}/v2/{name}/tags/list", base(host, plain_http))
}

/// `/v2/_catalog`
#[must_use]
pub fn catalog(host: &str, plain_http: bool) -> String {
    format!("{}/v2/_catalog", base(host, plain_http))
}

/// `/v2/<name>/referrers/<digest>`
#[must_use]
pub fn referrers(host: &str, plain_http: bool, name: &str, digest: &str) -> String {
    format!("{}/v2/{name}/referrers/{digest}", base(host, plain_http))
}

/// `/v2/<name>/blobs/uploads/?mount=<digest>&from=<from_repo>`, the
/// cross-repository blob mount endpoint.
#[must_use]
pub fn mount(host: &str, plain_http: bool, name: &str, digest: &str, from_repo: &str) -> String {
    format!(
        "{}?mount={digest}&from={from_repo}",
        blob_uploads(host, plain_http, name)
    )
}

/// The referrers-tag-schema fallback tag for `digest`, e.g.
/// `sha256-<hex>` for a `sha256:<hex>` digest.
#[must_use]
pub fn referrers_tag_schema(digest: &str) -> String {
    digest.replacen(':', "-", 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_https_urls_by_default() {
        assert_eq!(
            blob("registry.example.com", false, "library/busybox", "sha256:aa"),
            "https://registry.example.com/v2/library/busybox/blobs/sha256:aa"
        );
    }

    #[test]
    fn plain_http_switches_scheme() {
        assert_eq!(
            manifest("localhost:5000", true, "foo", "latest"),
            "http://localhost:5000/v2/foo/manifests/latest"
        );
    }

    #[test]
    fn referrers_tag_schema_replaces_first_colon() {
        assert_eq!(
            referrers_tag_schema("sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"),
            "sha256-b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn mount_url_carries_digest_and_source_repo() {
        let url = mount("registry.example.com", false, "dest/repo", "sha256:aa", "src/repo");
        assert_eq!(
            url,
            "https://registry.example.com/v2/dest/repo/blobs/uploads/?mount=sha256:aa&from=src/repo"
        );
    }
}
