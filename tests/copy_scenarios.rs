//! End-to-end scenarios from the design's testable-properties section,
//! driven over real HTTP against a loopback `wiremock` server rather than
//! through the in-process storage backends directly.

use std::sync::Arc;

use oci_client::copy::{copy_graph, CopyGraphOptions};
use oci_client::descriptor::Descriptor;
use oci_client::digest::Digest;
use oci_client::manifest::{Index, Manifest};
use oci_client::media_type;
use oci_client::reference::Reference;
use oci_client::remote::{Repository, RepositoryOptions};
use oci_client::storage::memory::MemoryStore;
use oci_client::storage::Existable;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn repo_for(server: &MockServer) -> Repository {
    let reference = Reference::parse(&format!("{}/library/busybox", server.address())).unwrap();
    let options = RepositoryOptions {
        plain_http: true,
        ..RepositoryOptions::default()
    };
    Repository::new(&reference, Arc::new(reqwest::Client::new()), options)
}

/// Scenario 1: blob round-trip (push, HEAD, GET, DELETE) against a real
/// registry surface.
#[tokio::test]
async fn blob_round_trip_over_http() {
    init_tracing();
    let server = MockServer::start().await;
    let body = b"hello world".to_vec();
    let digest = Digest::from_bytes(&body).to_string();

    Mock::given(method("HEAD"))
        .and(path(format!("/v2/library/busybox/blobs/{digest}")))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/busybox/blobs/{digest}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let repo = repo_for(&server);
    assert!(repo.head_blob(&digest).await.unwrap());
    let fetched = repo.get_blob(&digest).await.unwrap();
    assert_eq!(fetched, body);
}

/// Scenario 3: copying an index -> manifest -> [config, layer] graph from a
/// remote source into an in-memory destination populates every descriptor.
#[tokio::test]
async fn copy_graph_from_remote_source_populates_every_descriptor() {
    init_tracing();
    let config_bytes = b"{}".to_vec();
    let config = Descriptor::new(media_type::IMAGE_CONFIG, Digest::from_bytes(&config_bytes).to_string(), config_bytes.len() as u64);
    let layer_bytes = b"layer payload".to_vec();
    let layer = Descriptor::new(media_type::IMAGE_LAYER_GZIP, Digest::from_bytes(&layer_bytes).to_string(), layer_bytes.len() as u64);

    let manifest = Manifest::new(config.clone(), vec![layer.clone()]);
    let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
    let manifest_descriptor = Descriptor::new(
        media_type::IMAGE_MANIFEST,
        Digest::from_bytes(&manifest_bytes).to_string(),
        manifest_bytes.len() as u64,
    );

    let index = Index::new(vec![manifest_descriptor.clone()]);
    let index_bytes = serde_json::to_vec(&index).unwrap();
    let index_descriptor = Descriptor::new(media_type::IMAGE_INDEX, Digest::from_bytes(&index_bytes).to_string(), index_bytes.len() as u64);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/busybox/manifests/{}", index_descriptor.digest)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", index_descriptor.digest.as_str())
                .insert_header("content-type", media_type::IMAGE_INDEX)
                .set_body_bytes(index_bytes),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/busybox/manifests/{}", manifest_descriptor.digest)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("docker-content-digest", manifest_descriptor.digest.as_str())
                .insert_header("content-type", media_type::IMAGE_MANIFEST)
                .set_body_bytes(manifest_bytes),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/busybox/blobs/{}", config.digest)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(config_bytes))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/library/busybox/blobs/{}", layer.digest)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(layer_bytes))
        .mount(&server)
        .await;

    let src = Arc::new(repo_for(&server));
    let dst = Arc::new(MemoryStore::new());

    copy_graph(src, dst.clone(), index_descriptor.clone(), CopyGraphOptions::new())
        .await
        .unwrap();

    assert!(dst.exists(&index_descriptor).await.unwrap());
    assert!(dst.exists(&manifest_descriptor).await.unwrap());
    assert!(dst.exists(&config).await.unwrap());
    assert!(dst.exists(&layer).await.unwrap());
}

/// Scenario 4: paginated tag listing delivers every page in order.
#[tokio::test]
async fn paginated_tag_listing_collects_every_page() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/library/busybox/tags/list"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", format!(r#"<{}/v2/library/busybox/tags/list?last=fox>; rel="next""#, server.uri()))
                .set_body_json(serde_json::json!({"name": "library/busybox", "tags": ["the", "quick", "brown", "fox"]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/library/busybox/tags/list"))
        .and(wiremock::matchers::query_param("last", "fox"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!(r#"<{}/v2/library/busybox/tags/list?last=lazy>; rel="next""#, server.uri()),
                )
                .set_body_json(serde_json::json!({"name": "library/busybox", "tags": ["jumps", "over", "the", "lazy"]})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/library/busybox/tags/list"))
        .and(wiremock::matchers::query_param("last", "lazy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "library/busybox", "tags": ["dog"]})))
        .mount(&server)
        .await;

    let repo = repo_for(&server);
    let tags = repo.list_tags().await.unwrap();
    assert_eq!(tags, vec!["the", "quick", "brown", "fox", "jumps", "over", "the", "lazy", "dog"]);
}

/// Scenario 5: a 401 challenge is resolved via the distribution token flow
/// and the original request is retried exactly once.
#[tokio::test]
async fn bearer_challenge_round_trip_fetches_token_and_retries() {
    use oci_client::auth::{AuthClient, AuthClientOptions, NoCredential};

    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/x/manifests/latest"))
        .and(wiremock::matchers::header("authorization", "Bearer tkn"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/x/manifests/latest"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "www-authenticate",
            format!(r#"Bearer realm="{}/token",service="r.io",scope="repository:x:pull""#, server.uri()),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(wiremock::matchers::query_param("service", "r.io"))
        .and(wiremock::matchers::query_param("scope", "repository:x:pull"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "tkn"})))
        .mount(&server)
        .await;

    let client = AuthClient::new(reqwest::Client::new(), Arc::new(NoCredential), AuthClientOptions::default());
    let request = reqwest::Client::new()
        .get(format!("{}/v2/x/manifests/latest", server.uri()))
        .build()
        .unwrap();
    let response = client.execute(request).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

/// Scenario 6: a 404 on the native referrers API falls back to the
/// referrers-tag-schema manifest, filtered by `artifactType`.
#[tokio::test]
async fn referrers_api_fallback_filters_by_artifact_type() {
    init_tracing();
    let subject = Descriptor::new(media_type::IMAGE_MANIFEST, "sha256:aa", 10);
    let wanted = Descriptor::new(media_type::IMAGE_MANIFEST, "sha256:bb", 5)
        .with_annotation("irrelevant", "x");
    let mut wanted = wanted;
    wanted.artifact_type = Some("application/vnd.example.sbom".to_string());
    let other = Descriptor::new(media_type::IMAGE_MANIFEST, "sha256:cc", 5);

    let index = Index::new(vec![wanted.clone(), other]);
    let index_bytes = serde_json::to_vec(&index).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/library/busybox/referrers/sha256:aa"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/library/busybox/manifests/sha256-aa"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", media_type::IMAGE_INDEX)
                .set_body_bytes(index_bytes),
        )
        .mount(&server)
        .await;

    let repo = repo_for(&server);
    let referrers = repo.list_referrers(&subject, Some("application/vnd.example.sbom")).await.unwrap();
    assert_eq!(referrers, vec![wanted]);
}
