use base64::Engine;
use dockerhub_exporter::config::Credentials;
use dockerhub_exporter::http::{
    Endpoints, FetchError, RateLimitFetcher, RateLimitSnapshot, Stage, MANIFEST_PATH, PULL_SCOPE,
    REGISTRY_SERVICE, TOKEN_PATH,
};
use httpmock::Method::{GET, HEAD};
use httpmock::{Mock, MockServer};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn fetcher(server: &MockServer) -> RateLimitFetcher {
    let base = server.base_url();
    RateLimitFetcher::with_endpoints(Endpoints::from_bases(&base, &base).unwrap()).unwrap()
}

async fn token_ok(server: &MockServer) -> Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path(TOKEN_PATH)
                .query_param("service", REGISTRY_SERVICE)
                .query_param("scope", PULL_SCOPE);
            then.status(200).json_body(serde_json::json!({"token": "tok"}));
        })
        .await
}

async fn manifest_with<'a>(server: &'a MockServer, headers: &[(&str, &str)]) -> Mock<'a> {
    let headers: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    server
        .mock_async(move |when, then| {
            when.method(HEAD)
                .path(MANIFEST_PATH)
                .header("authorization", "Bearer tok");
            let mut then = then.status(200);
            for (k, v) in &headers {
                then = then.header(k.as_str(), v.as_str());
            }
        })
        .await
}

fn all_headers() -> [(&'static str, &'static str); 3] {
    [
        ("ratelimit-limit", "100;w=21600"),
        ("ratelimit-remaining", "98;w=21600"),
        ("docker-ratelimit-source", "abc"),
    ]
}

#[tokio::test]
async fn valid_headers_produce_snapshot() {
    let server = MockServer::start_async().await;
    let token = token_ok(&server).await;
    let manifest = manifest_with(&server, &all_headers()).await;

    let snap = fetcher(&server).fetch(None, TIMEOUT).await.unwrap();
    assert_eq!(
        snap,
        RateLimitSnapshot {
            limit: 100,
            remaining: 98,
            interval_seconds: 21600,
            source: "abc".into(),
        }
    );
    token.assert_async().await;
    manifest.assert_async().await;
}

#[tokio::test]
async fn mismatched_windows_fail() {
    let server = MockServer::start_async().await;
    let _token = token_ok(&server).await;
    let _manifest = manifest_with(
        &server,
        &[
            ("ratelimit-limit", "100;w=100"),
            ("ratelimit-remaining", "98;w=200"),
            ("docker-ratelimit-source", "abc"),
        ],
    )
    .await;

    let err = fetcher(&server).fetch(None, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, FetchError::IntervalMismatch { .. }), "{err:?}");
}

#[tokio::test]
async fn malformed_header_fails() {
    let server = MockServer::start_async().await;
    let _token = token_ok(&server).await;
    let _manifest = manifest_with(
        &server,
        &[
            ("ratelimit-limit", "100;w=21600"),
            ("ratelimit-remaining", "abc"),
            ("docker-ratelimit-source", "abc"),
        ],
    )
    .await;

    let err = fetcher(&server).fetch(None, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, FetchError::HeaderParse { .. }), "{err:?}");
}

#[tokio::test]
async fn missing_source_header_fails() {
    let server = MockServer::start_async().await;
    let _token = token_ok(&server).await;
    let _manifest = manifest_with(&server, &all_headers()[..2]).await;

    let err = fetcher(&server).fetch(None, TIMEOUT).await.unwrap_err();
    assert!(
        matches!(err, FetchError::MissingHeader("docker-ratelimit-source")),
        "{err:?}"
    );
}

#[tokio::test]
async fn token_failure_skips_manifest() {
    let server = MockServer::start_async().await;
    let token = server
        .mock_async(|when, then| {
            when.method(GET).path(TOKEN_PATH);
            then.status(401);
        })
        .await;
    let manifest = manifest_with(&server, &all_headers()).await;

    let err = fetcher(&server).fetch(None, TIMEOUT).await.unwrap_err();
    match err {
        FetchError::TokenRequest { status } => assert_eq!(status.as_u16(), 401),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(token.hits_async().await, 1);
    assert_eq!(manifest.hits_async().await, 0);
}

#[tokio::test]
async fn token_without_field_fails() {
    let server = MockServer::start_async().await;
    let _token = server
        .mock_async(|when, then| {
            when.method(GET).path(TOKEN_PATH);
            then.status(200)
                .json_body(serde_json::json!({"access_token": "tok"}));
        })
        .await;

    let err = fetcher(&server).fetch(None, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, FetchError::TokenParse(_)), "{err:?}");
    assert_eq!(err.stage(), "token parse");
}

#[tokio::test]
async fn manifest_failure_reports_status() {
    let server = MockServer::start_async().await;
    let _token = token_ok(&server).await;
    let _manifest = server
        .mock_async(|when, then| {
            when.method(HEAD).path(MANIFEST_PATH);
            then.status(429);
        })
        .await;

    let err = fetcher(&server).fetch(None, TIMEOUT).await.unwrap_err();
    match err {
        FetchError::ManifestRequest { status } => assert_eq!(status.as_u16(), 429),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn credentials_are_sent_as_basic_auth() {
    let server = MockServer::start_async().await;
    let expected = format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode("alice:s3cret")
    );
    let token = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(TOKEN_PATH)
                .header("authorization", expected.as_str());
            then.status(200).json_body(serde_json::json!({"token": "tok"}));
        })
        .await;
    let _manifest = manifest_with(
        &server,
        &[
            ("ratelimit-limit", "200;w=21600"),
            ("ratelimit-remaining", "150;w=21600"),
            ("docker-ratelimit-source", "alice"),
        ],
    )
    .await;

    let creds = Credentials {
        username: "alice".into(),
        password: "s3cret".into(),
    };
    let snap = fetcher(&server)
        .fetch(Some(&creds), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(snap.limit, 200);
    assert_eq!(snap.remaining, 150);
    assert_eq!(snap.source, "alice");
    token.assert_async().await;
}

#[tokio::test]
async fn anonymous_mode_sends_no_authorization() {
    let server = MockServer::start_async().await;
    // Only answers authenticated requests; anything else falls through to 404.
    let authed = server
        .mock_async(|when, then| {
            when.method(GET)
                .path(TOKEN_PATH)
                .header_exists("authorization");
            then.status(200).json_body(serde_json::json!({"token": "tok"}));
        })
        .await;

    let err = fetcher(&server).fetch(None, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, FetchError::TokenRequest { .. }), "{err:?}");

    let empty = Credentials {
        username: String::new(),
        password: String::new(),
    };
    let err = fetcher(&server)
        .fetch(Some(&empty), TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TokenRequest { .. }), "{err:?}");
    assert_eq!(authed.hits_async().await, 0);
}

#[tokio::test]
async fn slow_token_endpoint_times_out() {
    let server = MockServer::start_async().await;
    let _token = server
        .mock_async(|when, then| {
            when.method(GET).path(TOKEN_PATH);
            then.status(200)
                .delay(Duration::from_millis(1500))
                .json_body(serde_json::json!({"token": "tok"}));
        })
        .await;

    let err = fetcher(&server)
        .fetch(None, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::Timeout { stage: Stage::Token }),
        "{err:?}"
    );
    assert_eq!(err.stage(), "token request");
}

#[tokio::test]
async fn slow_manifest_endpoint_times_out() {
    let server = MockServer::start_async().await;
    let token = token_ok(&server).await;
    let _manifest = server
        .mock_async(|when, then| {
            when.method(HEAD).path(MANIFEST_PATH);
            then.status(200)
                .delay(Duration::from_millis(1500))
                .header("ratelimit-limit", "100;w=21600")
                .header("ratelimit-remaining", "98;w=21600")
                .header("docker-ratelimit-source", "abc");
        })
        .await;

    let err = fetcher(&server)
        .fetch(None, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::Timeout { stage: Stage::Manifest }),
        "{err:?}"
    );
    assert_eq!(err.stage(), "manifest request");
    assert_eq!(token.hits_async().await, 1);
}

#[tokio::test]
async fn each_hop_gets_its_own_timeout() {
    let server = MockServer::start_async().await;
    let _token = server
        .mock_async(|when, then| {
            when.method(GET).path(TOKEN_PATH);
            then.status(200)
                .delay(Duration::from_millis(300))
                .json_body(serde_json::json!({"token": "tok"}));
        })
        .await;
    let _manifest = server
        .mock_async(|when, then| {
            when.method(HEAD).path(MANIFEST_PATH);
            then.status(200)
                .delay(Duration::from_millis(300))
                .header("ratelimit-limit", "100;w=21600")
                .header("ratelimit-remaining", "98;w=21600")
                .header("docker-ratelimit-source", "abc");
        })
        .await;

    // 300ms + 300ms exceeds 500ms overall, but neither hop does on its own.
    let snap = fetcher(&server)
        .fetch(None, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(snap.limit, 100);
    assert_eq!(snap.remaining, 98);
}
