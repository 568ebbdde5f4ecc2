use crate::config::Credentials;
use log::debug;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use url::Url;

// Endpoints documented at https://docs.docker.com/docker-hub/download-rate-limit/
pub const AUTH_BASE_URL: &str = "https://auth.docker.io";
pub const REGISTRY_BASE_URL: &str = "https://registry-1.docker.io";
pub const TOKEN_PATH: &str = "/token";
pub const MANIFEST_PATH: &str = "/v2/ratelimitpreview/test/manifests/latest";
pub const REGISTRY_SERVICE: &str = "registry.docker.io";
pub const PULL_SCOPE: &str = "repository:ratelimitpreview/test:pull";

pub const LIMIT_HEADER: &str = "ratelimit-limit";
pub const REMAINING_HEADER: &str = "ratelimit-remaining";
pub const SOURCE_HEADER: &str = "docker-ratelimit-source";

/// The hop of the two-step exchange an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Token,
    Manifest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Token => "token request",
            Stage::Manifest => "manifest request",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("token endpoint returned status {status}")]
    TokenRequest { status: StatusCode },
    #[error("token response could not be parsed: {0}")]
    TokenParse(String),
    #[error("manifest endpoint returned status {status}")]
    ManifestRequest { status: StatusCode },
    #[error("header {0} missing from manifest response")]
    MissingHeader(&'static str),
    #[error("header {header} has unexpected value {value:?}")]
    HeaderParse { header: &'static str, value: String },
    #[error("intervals do not match: limit window {limit_window}s, remaining window {remaining_window}s")]
    IntervalMismatch {
        limit_window: u64,
        remaining_window: u64,
    },
    #[error("{stage} timed out")]
    Timeout { stage: Stage },
    #[error("{stage} failed: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    /// Which step of the exchange produced this error, for diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            FetchError::TokenRequest { .. } => Stage::Token.as_str(),
            FetchError::TokenParse(_) => "token parse",
            FetchError::ManifestRequest { .. } => Stage::Manifest.as_str(),
            FetchError::MissingHeader(_) => "rate-limit headers",
            FetchError::HeaderParse { .. } => "rate-limit header parse",
            FetchError::IntervalMismatch { .. } => "rate-limit interval check",
            FetchError::Timeout { stage } | FetchError::Transport { stage, .. } => stage.as_str(),
        }
    }

    fn from_reqwest(stage: Stage, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout { stage }
        } else {
            FetchError::Transport { stage, source: e }
        }
    }
}

/// Rate-limit accounting reported by the registry for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub limit: u64,
    pub remaining: u64,
    pub interval_seconds: u64,
    pub source: String,
}

/// Resolved token and manifest URLs.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub token_url: Url,
    pub manifest_url: Url,
}

impl Endpoints {
    /// Resolve the fixed token path, query and manifest path against the given hosts.
    pub fn from_bases(auth_base: &str, registry_base: &str) -> Result<Self, url::ParseError> {
        let mut token_url = Url::parse(auth_base)?.join(TOKEN_PATH)?;
        token_url
            .query_pairs_mut()
            .append_pair("service", REGISTRY_SERVICE)
            .append_pair("scope", PULL_SCOPE);
        let manifest_url = Url::parse(registry_base)?.join(MANIFEST_PATH)?;
        Ok(Self {
            token_url,
            manifest_url,
        })
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::from_bases(AUTH_BASE_URL, REGISTRY_BASE_URL).expect("static endpoint urls")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

pub fn build_client() -> reqwest::Result<Client> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("dockerhub-exporter/", env!("CARGO_PKG_VERSION"))),
    );
    Client::builder()
        .default_headers(default_headers)
        .use_rustls_tls()
        .build()
}

fn rate_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+);w=(\d+)$").expect("static regex"))
}

/// Parse a `N;w=S` rate-limit header into `(quota, window_seconds)`.
pub fn parse_rate_header(value: &str) -> Option<(u64, u64)> {
    let caps = rate_regex().captures(value)?;
    let quota = caps.get(1)?.as_str().parse().ok()?;
    let window = caps.get(2)?.as_str().parse().ok()?;
    Some((quota, window))
}

fn required_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, FetchError> {
    let value = headers.get(name).ok_or(FetchError::MissingHeader(name))?;
    value.to_str().map_err(|_| FetchError::HeaderParse {
        header: name,
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    })
}

/// Build a snapshot out of the manifest response headers.
pub fn snapshot_from_headers(headers: &HeaderMap) -> Result<RateLimitSnapshot, FetchError> {
    let limit_raw = required_header(headers, LIMIT_HEADER)?;
    let remaining_raw = required_header(headers, REMAINING_HEADER)?;
    let source = required_header(headers, SOURCE_HEADER)?;
    debug!("{}: {}", LIMIT_HEADER, limit_raw);
    debug!("{}: {}", REMAINING_HEADER, remaining_raw);
    debug!("{}: {}", SOURCE_HEADER, source);

    let (limit, limit_window) =
        parse_rate_header(limit_raw).ok_or_else(|| FetchError::HeaderParse {
            header: LIMIT_HEADER,
            value: limit_raw.to_string(),
        })?;
    let (remaining, remaining_window) =
        parse_rate_header(remaining_raw).ok_or_else(|| FetchError::HeaderParse {
            header: REMAINING_HEADER,
            value: remaining_raw.to_string(),
        })?;

    if limit_window != remaining_window {
        return Err(FetchError::IntervalMismatch {
            limit_window,
            remaining_window,
        });
    }

    // remaining > limit is passed through untouched.
    Ok(RateLimitSnapshot {
        limit,
        remaining,
        interval_seconds: remaining_window,
        source: source.to_string(),
    })
}

/// Two-hop client: bearer token from the identity service, then a HEAD on the
/// test manifest whose response headers carry the pull accounting.
#[derive(Debug, Clone)]
pub struct RateLimitFetcher {
    client: Client,
    endpoints: Endpoints,
}

impl RateLimitFetcher {
    pub fn new() -> reqwest::Result<Self> {
        Self::with_endpoints(Endpoints::default())
    }

    pub fn with_endpoints(endpoints: Endpoints) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client()?,
            endpoints,
        })
    }

    pub async fn fetch(
        &self,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<RateLimitSnapshot, FetchError> {
        let token = self.request_token(credentials, timeout).await?;
        debug!("Successfully retrieved token!");

        let res = self
            .client
            .head(self.endpoints.manifest_url.clone())
            .header(AUTHORIZATION, auth_header(&token)?)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(Stage::Manifest, e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::ManifestRequest { status });
        }

        let snapshot = snapshot_from_headers(res.headers())?;
        debug!(
            "limit: {}, remaining: {}, interval: {}, source: {}",
            snapshot.limit, snapshot.remaining, snapshot.interval_seconds, snapshot.source
        );
        Ok(snapshot)
    }

    async fn request_token(
        &self,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<String, FetchError> {
        let mut req = self
            .client
            .get(self.endpoints.token_url.clone())
            .timeout(timeout);
        if let Some(c) = credentials.filter(|c| !c.username.is_empty() && !c.password.is_empty()) {
            req = req.basic_auth(&c.username, Some(&c.password));
        }
        let res = req
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(Stage::Token, e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(FetchError::TokenRequest { status });
        }

        let body = res
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(Stage::Token, e))?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::TokenParse(e.to_string()))?;
        parsed
            .token
            .ok_or_else(|| FetchError::TokenParse("missing `token` field".into()))
    }
}

fn auth_header(token: &str) -> Result<HeaderValue, FetchError> {
    HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| FetchError::TokenParse("token is not a valid header value".into()))
}
