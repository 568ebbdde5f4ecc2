use std::env;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const USERNAME_ENV: &str = "DOCKER_HUB_USERNAME";
pub const PASSWORD_ENV: &str = "DOCKER_HUB_PASSWORD";

pub const DEFAULT_PORT: i64 = 8000;
pub const DEFAULT_LISTEN: &str = "0.0.0.0";
pub const DEFAULT_TIMEOUT_SECS: i64 = 15;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Port must be between 1 and 65535")]
    Port(i64),
    #[error("Timeout must be a positive number")]
    Timeout(i64),
    #[error("IP address must be in the format of '1.2.3.4'")]
    ListenAddress(String),
    #[error("TLS key and TLS crt must be specified if HTTPS is enabled!")]
    PartialTls,
    #[error("DOCKER_HUB_USERNAME and DOCKER_HUB_PASSWORD must be set together!")]
    PartialCredentials,
}

/// Docker Hub username and password (or access token) used for Basic auth on the token hop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Resolve the credential pair from the two optional environment values.
    ///
    /// Exactly one present is a configuration error. Both present but either one
    /// empty falls back to anonymous mode, as does both absent.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        match (username, password) {
            (Some(username), Some(password)) => {
                if username.is_empty() || password.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Self { username, password }))
                }
            }
            (None, None) => Ok(None),
            _ => Err(ConfigError::PartialCredentials),
        }
    }

    /// Like [`Credentials::from_parts`], but presence is decided on the raw
    /// values so a non-UTF-8 variable still counts as set.
    pub fn from_os_parts(
        username: Option<OsString>,
        password: Option<OsString>,
    ) -> Result<Option<Self>, ConfigError> {
        Self::from_parts(
            username.map(|v| v.to_string_lossy().into_owned()),
            password.map(|v| v.to_string_lossy().into_owned()),
        )
    }

    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_os_parts(env::var_os(USERNAME_ENV), env::var_os(PASSWORD_ENV))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Command-line options before validation.
#[derive(Debug, Clone)]
pub struct RawOptions {
    pub port: i64,
    pub listen: String,
    pub tls_crt: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub timeout_secs: i64,
    pub verbose: bool,
}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            listen: DEFAULT_LISTEN.to_string(),
            tls_crt: None,
            tls_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            verbose: false,
        }
    }
}

/// Validated runtime configuration for the exporter process.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub listen: Ipv4Addr,
    pub port: u16,
    pub tls: Option<TlsPaths>,
    pub timeout: Duration,
}

impl ExporterConfig {
    pub fn use_https(&self) -> bool {
        self.tls.is_some()
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_https() {
            "https"
        } else {
            "http"
        }
    }
}

/// Validate command-line options.
/// Checks run in order: port, timeout, listen address, TLS pair.
pub fn validate(opts: &RawOptions) -> Result<ExporterConfig, ConfigError> {
    let port = u16::try_from(opts.port)
        .ok()
        .filter(|p| *p >= 1)
        .ok_or(ConfigError::Port(opts.port))?;

    if opts.timeout_secs < 1 {
        return Err(ConfigError::Timeout(opts.timeout_secs));
    }
    let timeout = Duration::from_secs(opts.timeout_secs as u64);

    let listen = parse_listen_address(&opts.listen)?;

    let tls = match (&opts.tls_crt, &opts.tls_key) {
        (Some(cert), Some(key)) => Some(TlsPaths {
            cert: cert.clone(),
            key: key.clone(),
        }),
        (None, None) => None,
        _ => return Err(ConfigError::PartialTls),
    };

    Ok(ExporterConfig {
        listen,
        port,
        tls,
        timeout,
    })
}

// Strict dotted-quad: four decimal octets, no leading zeros, nothing else.
pub fn parse_listen_address(s: &str) -> Result<Ipv4Addr, ConfigError> {
    s.parse::<Ipv4Addr>()
        .map_err(|_| ConfigError::ListenAddress(s.to_string()))
}
