//! # Vault Client
//!
//! Purpose: Fetch configuration files from the shrmpl vault over mutually
//! authenticated HTTPS.
//!
//! ## Design Principles
//! 1. **Self-Contained Calls**: Every request builds its own TLS context,
//!    HTTP client and runtime; nothing is held between calls.
//! 2. **Hard Deadline**: `request_timeout` bounds the whole request, body
//!    included, not each socket read.
//! 3. **Typed Statuses**: 401/404/429 map to dedicated error variants.
//! 4. **Secret Hygiene**: The shared secret is redacted from `Debug` output
//!    and never logged.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode, Url};
use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use shrmpl_common::{
    ClientError, ClientResult, ConfigError, Settings, ValidationError, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_IO_TIMEOUT,
};

use crate::tls::{build_client_config, load_roots};

/// Path that never exists on the vault; a 404 for it proves the round trip.
const CHECK_PATH: &str = "test";

const USER_AGENT: &str = concat!("shrmpl-client/", env!("CARGO_PKG_VERSION"));

/// Config files are small; anything past this is refused.
const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Construction-time settings for [`VaultClient`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// `https://host[:port][/prefix]`.
    pub base_url: String,
    /// PEM client certificate chain.
    pub cert_path: PathBuf,
    /// PEM client private key.
    pub key_path: PathBuf,
    /// Shared secret sent as the `secret` query parameter.
    pub secret: String,
    /// PEM CA bundle for the server chain; bundled Mozilla roots when absent.
    #[serde(default)]
    pub ca_path: Option<PathBuf>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    /// Deadline for a whole request: connect, handshake, headers and body.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_request_timeout() -> Duration {
    DEFAULT_IO_TIMEOUT
}

impl VaultConfig {
    pub fn new(
        base_url: impl Into<String>,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        secret: impl Into<String>,
    ) -> Self {
        VaultConfig {
            base_url: base_url.into(),
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            secret: secret.into(),
            ca_path: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_ca_path(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.ca_path = Some(ca_path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Reads `VAULT_SERVER`, `CLIENT_CERT_PATH`, `CLIENT_KEY_PATH`,
    /// `SECRET_KEY` and the optional `CA_CERT_PATH`.
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let mut config = VaultConfig::new(
            settings.require("VAULT_SERVER")?,
            settings.require("CLIENT_CERT_PATH")?,
            settings.require("CLIENT_KEY_PATH")?,
            settings.require("SECRET_KEY")?,
        );
        if let Some(ca_path) = settings.get("CA_CERT_PATH").filter(|path| !path.is_empty()) {
            config = config.with_ca_path(ca_path);
        }
        Ok(config)
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("base_url", &self.base_url)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("secret", &"<redacted>")
            .field("ca_path", &self.ca_path)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Blocking mutual-TLS client for the shrmpl vault.
///
/// Each call drives `reqwest` on its own current-thread Tokio runtime, so the
/// methods must not be called from inside an async runtime.
#[derive(Debug, Clone)]
pub struct VaultClient {
    config: VaultConfig,
    base_url: Url,
}

/// Status, rate-limit hint and fully read body of one vault reply.
#[derive(Debug)]
struct VaultResponse {
    status: StatusCode,
    retry_after: Option<String>,
    body: Vec<u8>,
}

impl VaultClient {
    /// Validates the base URL and secret. Certificates are read per call.
    pub fn new(config: VaultConfig) -> ClientResult<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        validate_secret(&config.secret)?;
        Ok(VaultClient { config, base_url })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Proves TLS, client authentication and the secret by requesting a path
    /// that does not exist. Only a 404 counts as success.
    pub fn connect(&self) -> ClientResult<()> {
        let response = self.request(CHECK_PATH)?;
        if response.status == StatusCode::NOT_FOUND {
            debug!(host = self.base_url.host_str().unwrap_or_default(), "vault reachable");
            return Ok(());
        }
        warn!(status = response.status.as_u16(), "vault check rejected");
        Err(http_error(response.status))
    }

    /// Downloads one configuration file as text.
    pub fn get_config(&self, filename: &str) -> ClientResult<String> {
        validate_filename(filename)?;
        let response = self.request(filename)?;
        debug!(filename, status = response.status.as_u16(), "vault response");

        match response.status {
            StatusCode::OK => String::from_utf8(response.body).map_err(|err| {
                ClientError::InvalidResponse(format!("body is not valid UTF-8: {}", err))
            }),
            StatusCode::NOT_FOUND => Err(ClientError::FileNotFound),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(ClientError::RateLimited {
                retry_after: response.retry_after,
            }),
            status => Err(http_error(status)),
        }
    }

    /// `<base>/<resource>?secret=<secret>`.
    fn resource_url(&self, resource: &str) -> ClientResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ValidationError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(resource.split('/'));
        url.set_query(Some(&format!("secret={}", self.config.secret)));
        Ok(url)
    }

    fn request(&self, resource: &str) -> ClientResult<VaultResponse> {
        let url = self.resource_url(resource)?;
        let tls = self.tls_config()?;
        let http = Client::builder()
            .use_preconfigured_tls((*tls).clone())
            .https_only(true)
            .no_proxy()
            .redirect(Policy::none())
            .connect_timeout(self.config.connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(transport_error)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let deadline = self.config.request_timeout;
        runtime.block_on(async move {
            match tokio::time::timeout(deadline, fetch(&http, url)).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("vault request timed out after {:?}", deadline),
                ))),
            }
        })
    }

    fn tls_config(&self) -> ClientResult<Arc<ClientConfig>> {
        let roots = load_roots(self.config.ca_path.as_deref())?;
        build_client_config(roots, &self.config.cert_path, &self.config.key_path)
    }
}

async fn fetch(http: &Client, url: Url) -> ClientResult<VaultResponse> {
    let mut response = http.get(url).send().await.map_err(transport_error)?;
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(transport_error)? {
        if body.len() + chunk.len() > MAX_BODY_LEN {
            return Err(ClientError::InvalidResponse(
                "response body too large".to_string(),
            ));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(VaultResponse {
        status,
        retry_after,
        body,
    })
}

fn http_error(status: StatusCode) -> ClientError {
    ClientError::Http {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
    }
}

/// Surfaces the TLS or IO failure buried in a `reqwest` error chain.
/// The request URL is stripped from the message.
fn transport_error(err: reqwest::Error) -> ClientError {
    let mut io_kind = None;
    let mut cause: Option<&(dyn StdError + 'static)> = Some(&err);
    while let Some(current) = cause {
        if let Some(tls) = current.downcast_ref::<rustls::Error>() {
            return ClientError::Tls(tls.clone());
        }
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            if let Some(tls) = io_err
                .get_ref()
                .and_then(|inner| inner.downcast_ref::<rustls::Error>())
            {
                return ClientError::Tls(tls.clone());
            }
            io_kind.get_or_insert(io_err.kind());
        }
        cause = current.source();
    }

    let kind = if err.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io_kind.unwrap_or(io::ErrorKind::Other)
    };
    ClientError::Io(io::Error::new(kind, err.without_url()))
}

/// `https` only, no credentials, query or fragment; trailing slashes dropped.
fn parse_base_url(raw: &str) -> Result<Url, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidUrl(format!("{}: {}", reason, raw));

    let mut url = Url::parse(raw.trim()).map_err(|err| invalid(&err.to_string()))?;
    if url.scheme() != "https" {
        return Err(invalid("scheme must be https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("credentials not allowed"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query or fragment not allowed"));
    }
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    Ok(url)
}

/// The secret is opaque and may be empty, but it travels unescaped in the
/// query, so whitespace and control characters are refused.
fn validate_secret(secret: &str) -> Result<(), ValidationError> {
    if secret.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::UnsafeUrlComponent { field: "secret" });
    }
    Ok(())
}

fn validate_filename(filename: &str) -> Result<(), ValidationError> {
    if filename.is_empty() || filename.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::UnsafeUrlComponent { field: "filename" });
    }
    Ok(())
}
