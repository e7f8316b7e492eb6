/*
[INPUT]:  HTTP configuration (base URL, timeouts, credentials)
[OUTPUT]: Configured reqwest client and decoded response envelopes
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing client behavior
*/

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::http::nonce::NonceSource;
use crate::http::{PoloniexError, RequestSigner, Result};

/// Base URL for the Poloniex REST API
const API_BASE_URL: &str = "https://poloniex.com";

const ENV_API_KEY: &str = "POLONIEX_API_KEY";
const ENV_API_SECRET: &str = "POLONIEX_API_SECRET";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Override the whole-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// API key pair for private endpoints
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: Vec<u8>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read `POLONIEX_API_KEY` / `POLONIEX_API_SECRET`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(ENV_API_KEY)
            .map_err(|_| PoloniexError::Config(format!("{ENV_API_KEY} is not set")))?;
        let api_secret = std::env::var(ENV_API_SECRET)
            .map_err(|_| PoloniexError::Config(format!("{ENV_API_SECRET} is not set")))?;
        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn api_secret(&self) -> &[u8] {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Key material bound to a client at construction
#[derive(Debug)]
pub(crate) struct CommandAuth {
    pub(crate) api_key: String,
    pub(crate) signer: RequestSigner,
}

/// Main HTTP client for the Poloniex API
#[derive(Debug)]
pub struct PoloniexClient {
    pub(crate) http_client: Client,
    base_url: Url,
    pub(crate) auth: Option<CommandAuth>,
    pub(crate) nonce: NonceSource,
    pub(crate) sign_lock: Mutex<()>,
    debug: AtomicBool,
}

impl PoloniexClient {
    /// Create a client for public endpoints only
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default(), None)
    }

    /// Create a client able to call private endpoints
    pub fn with_credentials(credentials: Credentials) -> Result<Self> {
        Self::with_config(ClientConfig::default(), Some(credentials))
    }

    /// Create a new client with custom configuration
    pub fn with_config(config: ClientConfig, credentials: Option<Credentials>) -> Result<Self> {
        Self::with_config_and_base_url(config, credentials, API_BASE_URL)
    }

    /// Create a new client against a non-default base URL
    pub fn with_config_and_base_url(
        config: ClientConfig,
        credentials: Option<Credentials>,
        base_url: &str,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        let auth = credentials
            .map(|credentials| -> Result<CommandAuth> {
                Ok(CommandAuth {
                    signer: RequestSigner::new(credentials.api_secret())?,
                    api_key: credentials.api_key,
                })
            })
            .transpose()?;

        Ok(Self {
            http_client,
            base_url: Url::parse(base_url)?,
            auth,
            nonce: NonceSource::new(),
            sign_lock: Mutex::new(()),
            debug: AtomicBool::new(false),
        })
    }

    /// API key in use, if credentials were supplied
    pub fn api_key(&self) -> Option<&str> {
        self.auth.as_ref().map(|auth| auth.api_key.as_str())
    }

    /// Enable or disable request/response body dumps at debug level
    pub fn set_debug(&self, enable: bool) {
        self.debug.store(enable, Ordering::Relaxed);
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Build full URL for an endpoint path
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// GET /public?command={command}&{params}
    pub(crate) async fn public_get<T>(&self, command: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint("public")?;
        debug!(command, "public request");

        let response = self
            .http_client
            .get(url)
            .query(&[("command", command)])
            .query(params)
            .send()
            .await?;

        let value = self.read_envelope(command, response).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub(crate) async fn read_envelope(&self, command: &str, response: Response) -> Result<Value> {
        let status = response.status();
        let body = response.bytes().await?;

        if self.debug_enabled() {
            debug!(
                command,
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&body),
                "response dump"
            );
        } else {
            debug!(command, status = status.as_u16(), bytes = body.len(), "response received");
        }

        decode_envelope(status, &body)
    }
}

/// Parse a response body and surface in-body API errors.
///
/// A top-level `"error"` member is a failure even on HTTP 200.
pub(crate) fn decode_envelope(status: StatusCode, body: &[u8]) -> Result<Value> {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) if status.is_success() => {
            return Err(PoloniexError::InvalidResponse(format!(
                "response body is not JSON: {err}"
            )));
        }
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            return Err(PoloniexError::api_error(status, text));
        }
    };

    if let Some(error) = value.get("error").filter(|error| !error.is_null()) {
        let message = error
            .as_str()
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Err(PoloniexError::api_error(status, message));
    }

    if !status.is_success() {
        return Err(PoloniexError::api_error(status, value.to_string()));
    }

    Ok(value)
}
