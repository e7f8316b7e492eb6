/*
[INPUT]:  Command name, ordered parameters, client credentials
[OUTPUT]: Signed POST /tradingApi calls with decoded results
[POS]:    HTTP layer - authenticated command dispatcher
[UPDATE]: When changing body layout, auth headers, or envelope handling
*/

use std::sync::PoisonError;

use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::http::{PoloniexClient, PoloniexError, Result};

const TRADING_API_PATH: &str = "tradingApi";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const KEY_HEADER: &str = "Key";
const SIGN_HEADER: &str = "Sign";

/// One private call, serialized and signed. Built fresh per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub command: String,
    pub nonce: u64,
    /// Form-encoded body; these exact bytes were signed
    pub body: String,
    /// Hex HMAC-SHA512 of `body`
    pub signature: String,
}

impl PoloniexClient {
    /// Allocate a nonce, serialize the body and sign it as one step.
    ///
    /// Holding `sign_lock` across all three keeps nonce allocation and
    /// signing atomic with respect to other commands on this client.
    pub fn sign_command(&self, command: &str, params: &[(&str, String)]) -> Result<SignedRequest> {
        let auth = self.auth.as_ref().ok_or_else(|| PoloniexError::Authentication {
            message: format!("{command} requires API credentials"),
        })?;

        let _guard = self.sign_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let nonce = self.nonce.next();
        let body = encode_body(command, params, nonce);
        let signature = auth.signer.sign(body.as_bytes());

        Ok(SignedRequest {
            command: command.to_string(),
            nonce,
            body,
            signature,
        })
    }

    /// Execute a private command and return the raw JSON payload.
    ///
    /// POST /tradingApi
    /// Transport failures are returned as-is; a command is never resent.
    pub async fn execute_raw(&self, command: &str, params: &[(&str, String)]) -> Result<Value> {
        let request = self.sign_command(command, params)?;
        let api_key = self.api_key().unwrap_or_default();
        let url = self.endpoint(TRADING_API_PATH)?;

        if self.debug_enabled() {
            debug!(command, nonce = request.nonce, body = %request.body, "signed request dump");
        } else {
            debug!(command, nonce = request.nonce, "signed request");
        }

        let response = self
            .http_client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(KEY_HEADER, api_key)
            .header(SIGN_HEADER, request.signature.as_str())
            .body(request.body)
            .send()
            .await
            .map_err(|err| {
                warn!(command, nonce = request.nonce, error = %err, "signed request failed");
                PoloniexError::from(err)
            })?;

        self.read_envelope(command, response).await
    }

    /// Execute a private command and decode into the expected shape
    pub async fn execute<T>(&self, command: &str, params: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self.execute_raw(command, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// `command=<c>&<params...>&nonce=<n>`, form-encoded in that order
fn encode_body(command: &str, params: &[(&str, String)], nonce: u64) -> String {
    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("command", command);
    for (key, value) in params {
        form.append_pair(key, value);
    }
    form.append_pair("nonce", &nonce.to_string());
    form.finish()
}
