use std::time::Duration;

use serde::de::DeserializeOwned;

use super::Facilitator;
use crate::config::FacilitatorConfig;
use crate::error::X402Error;
use crate::hmac::{sign_body, FACILITATOR_AUTH_HEADER};
use crate::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};

/// Facilitator reached over HTTP at `{base_url}/verify` and `{base_url}/settle`.
///
/// Forwards payload and requirements untouched and returns the remote
/// decision verbatim. Any I/O, status or decoding failure is a
/// [`X402Error::Transport`].
pub struct RemoteFacilitator {
    client: reqwest::Client,
    base_url: String,
    shared_secret: Option<Vec<u8>>,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteFacilitator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shared_secret: None,
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &FacilitatorConfig) -> Result<Self, X402Error> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| X402Error::Config("FACILITATOR_URL is not set".to_string()))?;
        let mut facilitator = Self::new(url).with_timeout(config.timeout);
        facilitator.shared_secret = config.shared_secret.clone();
        facilitator.api_key = config.api_key.clone();
        Ok(facilitator)
    }

    /// Sign request bodies with HMAC-SHA256 in `X-Facilitator-Auth`.
    pub fn with_shared_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.shared_secret = Some(secret.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<T, X402Error> {
        let url = format!("{}/{endpoint}", self.base_url);
        let body = serde_json::to_vec(&serde_json::json!({
            "x402Version": payload.x402_version,
            "paymentPayload": payload,
            "paymentRequirements": requirements,
        }))?;

        let mut request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .timeout(self.timeout);
        if let Some(secret) = &self.shared_secret {
            request = request.header(FACILITATOR_AUTH_HEADER, sign_body(secret, &body)?);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let resp = request.body(body).send().await.map_err(|e| {
            tracing::error!(url = %url, error = %e, "facilitator request failed");
            X402Error::Transport(format!("{endpoint} request failed: {e}"))
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            tracing::error!(url = %url, "facilitator rejected credentials");
            return Err(X402Error::Transport(
                "facilitator authentication failed".to_string(),
            ));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::error!(url = %url, %status, "facilitator returned an error status");
            return Err(X402Error::Transport(format!(
                "{endpoint} returned {status}: {text}"
            )));
        }

        resp.json::<T>().await.map_err(|e| {
            X402Error::Transport(format!("{endpoint} response parse failed: {e}"))
        })
    }
}

impl Facilitator for RemoteFacilitator {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, X402Error> {
        self.call("verify", payload, requirements).await
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, X402Error> {
        self.call("settle", payload, requirements).await
    }
}
