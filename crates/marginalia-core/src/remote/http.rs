//! HTTP client for the remote store API

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{ReconcileRequest, ReconcileResponse, RemoteStore, SaltResponse};
use crate::config::RemoteConfig;
use crate::crypto::Salt;
use crate::entitlement::{EntitlementResponse, Tier};
use crate::error::{Error, Result};
use crate::util::compact_text;

/// [`RemoteStore`] over HTTPS with bearer auth
#[derive(Clone)]
pub struct HttpRemoteStore {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_url: config.api_url.clone(),
            token: config.token.clone(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.api_url)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Remote(format!("invalid response payload: {e}")))
    }
}

fn transport_error(error: &reqwest::Error) -> Error {
    Error::Network(error.to_string())
}

/// Map a failed HTTP status onto the error kinds the engine retries on
fn classify_status(status: StatusCode, body: &str) -> Error {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Error::Network(message),
        status if status.is_server_error() => Error::Network(message),
        _ => Error::Remote(message),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn reconcile(&self, request: &ReconcileRequest) -> Result<ReconcileResponse> {
        let response = self
            .client
            .post(self.endpoint("/v1/sync/reconcile"))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        Self::read_json(response).await
    }

    async fn account_salt(&self) -> Result<Salt> {
        let response = self
            .client
            .get(self.endpoint("/v1/account/salt"))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let payload: SaltResponse = Self::read_json(response).await?;
        Salt::from_base64(&payload.salt)
            .map_err(|e| Error::Remote(format!("invalid account salt: {e}")))
    }

    async fn entitlement(&self) -> Result<Tier> {
        let response = self
            .client
            .get(self.endpoint("/v1/entitlement"))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        let payload: EntitlementResponse = Self::read_json(response).await?;
        Ok(payload.tier)
    }
}
