//! HTTP client for the writing server
//!
//! Opens generation streams and performs envelope-wrapped REST reads. Every
//! request asks the injected [`CredentialProvider`] for a bearer token.

mod error;

pub use error::ApiError;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::CredentialProvider;
use crate::config::ClientConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Business code the server uses for success inside the envelope
const ENVELOPE_OK: i64 = 200;

/// `{code, message, data}` wrapper around REST responses
#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    credentials: Arc<dyn CredentialProvider>,
}

impl ApiClient {
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self::with_http_client(http, config, credentials))
    }

    /// Use a preconfigured reqwest client (proxies, custom TLS)
    pub fn with_http_client(
        http: reqwest::Client,
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            config: Arc::new(config),
            credentials,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve an endpoint against the base URL. Absolute URLs pass through.
    pub fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    async fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token().await {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// POST a JSON payload and return the response once its status is 2xx
    ///
    /// The body is left unread so the caller can consume it as a stream.
    pub async fn open_stream<P>(&self, endpoint: &str, payload: &P) -> Result<Response, ApiError>
    where
        P: Serialize + ?Sized,
    {
        let url = self.url(endpoint);
        debug!("Opening stream: POST {}", url);

        let request = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(payload);
        let request = self.authorize(request).await;

        let response = request.send().await?;
        check_status(response).await
    }

    /// GET a JSON resource, unwrapping the response envelope
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        let url = self.url(endpoint);
        debug!("GET {}", url);

        let request = self.http.get(&url).timeout(self.config.timeout());
        let request = self.authorize(request).await;

        let response = check_status(request.send().await?).await?;
        let body: Value = response.json().await?;
        unwrap_envelope(body)
    }
}

/// Turn a non-2xx response into [`ApiError::Status`]
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    // Best effort: the error body may carry a server message
    let server_message = match response.text().await {
        Ok(body) => serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|json| json.get("message")?.as_str().map(str::to_string))
            .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty())),
        Err(e) => {
            debug!("Failed to read error body: {}", e);
            None
        }
    };
    warn!("Server returned HTTP {}: {:?}", status, server_message);
    Err(ApiError::from_status(status.as_u16(), server_message))
}

/// Unwrap `{code, message, data}`; bodies without a numeric `code` are
/// taken as the payload itself.
pub(crate) fn unwrap_envelope<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    if !body.get("code").is_some_and(Value::is_number) {
        return Ok(serde_json::from_value(body)?);
    }

    let envelope: Envelope = serde_json::from_value(body)?;
    if envelope.code != ENVELOPE_OK {
        return Err(ApiError::Envelope {
            code: envelope.code,
            message: envelope
                .message
                .unwrap_or_else(|| "Request failed".to_string()),
        });
    }
    Ok(serde_json::from_value(envelope.data.unwrap_or(Value::Null))?)
}
