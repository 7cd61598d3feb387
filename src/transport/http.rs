//! reqwest-backed transport
//!
//! Provides the default [`Transport`] with:
//! - Query-string params for GET
//! - POST payload as the body, or params as a form body when there is no payload
//! - Redirects surfaced as statuses instead of followed
//! - Session reset by swapping in a freshly built client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{redirect, Client};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Transport, TransportError, TransportResponse, TransportResult};
use crate::{Method, RequestDescriptor};

/// Default connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: concat!("rest-poller/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Plain HTTP transport
pub struct HttpTransport {
    client: RwLock<Client>,
    settings: HttpSettings,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("settings", &self.settings)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport with its own connection pool
    pub fn new(settings: &HttpSettings) -> TransportResult<Self> {
        let client = build_client(settings)?;
        Ok(Self {
            client: RwLock::new(client),
            settings: settings.clone(),
        })
    }

    /// Settings used to build the client
    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    fn client(&self) -> Client {
        match self.client.read() {
            Ok(client) => client.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

fn build_client(settings: &HttpSettings) -> TransportResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(Duration::from_secs(settings.request_timeout_secs))
        .user_agent(settings.user_agent.clone())
        .redirect(redirect::Policy::none())
        .build()
        .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {e}")))
}

fn build_headers(request: &RequestDescriptor) -> TransportResult<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(request.headers.len() + 1);
    for (key, value) in &request.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| TransportError::Malformed(format!("invalid header name {key}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Malformed(format!("invalid header value for {key}: {e}")))?;
        headers.insert(name, value);
    }
    if request.method == Method::Post && !headers.contains_key(CONTENT_TYPE) {
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
    }
    Ok(headers)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TransportResponse> {
        if request.url.trim().is_empty() {
            return Err(TransportError::UrlRequired);
        }

        let client = self.client();
        let builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        let mut builder = builder.headers(build_headers(request)?);
        builder = match (request.method, &request.payload) {
            (Method::Post, Some(payload)) => {
                let builder = if request.params.is_empty() {
                    builder
                } else {
                    builder.query(&request.params)
                };
                builder.body(payload.clone())
            }
            (Method::Post, None) => builder.form(&request.params),
            (Method::Get, _) if !request.params.is_empty() => builder.query(&request.params),
            (Method::Get, _) => builder,
        };

        debug!(
            method = %request.method,
            url = %request.url,
            params = request.params.len(),
            "Sending request"
        );

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::UrlRequired
            } else {
                TransportError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Connection(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(TransportResponse::new(status.as_u16(), headers, body))
    }

    fn reset(&self) {
        match build_client(&self.settings) {
            Ok(fresh) => {
                let mut client = match self.client.write() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                *client = fresh;
                debug!("HTTP session reset");
            }
            Err(e) => warn!(error = %e, "Failed to reset HTTP session, keeping previous client"),
        }
    }
}
