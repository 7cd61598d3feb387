//! Bearer-token auth collaborator
//!
//! Token acquisition happens elsewhere; this wrapper only attaches an
//! already-issued token to every call routed through it.

use async_trait::async_trait;
use tracing::warn;

use super::{HttpTransport, Transport, TransportError, TransportResponse, TransportResult};
use crate::RequestDescriptor;

/// Transport that authenticates every request with a bearer token
#[derive(Debug)]
pub struct BearerTransport {
    inner: HttpTransport,
    token: String,
}

impl BearerTransport {
    /// Wrap `inner`, sending `token` on every request
    pub fn new(inner: HttpTransport, token: impl Into<String>) -> Self {
        Self {
            inner,
            token: token.into(),
        }
    }

    /// Whether a token is available
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }
}

#[async_trait]
impl Transport for BearerTransport {
    async fn execute(&self, request: &RequestDescriptor) -> TransportResult<TransportResponse> {
        if !self.has_token() {
            return Err(TransportError::AuthRequired);
        }

        let authed = request
            .clone()
            .with_header("Authorization", format!("Bearer {}", self.token));

        match self.inner.execute(&authed).await {
            Err(TransportError::Status { status: 401, .. }) => {
                warn!(url = %request.url, "Bearer token rejected");
                Err(TransportError::AuthRequired)
            }
            other => other,
        }
    }

    fn reset(&self) {
        self.inner.reset();
    }
}
