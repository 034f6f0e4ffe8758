//! HTTP transport seam
//!
//! The request engine builds fully-formed requests and hands them to a
//! [`Transport`]. Production wires [`ReqwestTransport`]; tests substitute a
//! scripted fake to observe requests and inject outcomes.

use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::time::Duration;

/// A fully prepared bridge request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Absolute URL, querystring included
    pub url: String,
    /// Extra headers (`x-pubkey`, `x-signature`)
    pub headers: Vec<(String, String)>,
    /// Basic-auth credential (email, hashed password)
    pub basic_auth: Option<(String, String)>,
    /// JSON body for non-GET requests
    pub body: Option<serde_json::Value>,
    /// Total request timeout
    pub timeout: Duration,
}

/// Raw transport response before normalization
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the request engine and the HTTP stack
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute the request, returning the raw response or a transport error.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Production transport backed by `reqwest`
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method: reqwest::Method = request
            .method
            .parse()
            .map_err(|_| BridgeError::Network(format!("invalid method: {}", request.method)))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some((user, pass)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}
