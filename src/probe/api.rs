//! HTTP API probes.
//!
//! - [`ApiProbe`]: HTTP client bound to a base URL, with optional proxy
//! - [`ApiClient`]: the `call` seam shared by [`ApiProbe`] and the fixture stub
//! - [`ApiEndpointProbe`]: probe whose measurement is a single API call
//!
//! `get()`/`post()` return raw responses and transport errors. `call()`
//! absorbs every failure (non-success status, transport, decoding) into
//! `None` after logging it, so a long-running session survives network
//! hiccups.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Proxy, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::probe::{Measured, Probe, ProbeError};

/// Default request timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Scheme to proxy URL mapping.
pub type ProxyMap = BTreeMap<String, String>;

/// Build the proxy map for a proxy specification.
///
/// A specification without a scheme separator is assumed to be an HTTP
/// proxy (`host:port` becomes `http://host:port`). The same proxy serves
/// both `http` and `https`. Empty or absent input yields no mapping.
pub fn build_proxy_map(proxy: Option<&str>) -> Option<ProxyMap> {
    let proxy = proxy.filter(|p| !p.is_empty())?;
    let url = if proxy.matches("://").count() == 1 {
        proxy.to_string()
    } else {
        format!("http://{proxy}")
    };
    Some(ProxyMap::from([
        ("http".to_string(), url.clone()),
        ("https".to_string(), url),
    ]))
}

/// HTTP method supported by API probes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    /// Status code that `call()` treats as success for this method.
    pub fn success_status(self) -> StatusCode {
        match self {
            Self::Get => StatusCode::OK,
            Self::Post => StatusCode::CREATED,
        }
    }
}

/// Decoded body of a successful API call.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body parsed as JSON.
    Json(serde_json::Value),
    /// Body returned as text.
    Text(String),
}

impl Payload {
    /// JSON value, if the payload was decoded as JSON.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Raw text, if the payload was not decoded.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

/// A single API request relative to the probe's base URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Path appended to the base URL (empty: the base URL itself).
    #[serde(default)]
    pub endpoint: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Query parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ApiRequest {
    /// Create a request for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Add a request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add a query parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Configuration for an API probe.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, extended by each request's endpoint.
    pub url: String,
    /// Proxy server (`host:port` or full URL).
    pub proxy: Option<String>,
    /// Encode bodies and decode responses as JSON (default: true).
    pub json: bool,
    /// Request timeout (default: 10s).
    pub timeout: Duration,
}

impl ApiConfig {
    /// Create a configuration for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy: None,
            json: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Route requests through `proxy`.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Enable or disable JSON encoding.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Issues API calls whose failures are absorbed.
#[async_trait::async_trait]
pub trait ApiClient: Send + Sync {
    /// Perform `request` with `method`, returning the decoded body on
    /// success and `None` on any failure.
    async fn call(&self, request: &ApiRequest, method: HttpMethod) -> Option<Payload>;
}

/// HTTP client for an API service.
pub struct ApiProbe {
    config: ApiConfig,
    proxies: Option<ProxyMap>,
    client: Client,
}

impl ApiProbe {
    /// Create a client from `config`.
    ///
    /// # Errors
    /// Returns `ProbeError::Config` if the proxy URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: ApiConfig) -> Result<Self, ProbeError> {
        let proxies = build_proxy_map(config.proxy.as_deref());

        let mut builder = Client::builder().timeout(config.timeout);
        match &proxies {
            Some(map) => {
                for (scheme, url) in map {
                    let proxy = match scheme.as_str() {
                        "https" => Proxy::https(url),
                        _ => Proxy::http(url),
                    }
                    .map_err(|e| ProbeError::Config(format!("invalid proxy '{url}': {e}")))?;
                    builder = builder.proxy(proxy);
                }
            }
            None => builder = builder.no_proxy(),
        }

        let client = builder
            .build()
            .map_err(|e| ProbeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            proxies,
            client,
        })
    }

    /// Base URL of the API.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Proxy mapping in use, if any.
    pub fn proxies(&self) -> Option<&ProxyMap> {
        self.proxies.as_ref()
    }

    /// Whether bodies are JSON-encoded and responses JSON-decoded.
    pub fn is_json(&self) -> bool {
        self.config.json
    }

    /// Switch JSON encoding on or off.
    pub fn set_json(&mut self, json: bool) {
        self.config.json = json;
    }

    /// Call the API via HTTP GET.
    pub async fn get(&self, request: &ApiRequest) -> Result<Response, ProbeError> {
        self.send(request, HttpMethod::Get).await
    }

    /// Call the API via HTTP POST.
    pub async fn post(&self, request: &ApiRequest) -> Result<Response, ProbeError> {
        self.send(request, HttpMethod::Post).await
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.is_empty() {
            self.config.url.clone()
        } else {
            format!("{}{}", self.config.url, endpoint)
        }
    }

    async fn send(&self, request: &ApiRequest, method: HttpMethod) -> Result<Response, ProbeError> {
        let url = self.endpoint_url(&request.endpoint);
        let builder = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        Ok(self.prepare(builder, request).send().await?)
    }

    fn prepare(&self, mut builder: RequestBuilder, request: &ApiRequest) -> RequestBuilder {
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        match &request.body {
            Some(body) if self.config.json => builder.json(body),
            Some(serde_json::Value::String(text)) => builder.body(text.clone()),
            Some(body) => builder.body(body.to_string()),
            None => builder,
        }
    }

    async fn decode(&self, response: Response) -> Result<Payload, ProbeError> {
        if self.config.json {
            Ok(Payload::Json(response.json().await?))
        } else {
            Ok(Payload::Text(response.text().await?))
        }
    }
}

impl std::fmt::Debug for ApiProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiProbe")
            .field("config", &self.config)
            .field("proxies", &self.proxies)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ApiClient for ApiProbe {
    async fn call(&self, request: &ApiRequest, method: HttpMethod) -> Option<Payload> {
        let url = self.endpoint_url(&request.endpoint);

        let response = match self.send(request, method).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %url, method = %method, error = %e, "Failed to call API");
                return None;
            }
        };

        let status = response.status();
        if status != method.success_status() {
            tracing::error!(
                url = %url,
                method = %method,
                status = status.as_u16(),
                reason = status.canonical_reason().unwrap_or(""),
                "API call returned unexpected status"
            );
            return None;
        }

        match self.decode(response).await {
            Ok(payload) => {
                tracing::debug!(url = %url, method = %method, "API call successful");
                Some(payload)
            }
            Err(e) => {
                tracing::warn!(url = %url, method = %method, error = %e, "Failed to decode API response");
                None
            }
        }
    }
}

/// Measures the result of one API call per run.
///
/// The output is `None` when the call failed.
#[derive(Debug)]
pub struct ApiEndpointProbe<C> {
    name: String,
    client: C,
    request: ApiRequest,
    method: HttpMethod,
    last: Measured<Option<Payload>>,
}

impl<C: ApiClient> ApiEndpointProbe<C> {
    /// Create a probe issuing `request` with `method` through `client`.
    pub fn new(
        name: impl Into<String>,
        client: C,
        request: ApiRequest,
        method: HttpMethod,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            request,
            method,
            last: Measured::new(),
        }
    }

    /// Underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Request issued on each run.
    pub fn request_mut(&mut self) -> &mut ApiRequest {
        &mut self.request
    }
}

#[async_trait::async_trait]
impl<C: ApiClient> Probe for ApiEndpointProbe<C> {
    type Raw = Option<Payload>;
    type Output = Option<Payload>;

    fn name(&self) -> &str {
        &self.name
    }

    async fn measure(&mut self) -> Result<Option<Payload>, ProbeError> {
        Ok(self.client.call(&self.request, self.method).await)
    }

    crate::identity_process!();

    fn slot(&self) -> &Measured<Option<Payload>> {
        &self.last
    }

    fn slot_mut(&mut self) -> &mut Measured<Option<Payload>> {
        &mut self.last
    }
}
