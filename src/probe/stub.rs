//! Fixture-backed stand-in for [`ApiProbe`](crate::probe::api::ApiProbe).
//!
//! Endpoints map to files on disk, so probes depending on an API can be
//! exercised without a network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::probe::api::{ApiClient, ApiRequest, HttpMethod, Payload};

/// A fixture file and how to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fixture {
    /// Parsed as JSON.
    Json(PathBuf),
    /// Returned as raw text.
    Raw(PathBuf),
}

impl Fixture {
    /// Fixture parsed as JSON.
    pub fn json(path: impl AsRef<Path>) -> Self {
        Self::Json(path.as_ref().to_path_buf())
    }

    /// Fixture returned verbatim.
    pub fn raw(path: impl AsRef<Path>) -> Self {
        Self::Raw(path.as_ref().to_path_buf())
    }

    /// Location of the fixture file.
    pub fn path(&self) -> &Path {
        match self {
            Self::Json(path) | Self::Raw(path) => path,
        }
    }
}

/// API client answering calls from fixture files.
///
/// The HTTP method is ignored: an endpoint answers the same way to GET and
/// POST.
#[derive(Debug, Clone, Default)]
pub struct ApiStub {
    fixtures: HashMap<String, Fixture>,
}

impl ApiStub {
    /// Create a stub with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `endpoint` with `fixture`.
    pub fn with_fixture(mut self, endpoint: impl Into<String>, fixture: Fixture) -> Self {
        self.insert(endpoint, fixture);
        self
    }

    /// Answer `endpoint` with `fixture`, replacing any previous mapping.
    pub fn insert(&mut self, endpoint: impl Into<String>, fixture: Fixture) {
        self.fixtures.insert(endpoint.into(), fixture);
    }

    /// Fixture registered for `endpoint`.
    pub fn fixture(&self, endpoint: &str) -> Option<&Fixture> {
        self.fixtures.get(endpoint)
    }

    async fn load(fixture: &Fixture) -> Result<Payload, crate::probe::ProbeError> {
        let text = tokio::fs::read_to_string(fixture.path()).await?;
        match fixture {
            Fixture::Json(_) => Ok(Payload::Json(serde_json::from_str(&text)?)),
            Fixture::Raw(_) => Ok(Payload::Text(text)),
        }
    }
}

#[async_trait::async_trait]
impl ApiClient for ApiStub {
    async fn call(&self, request: &ApiRequest, method: HttpMethod) -> Option<Payload> {
        let Some(fixture) = self.fixtures.get(&request.endpoint) else {
            tracing::debug!(endpoint = %request.endpoint, method = %method, "No fixture for endpoint");
            return None;
        };

        match Self::load(fixture).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!(
                    endpoint = %request.endpoint,
                    path = %fixture.path().display(),
                    error = %e,
                    "Failed to load fixture"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_stub_unknown_endpoint() {
        let stub = ApiStub::new();
        let payload = stub.call(&ApiRequest::new("/users"), HttpMethod::Get).await;
        assert!(payload.is_none());
    }

    #[tokio::test]
    async fn test_stub_missing_fixture_file() {
        let dir = tempdir().unwrap();
        let stub = ApiStub::new().with_fixture("/users", Fixture::json(dir.path().join("gone.json")));

        let payload = stub.call(&ApiRequest::new("/users"), HttpMethod::Get).await;
        assert!(payload.is_none());
    }

    #[tokio::test]
    async fn test_stub_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{\"1\": ").unwrap();

        let stub = ApiStub::new().with_fixture("/users", Fixture::json(&path));
        assert!(stub.call(&ApiRequest::new("/users"), HttpMethod::Post).await.is_none());
    }

    #[tokio::test]
    async fn test_stub_replaces_fixture() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.txt");
        let second = dir.path().join("second.txt");
        std::fs::write(&first, "first").unwrap();
        std::fs::write(&second, "second").unwrap();

        let mut stub = ApiStub::new().with_fixture("/status", Fixture::raw(&first));
        stub.insert("/status", Fixture::raw(&second));

        assert_eq!(stub.fixture("/status"), Some(&Fixture::raw(&second)));
        let payload = stub.call(&ApiRequest::new("/status"), HttpMethod::Get).await;
        assert_eq!(payload, Some(Payload::Text("second".to_string())));
    }
}
