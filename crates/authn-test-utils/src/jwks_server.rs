//! Mock JWKS endpoint.
//!
//! Wraps a wiremock `MockServer` serving a key set at `/jwks.json`. The
//! served response can be swapped mid-test to simulate rotation or outages.

use crate::crypto_fixtures::{jwks_json, TestKey};
use crate::test_ids::TEST_JWKS_PATH;
use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A running mock JWKS server.
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a server that serves `keys`.
    pub async fn start(keys: &[&TestKey]) -> Self {
        let server = MockServer::start().await;
        let this = Self { server };
        this.serve_json(jwks_json(keys)).await;
        this
    }

    /// Start a server that answers every fetch with `status`.
    pub async fn failing(status: u16) -> Self {
        let server = MockServer::start().await;
        let this = Self { server };
        this.fail_with(status).await;
        this
    }

    /// Base URI, e.g. `http://127.0.0.1:41234`.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Full JWKS URI.
    pub fn jwks_uri(&self) -> String {
        format!("{}{}", self.server.uri(), TEST_JWKS_PATH)
    }

    /// Serve `keys` from now on.
    pub async fn set_keys(&self, keys: &[&TestKey]) {
        self.serve_json(jwks_json(keys)).await;
    }

    /// Serve an arbitrary JSON body with status 200.
    pub async fn serve_json(&self, body: Value) {
        self.mount(ResponseTemplate::new(200).set_body_json(body)).await;
    }

    /// Serve `keys` after `delay`.
    pub async fn serve_slowly(&self, keys: &[&TestKey], delay: Duration) {
        self.mount(
            ResponseTemplate::new(200)
                .set_body_json(jwks_json(keys))
                .set_delay(delay),
        )
        .await;
    }

    /// Answer every fetch with `status`.
    pub async fn fail_with(&self, status: u16) {
        self.mount(ResponseTemplate::new(status)).await;
    }

    /// Number of JWKS requests received since the response was last set.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == TEST_JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }

    async fn mount(&self, response: ResponseTemplate) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(TEST_JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }
}
