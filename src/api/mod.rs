use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use crate::config::ApiConfig;
use crate::error::EngineError;

/// Ordered request parameters for one GET against the query endpoint.
/// Order is preserved so the emitted query strings match the upstream
/// API contract exactly.
pub type Query = Vec<(String, String)>;

/// Issues GET requests against the wiki query endpoint.
///
/// Kept behind a trait so the fetcher and engine can be exercised with
/// in-memory transports in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, query: &Query) -> Result<Value, EngineError>;
}

/// reqwest-backed client for the MediaWiki `api.php` endpoint.
pub struct ApiClient {
    endpoint: String,
    client: Client,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("repscore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::Fetch(e.to_string()))?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl Transport for ApiClient {
    async fn get_json(&self, query: &Query) -> Result<Value, EngineError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(query)
            .query(&[("format", "json")])
            .send()
            .await
            .map_err(|e| EngineError::Fetch(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::Fetch(format!(
                "HTTP {status} from {}",
                self.endpoint
            )));
        }

        resp.json()
            .await
            .map_err(|e| EngineError::Fetch(format!("invalid JSON body: {e}")))
    }
}
