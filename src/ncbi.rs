use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use serde_json::Value;
use tracing::debug;

use crate::error::CatalogError;

pub const DEFAULT_NCBI_BASE_URL: &str = "https://api.ncbi.nlm.nih.gov/datasets/v2";

pub const GENOME_DATASET_REPORT: &str = "/genome/dataset_report";
pub const TAXONOMY_DATASET_REPORT: &str = "/taxonomy/dataset_report";
pub const TAXONOMY_NAME_REPORT: &str = "/taxonomy/name_report";
pub const TAXONOMY_FILTERED_SUBTREE: &str = "/taxonomy/filtered_subtree";

/// Raw result of one POST against the Datasets API. Non-success statuses are
/// returned rather than raised so the batcher can tell rate limiting apart
/// from other failures.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub retry_after: Option<u64>,
    pub body: String,
}

impl ApiResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

pub trait NcbiClient: Send + Sync {
    fn post_json(&self, path: &str, body: &Value) -> Result<ApiResponse, CatalogError>;
}

impl<T: NcbiClient + ?Sized> NcbiClient for &T {
    fn post_json(&self, path: &str, body: &Value) -> Result<ApiResponse, CatalogError> {
        (**self).post_json(path, body)
    }
}

#[derive(Clone)]
pub struct NcbiHttpClient {
    client: Client,
    base_url: String,
}

impl NcbiHttpClient {
    pub fn new() -> Result<Self, CatalogError> {
        Self::with_base_url(DEFAULT_NCBI_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-catalog/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CatalogError::NcbiHttp(err.to_string()))?,
        );
        headers.insert("X-Datasets-Client", HeaderValue::from_static("kira-catalog"));
        headers.insert(
            "X-Datasets-Client-Version",
            HeaderValue::from_str(env!("CARGO_PKG_VERSION"))
                .map_err(|err| CatalogError::NcbiHttp(err.to_string()))?,
        );

        if let Ok(api_key) = std::env::var("NCBI_API_KEY") {
            if !api_key.trim().is_empty() {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(api_key.trim())
                        .map_err(|err| CatalogError::NcbiHttp(err.to_string()))?,
                );
            }
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CatalogError::NcbiHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl NcbiClient for NcbiHttpClient {
    fn post_json(&self, path: &str, body: &Value) -> Result<ApiResponse, CatalogError> {
        let url = self.endpoint(path);
        debug!(%url, "ncbi.request");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|err| CatalogError::NcbiHttp(err.to_string()))?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .text()
            .map_err(|err| CatalogError::NcbiHttp(err.to_string()))?;
        debug!(status, bytes = body.len(), "ncbi.response");
        Ok(ApiResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Only the delay-seconds form is honoured; HTTP-date values fall back to the
/// caller's default.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
