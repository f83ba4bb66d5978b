//! Adaptive batched POSTs against the paginated Datasets report endpoints.
//!
//! IDs are sent in batches; each batch is followed across `next_page_token`
//! pages. A response carrying `total_count` but no `reports` means the server
//! refused to materialise that many results, so the batch size is halved (and
//! at the floor, the page size) before the batch is retried from its first
//! page. Transient failures are retried at the same size; the third
//! consecutive one is fatal. Report-level `errors` abort immediately.

use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::ncbi::{ApiResponse, NcbiClient};

pub const DEFAULT_INITIAL_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MIN_BATCH_SIZE: usize = 50;
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const MIN_PAGE_SIZE: usize = 10;
pub const MAX_CONSECUTIVE_FAILURES: usize = 3;
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub initial_batch_size: usize,
    pub min_batch_size: usize,
    pub page_size: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            initial_batch_size: DEFAULT_INITIAL_BATCH_SIZE,
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl BatchPolicy {
    pub fn with_page_size(self, page_size: usize) -> Self {
        Self { page_size, ..self }
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.min_batch_size == 0 || self.initial_batch_size == 0 || self.page_size == 0 {
            return Err(CatalogError::ConfigInvalid(
                "batch and page sizes must be positive".to_string(),
            ));
        }
        if self.min_batch_size > self.initial_batch_size {
            return Err(CatalogError::ConfigInvalid(format!(
                "min batch size {} exceeds initial batch size {}",
                self.min_batch_size, self.initial_batch_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Sized(usize),
    Retrying { size: usize, attempt: usize },
    Failed,
}

impl BatchState {
    pub fn size(&self) -> Option<usize> {
        match self {
            BatchState::Sized(size) | BatchState::Retrying { size, .. } => Some(*size),
            BatchState::Failed => None,
        }
    }
}

/// Pure batch/page sizing state, independent of any I/O.
#[derive(Debug, Clone)]
pub struct AdaptiveBatcher {
    state: BatchState,
    page_size: usize,
    min_batch_size: usize,
}

impl AdaptiveBatcher {
    pub fn new(policy: BatchPolicy) -> Self {
        Self {
            state: BatchState::Sized(policy.initial_batch_size),
            page_size: policy.page_size,
            min_batch_size: policy.min_batch_size,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn record_success(&mut self) -> BatchState {
        if let Some(size) = self.state.size() {
            self.state = BatchState::Sized(size);
        }
        self.state
    }

    pub fn record_oversized(&mut self) -> BatchState {
        let Some(size) = self.state.size() else {
            return self.state;
        };
        if size > self.min_batch_size {
            self.state = BatchState::Sized((size / 2).max(self.min_batch_size));
        } else if self.page_size > MIN_PAGE_SIZE {
            self.page_size = (self.page_size / 2).max(MIN_PAGE_SIZE);
            self.state = BatchState::Sized(size);
        } else {
            self.state = BatchState::Failed;
        }
        self.state
    }

    pub fn record_failure(&mut self) -> BatchState {
        self.state = match self.state {
            BatchState::Sized(size) => BatchState::Retrying { size, attempt: 1 },
            BatchState::Retrying { size, attempt } if attempt + 1 < MAX_CONSECUTIVE_FAILURES => {
                BatchState::Retrying {
                    size,
                    attempt: attempt + 1,
                }
            }
            BatchState::Retrying { .. } | BatchState::Failed => BatchState::Failed,
        };
        self.state
    }
}

/// Endpoint, id field and fixed body fields for one batched report request.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub path: String,
    pub id_field: String,
    pub extra: Map<String, Value>,
}

impl BatchRequest {
    pub fn new(path: &str, id_field: &str) -> Self {
        Self {
            path: path.to_string(),
            id_field: id_field.to_string(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    fn body(&self, ids: &[String], page_size: usize, page_token: Option<&str>) -> Value {
        let mut body = self.extra.clone();
        body.insert(
            self.id_field.clone(),
            Value::Array(ids.iter().cloned().map(Value::String).collect()),
        );
        body.insert("page_size".to_string(), Value::from(page_size));
        if let Some(token) = page_token {
            body.insert("page_token".to_string(), Value::String(token.to_string()));
        }
        Value::Object(body)
    }
}

/// Interpretation of a single page of a report response.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    Reports {
        reports: Vec<Value>,
        next_page_token: Option<String>,
    },
    Oversized {
        total_count: u64,
    },
}

pub fn classify_page(body: &Value) -> Result<Page, CatalogError> {
    let object = body
        .as_object()
        .ok_or_else(|| CatalogError::UnexpectedResponse(truncate(&body.to_string())))?;

    let next_page_token = object
        .get("next_page_token")
        .and_then(|value| value.as_str())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string());

    match object.get("reports") {
        Some(Value::Array(reports)) => {
            let first_errors = reports
                .first()
                .and_then(|report| report.get("errors"))
                .filter(|errors| match errors {
                    Value::Array(items) => !items.is_empty(),
                    Value::Null => false,
                    _ => true,
                });
            if first_errors.is_some() {
                let first = reports.first().map(|report| report.to_string()).unwrap_or_default();
                return Err(CatalogError::NcbiReportErrors(truncate(&first)));
            }
            Ok(Page::Reports {
                reports: reports.clone(),
                next_page_token,
            })
        }
        Some(other) => Err(CatalogError::UnexpectedResponse(format!(
            "reports is not an array: {}",
            truncate(&other.to_string())
        ))),
        None => {
            let total_count = object
                .get("total_count")
                .and_then(|value| value.as_u64().or_else(|| value.as_str()?.parse().ok()))
                .unwrap_or(0);
            if total_count > 0 {
                Ok(Page::Oversized { total_count })
            } else {
                Ok(Page::Reports {
                    reports: Vec::new(),
                    next_page_token: None,
                })
            }
        }
    }
}

enum BatchResult {
    Complete(Vec<Value>),
    Oversized(u64),
}

/// Fetches every report for `ids`, adapting the batch size as described in
/// the module docs. Batches are processed strictly one after another.
pub fn post_batched<C: NcbiClient + ?Sized>(
    client: &C,
    request: &BatchRequest,
    ids: &[String],
    policy: BatchPolicy,
) -> Result<Vec<Value>, CatalogError> {
    policy.validate()?;
    let mut batcher = AdaptiveBatcher::new(policy);
    let mut reports = Vec::new();
    let mut offset = 0usize;
    let mut batch_number = 1usize;

    while offset < ids.len() {
        let size = batcher.state().size().unwrap_or(policy.min_batch_size);
        let end = (offset + size).min(ids.len());
        let batch = &ids[offset..end];
        info!(
            path = %request.path,
            batch = batch_number,
            size = batch.len(),
            processed = offset,
            total = ids.len(),
            "processing batch"
        );

        match fetch_batch(client, request, batch, batcher.page_size()) {
            Ok(BatchResult::Complete(batch_reports)) => {
                reports.extend(batch_reports);
                offset = end;
                batch_number += 1;
                batcher.record_success();
            }
            Ok(BatchResult::Oversized(total_count)) => {
                let next = batcher.record_oversized();
                warn!(
                    batch = batch_number,
                    total_count,
                    state = ?next,
                    page_size = batcher.page_size(),
                    "result set too large, reducing batch"
                );
                if next == BatchState::Failed {
                    return Err(CatalogError::BatchFloorReached {
                        batch: batch_number,
                        min_batch_size: policy.min_batch_size,
                        page_size: batcher.page_size(),
                    });
                }
            }
            Err(err) if err.is_permanent() => return Err(err),
            Err(err) => {
                let next = batcher.record_failure();
                warn!(batch = batch_number, size, error = %err, state = ?next, "batch request failed");
                if next == BatchState::Failed {
                    return Err(CatalogError::BatchRetriesExhausted {
                        batch: batch_number,
                        size,
                        attempts: MAX_CONSECUTIVE_FAILURES,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    Ok(reports)
}

fn fetch_batch<C: NcbiClient + ?Sized>(
    client: &C,
    request: &BatchRequest,
    batch: &[String],
    page_size: usize,
) -> Result<BatchResult, CatalogError> {
    let mut batch_reports = Vec::new();
    let mut page_token: Option<String> = None;
    let mut page = 1usize;

    loop {
        debug!(page, size = batch.len(), "requesting page");
        let body = request.body(batch, page_size, page_token.as_deref());
        let response = send_with_rate_limit(client, &request.path, &body)?;
        let value: Value = serde_json::from_str(&response.body)
            .map_err(|err| CatalogError::UnexpectedResponse(err.to_string()))?;
        match classify_page(&value)? {
            Page::Oversized { total_count } => return Ok(BatchResult::Oversized(total_count)),
            Page::Reports {
                reports,
                next_page_token,
            } => {
                batch_reports.extend(reports);
                match next_page_token {
                    Some(token) => {
                        page_token = Some(token);
                        page += 1;
                    }
                    None => return Ok(BatchResult::Complete(batch_reports)),
                }
            }
        }
    }
}

/// Sends one request; on 429 waits for `Retry-After` and tries exactly once more.
pub fn send_with_rate_limit<C: NcbiClient + ?Sized>(
    client: &C,
    path: &str,
    body: &Value,
) -> Result<ApiResponse, CatalogError> {
    let mut response = client.post_json(path, body)?;
    if response.is_rate_limited() {
        let wait = response.retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        warn!(wait_secs = wait, "rate limited by NCBI, waiting");
        thread::sleep(Duration::from_secs(wait));
        response = client.post_json(path, body)?;
    }
    if !response.is_success() {
        return Err(CatalogError::NcbiStatus {
            status: response.status,
            message: truncate(&response.body),
        });
    }
    Ok(response)
}

fn truncate(text: &str) -> String {
    const LIMIT: usize = 500;
    if text.len() <= LIMIT {
        return text.to_string();
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
