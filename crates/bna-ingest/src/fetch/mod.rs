//! Paginated fetching from upstream APIs
//!
//! [`PageFetcher`] walks a [`PageSource`] one page at a time, in order:
//!
//! - every attempt is bounded by a timeout
//! - transient failures are retried per page with the injected [`RetryPolicy`]
//! - the configured page delay is slept after every attempt, success or failure
//! - pagination ends on an empty page, the last page, the page limit or an
//!   abandoned page; pages fetched before an abandoned page are kept

pub mod fred;
pub mod zillow;

pub use fred::FredSeries;
pub use zillow::{ListingKind, ZillowSearch};

use crate::config::FetchSettings;
use crate::error::{ErrorKind, FetchError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared HTTP client for upstream APIs. `timeout` bounds a whole request.
pub fn http_client(timeout: Duration) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("bna-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FetchError::from)
}

/// Send a request and read the body as a JSON object, classifying failures
pub(crate) async fn get_json_object(
    request: RequestBuilder,
) -> Result<Map<String, Value>, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(FetchError::from_status(status.as_u16(), body));
    }

    match serde_json::from_str::<Value>(&body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(FetchError::decode(format!(
            "expected a JSON object, got {}",
            json_type(&other)
        ))),
        Err(e) => Err(FetchError::decode(e.to_string())),
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// One page of raw upstream records
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    /// 1-based page number
    pub number: u32,
    pub records: Vec<Value>,
    /// Total page count when the upstream reports it
    pub total_pages: Option<u32>,
}

impl RawPage {
    pub fn new(number: u32, records: Vec<Value>) -> Self {
        Self {
            number,
            records,
            total_pages: None,
        }
    }

    pub fn with_total_pages(mut self, total_pages: u32) -> Self {
        self.total_pages = Some(total_pages);
        self
    }

    pub fn is_last(&self) -> bool {
        self.total_pages.is_some_and(|total| self.number >= total)
    }
}

/// A paginated upstream endpoint with its filters already applied
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Name used in logs, e.g. `zillow:ForSale`
    fn name(&self) -> &str;

    /// Fetch a single page. One call is one attempt; retries happen above.
    async fn fetch_page(&self, page: u32) -> Result<RawPage, FetchError>;
}

/// Why pagination stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A page came back without records
    Exhausted,
    /// The upstream reported the last page
    LastPage,
    /// `max_pages` pages were fetched
    PageLimit,
    /// A page was abandoned; later pages were not requested
    Aborted {
        page: u32,
        attempts: u32,
        kind: ErrorKind,
        message: String,
    },
}

impl FetchOutcome {
    pub fn is_complete(&self) -> bool {
        !matches!(self, FetchOutcome::Aborted { .. })
    }
}

/// Ordered pages of one fetch run
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub source: String,
    pub pages: Vec<RawPage>,
    pub outcome: FetchOutcome,
}

impl FetchBatch {
    pub fn record_count(&self) -> usize {
        self.pages.iter().map(|p| p.records.len()).sum()
    }

    /// No page was fetched successfully
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// A page that could not be fetched
#[derive(Debug)]
pub struct PageFailure {
    pub attempts: u32,
    pub error: FetchError,
}

#[derive(Debug, Clone)]
pub struct PageFetcher {
    policy: RetryPolicy,
    max_pages: u32,
    page_delay: Duration,
    attempt_timeout: Duration,
}

impl PageFetcher {
    pub fn new(policy: RetryPolicy, settings: &FetchSettings) -> Self {
        Self {
            policy,
            max_pages: settings.max_pages,
            page_delay: settings.page_delay,
            attempt_timeout: settings.request_timeout,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    /// Fetch one page, retrying transient failures
    pub async fn fetch_with_retry(
        &self,
        source: &dyn PageSource,
        page: u32,
    ) -> Result<RawPage, PageFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let timed = tokio::time::timeout(self.attempt_timeout, source.fetch_page(page)).await;
            let result = match timed {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.attempt_timeout)),
            };

            self.pace().await;

            match result {
                Ok(raw) => {
                    info!(
                        source = source.name(),
                        page,
                        attempt,
                        records = raw.records.len(),
                        "fetched page"
                    );
                    return Ok(raw);
                },
                Err(error) if self.policy.should_retry(attempt, &error) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        source = source.name(),
                        page,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error_kind = %error.kind(),
                        error = %error,
                        "page attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(error) => {
                    warn!(
                        source = source.name(),
                        page,
                        attempts = attempt,
                        error_kind = %error.kind(),
                        error = %error,
                        "abandoning page"
                    );
                    return Err(PageFailure {
                        attempts: attempt,
                        error,
                    });
                },
            }
        }
    }

    /// Fetch pages `1..=max_pages` in order until a stop condition is met
    pub async fn fetch_all(&self, source: &dyn PageSource) -> FetchBatch {
        let mut pages = Vec::new();
        let mut outcome = FetchOutcome::PageLimit;

        for page in 1..=self.max_pages {
            match self.fetch_with_retry(source, page).await {
                Ok(raw) if raw.records.is_empty() => {
                    debug!(source = source.name(), page, "empty page, stopping");
                    outcome = FetchOutcome::Exhausted;
                    break;
                },
                Ok(raw) => {
                    let last = raw.is_last();
                    pages.push(raw);
                    if last {
                        outcome = FetchOutcome::LastPage;
                        break;
                    }
                },
                Err(failure) => {
                    outcome = FetchOutcome::Aborted {
                        page,
                        attempts: failure.attempts,
                        kind: failure.error.kind(),
                        message: failure.error.to_string(),
                    };
                    break;
                },
            }
        }

        let batch = FetchBatch {
            source: source.name().to_string(),
            pages,
            outcome,
        };
        info!(
            source = %batch.source,
            pages = batch.pages.len(),
            records = batch.record_count(),
            outcome = ?batch.outcome,
            "fetch finished"
        );
        batch
    }

    async fn pace(&self) {
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
    }
}
