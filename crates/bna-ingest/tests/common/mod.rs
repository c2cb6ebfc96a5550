//! Shared helpers for bna-ingest integration tests
//!
//! - [`ScriptedSource`]: a [`PageSource`] that replays canned pages and failures
//! - record builders for the three tables
//! - an in-memory [`StorageWriter`]

#![allow(dead_code)]

use async_trait::async_trait;
use bna_ingest::config::{DatabaseConfig, FetchSettings};
use bna_ingest::error::FetchError;
use bna_ingest::fetch::{PageFetcher, PageSource, RawPage};
use bna_ingest::normalize::ListingRecord;
use bna_ingest::retry::RetryPolicy;
use bna_ingest::storage::StorageWriter;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bna_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub enum Step {
    Page(Vec<Value>),
    Fail(u16),
}

/// Replays its steps in order, one per `fetch_page` call. Once the script is
/// used up every page is empty.
pub struct ScriptedSource {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// A source that always answers with `status`
    pub fn failing(name: &str, status: u16) -> Self {
        Self::new(name, (0..64).map(|_| Step::Fail(status)).collect())
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, page: u32) -> Result<RawPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Page(records)) => Ok(RawPage::new(page, records)),
            Some(Step::Fail(status)) => Err(FetchError::from_status(status, "scripted failure")),
            None => Ok(RawPage::new(page, Vec::new())),
        }
    }
}

/// Fetcher with no sleeping anywhere
pub fn fast_fetcher(max_attempts: u32) -> PageFetcher {
    let settings = FetchSettings {
        max_pages: 10,
        page_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(5),
    };
    PageFetcher::new(RetryPolicy::immediate(max_attempts), &settings)
}

pub async fn memory_storage() -> StorageWriter {
    StorageWriter::connect(&DatabaseConfig::in_memory())
        .await
        .expect("open in-memory database")
}

/// Raw Zillow search result
pub fn prop(zpid: &str, price: f64, address: &str) -> Value {
    json!({
        "zpid": zpid,
        "price": price,
        "address": address,
        "bedrooms": 3,
        "bathrooms": 2.0,
        "livingArea": 1850,
        "latitude": 36.16,
        "longitude": -86.78,
        "listingStatus": "FOR_SALE",
        "propertyType": "SINGLE_FAMILY",
        "daysOnZillow": 4
    })
}

/// Raw FRED observation
pub fn observation(date: &str, value: &str) -> Value {
    json!({
        "realtime_start": "2026-10-01",
        "realtime_end": "2026-10-01",
        "date": date,
        "value": value
    })
}

pub fn listing(zpid: &str, price: f64) -> ListingRecord {
    ListingRecord {
        zpid: zpid.to_string(),
        price,
        bedrooms: Some(3.0),
        bathrooms: Some(2.0),
        living_area: Some(1850.0),
        address: format!("{zpid} Broadway, Nashville, TN"),
        latitude: Some(36.16),
        longitude: Some(-86.78),
        days_on_zillow: Some(4),
        listing_status: Some("FOR_SALE".to_string()),
        property_type: Some("SINGLE_FAMILY".to_string()),
        attributes: BTreeMap::new(),
    }
}
