//! ETL orchestration
//!
//! Runs fetch, normalize and commit for each data source. Sources are isolated:
//! whatever goes wrong in one is caught, logged with the source name and error
//! kind, and turned into that source's [`SourceReport`]; the others still run.
//!
//! # Status rules
//!
//! - `Success`: the fetch finished normally and the batch (possibly empty) was committed
//! - `Partial`: the fetch stopped early, or some FRED series failed, but what was
//!   fetched was committed
//! - `Failed`: nothing was written; the table is exactly as before

use crate::config::{EtlConfig, FredConfig, SeriesSpec, TableNames, ZillowConfig};
use crate::error::{ErrorKind, StorageError};
use crate::fetch::{
    http_client, FetchBatch, FetchOutcome, FredSeries, ListingKind, PageFetcher, PageSource,
    ZillowSearch,
};
use crate::merge::MergeStats;
use crate::normalize::{
    normalize_pages, ListingNormalizer, ListingRecord, MetricNormalizer, MetricRecord, Normalized,
    RecordNormalizer, RentalNormalizer, RentalUnitRecord,
};
use crate::storage::{RunRecord, StorageWriter, TableName, TableRecord};
use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// More than this share of failed FRED series is logged as critical
const CRITICAL_SERIES_FAILURE_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    ForSale,
    Rentals,
    Metrics,
}

impl DataSource {
    pub const ALL: [DataSource; 3] = [
        DataSource::ForSale,
        DataSource::Rentals,
        DataSource::Metrics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::ForSale => "for_sale",
            DataSource::Rentals => "rentals",
            DataSource::Metrics => "metrics",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    Partial { reason: String },
    Failed { kind: ErrorKind, message: String },
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Success => "success",
            SourceStatus::Partial { .. } => "partial",
            SourceStatus::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SourceStatus::Failed { .. })
    }
}

/// Outcome of one source in one run
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub run_id: Uuid,
    pub source: DataSource,
    pub status: SourceStatus,
    pub pages: u32,
    /// Raw upstream records received
    pub fetched: usize,
    /// Unique keyed rows after normalization
    pub normalized: usize,
    pub skipped: usize,
    /// Present when a commit happened (including an empty no-op)
    pub stats: Option<MergeStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SourceReport {
    fn new(run_id: Uuid, source: DataSource) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            source,
            status: SourceStatus::Success,
            pages: 0,
            fetched: 0,
            normalized: 0,
            skipped: 0,
            stats: None,
            started_at: now,
            finished_at: now,
        }
    }

    fn absorb_fetch(&mut self, batch: &FetchBatch) {
        self.pages += batch.pages.len() as u32;
        self.fetched += batch.record_count();
    }

    fn to_run_record(&self) -> RunRecord {
        let stats = self.stats.unwrap_or_default();
        let (error_kind, error_message) = match &self.status {
            SourceStatus::Success => (None, None),
            SourceStatus::Partial { reason } => (None, Some(reason.clone())),
            SourceStatus::Failed { kind, message } => {
                (Some(kind.as_str().to_string()), Some(message.clone()))
            },
        };
        RunRecord {
            id: Uuid::new_v4(),
            source: self.source.as_str().to_string(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: self.status.as_str().to_string(),
            pages: self.pages,
            normalized: self.normalized as u64,
            skipped: self.skipped as u64,
            inserted: stats.inserted,
            overridden: stats.overridden,
            retained: stats.retained,
            error_kind,
            error_message,
        }
    }
}

/// Per-source reports of one run, in the order sources were requested
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reports: Vec<SourceReport>,
}

impl RunSummary {
    pub fn report(&self, source: DataSource) -> Option<&SourceReport> {
        self.reports.iter().find(|r| r.source == source)
    }

    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(|r| r.status.is_failed())
    }
}

/// Hands out the upstream sources for a run
pub trait SourceProvider: Send + Sync {
    fn listing_source(&self, kind: ListingKind) -> Arc<dyn PageSource>;

    /// One source per FRED series, with the metric name its rows get
    fn metric_sources(&self) -> Vec<(SeriesSpec, Arc<dyn PageSource>)>;
}

/// Live Zillow and FRED endpoints
pub struct HttpSources {
    client: Client,
    zillow: ZillowConfig,
    fred: FredConfig,
}

impl HttpSources {
    pub fn new(client: Client, zillow: ZillowConfig, fred: FredConfig) -> Self {
        Self {
            client,
            zillow,
            fred,
        }
    }
}

impl SourceProvider for HttpSources {
    fn listing_source(&self, kind: ListingKind) -> Arc<dyn PageSource> {
        Arc::new(ZillowSearch::new(self.client.clone(), &self.zillow, kind))
    }

    fn metric_sources(&self) -> Vec<(SeriesSpec, Arc<dyn PageSource>)> {
        // the window is recomputed per run so a long-lived orchestrator stays current
        let window = self.fred.observation_window(Utc::now().date_naive());
        self.fred
            .unique_series()
            .into_iter()
            .map(|spec| {
                let source = FredSeries::new(self.client.clone(), &self.fred, spec.clone(), window);
                (spec, Arc::new(source) as Arc<dyn PageSource>)
            })
            .collect()
    }
}

/// Pre-built sources, handed out as they are
pub struct FixedSources {
    pub for_sale: Arc<dyn PageSource>,
    pub rentals: Arc<dyn PageSource>,
    pub metrics: Vec<(SeriesSpec, Arc<dyn PageSource>)>,
}

impl SourceProvider for FixedSources {
    fn listing_source(&self, kind: ListingKind) -> Arc<dyn PageSource> {
        match kind {
            ListingKind::ForSale => Arc::clone(&self.for_sale),
            ListingKind::ForRent => Arc::clone(&self.rentals),
        }
    }

    fn metric_sources(&self) -> Vec<(SeriesSpec, Arc<dyn PageSource>)> {
        self.metrics.clone()
    }
}

/// Validated destination tables
#[derive(Debug, Clone)]
struct Tables {
    for_sale: TableName,
    rentals: TableName,
    metrics: TableName,
    runs: TableName,
}

impl Tables {
    fn new(names: &TableNames) -> Result<Self, StorageError> {
        Ok(Self {
            for_sale: TableName::new(names.for_sale.as_str())?,
            rentals: TableName::new(names.rentals.as_str())?,
            metrics: TableName::new(names.metrics.as_str())?,
            runs: TableName::new(names.runs.as_str())?,
        })
    }
}

pub struct EtlOrchestrator {
    storage: StorageWriter,
    fetcher: PageFetcher,
    tables: Tables,
    sources: Arc<dyn SourceProvider>,
}

impl EtlOrchestrator {
    pub fn new(
        storage: StorageWriter,
        fetcher: PageFetcher,
        tables: &TableNames,
        sources: Arc<dyn SourceProvider>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            storage,
            fetcher,
            tables: Tables::new(tables)?,
            sources,
        })
    }

    /// Wire up live HTTP sources and the configured database
    pub async fn from_config(config: &EtlConfig) -> anyhow::Result<Self> {
        let client = http_client(config.fetch.request_timeout).context("building HTTP client")?;
        let storage = StorageWriter::connect(&config.database)
            .await
            .with_context(|| format!("opening database {}", config.database.url))?;
        let fetcher = PageFetcher::new(config.retry.clone(), &config.fetch);
        let sources = HttpSources::new(client, config.zillow.clone(), config.fred.clone());

        let orchestrator = Self::new(storage, fetcher, &config.tables, Arc::new(sources))?;
        orchestrator.init_schema().await?;
        Ok(orchestrator)
    }

    pub fn storage(&self) -> &StorageWriter {
        &self.storage
    }

    /// Create every table the pipeline writes
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        self.storage.ensure_table::<ListingRecord>(&self.tables.for_sale).await?;
        self.storage.ensure_table::<RentalUnitRecord>(&self.tables.rentals).await?;
        self.storage.ensure_table::<MetricRecord>(&self.tables.metrics).await?;
        self.storage.ensure_runs_table(&self.tables.runs).await?;
        Ok(())
    }

    /// Run the given sources (duplicates ignored). Never fails: problems end up
    /// in the per-source reports.
    pub async fn run_all(&self, sources: &[DataSource], parallel: bool) -> RunSummary {
        let run_id = Uuid::new_v4();
        let mut selected: Vec<DataSource> = Vec::with_capacity(sources.len());
        for source in sources {
            if !selected.contains(source) {
                selected.push(*source);
            }
        }

        info!(%run_id, sources = ?selected, parallel, "starting ETL run");

        let reports = if parallel {
            join_all(selected.iter().map(|s| self.run_source(run_id, *s))).await
        } else {
            let mut reports = Vec::with_capacity(selected.len());
            for source in &selected {
                reports.push(self.run_source(run_id, *source).await);
            }
            reports
        };

        let failed = reports.iter().filter(|r| r.status.is_failed()).count();
        info!(%run_id, sources = reports.len(), failed, "ETL run finished");
        RunSummary { run_id, reports }
    }

    pub async fn run_source(&self, run_id: Uuid, source: DataSource) -> SourceReport {
        let span = info_span!("etl_source", source = source.as_str(), %run_id);
        async {
            let mut report = SourceReport::new(run_id, source);
            match source {
                DataSource::ForSale => {
                    let upstream = self.sources.listing_source(ListingKind::ForSale);
                    self.run_paged(
                        &ListingNormalizer,
                        upstream.as_ref(),
                        &self.tables.for_sale,
                        &mut report,
                    )
                    .await;
                },
                DataSource::Rentals => {
                    let upstream = self.sources.listing_source(ListingKind::ForRent);
                    self.run_paged(
                        &RentalNormalizer,
                        upstream.as_ref(),
                        &self.tables.rentals,
                        &mut report,
                    )
                    .await;
                },
                DataSource::Metrics => self.run_metrics(&mut report).await,
            }
            report.finished_at = Utc::now();
            log_report(&report);
            self.record(&report).await;
            report
        }
        .instrument(span)
        .await
    }

    async fn run_paged<N>(
        &self,
        normalizer: &N,
        upstream: &dyn PageSource,
        table: &TableName,
        report: &mut SourceReport,
    ) where
        N: RecordNormalizer,
        N::Record: TableRecord,
    {
        let batch = self.fetcher.fetch_all(upstream).await;
        report.absorb_fetch(&batch);

        if let FetchOutcome::Aborted { kind, message, .. } = &batch.outcome {
            if batch.is_empty() {
                report.status = SourceStatus::Failed {
                    kind: *kind,
                    message: message.clone(),
                };
                return;
            }
        }

        let normalized = normalize_pages(normalizer, upstream.name(), &batch.pages);
        let partial = match &batch.outcome {
            FetchOutcome::Aborted { page, message, .. } => {
                Some(format!("pagination stopped at page {page}: {message}"))
            },
            _ => None,
        };
        self.commit(table, normalized, partial, report).await;
    }

    async fn run_metrics(&self, report: &mut SourceReport) {
        let series = self.sources.metric_sources();
        let total = series.len();
        let mut combined: Normalized<MetricRecord> = Normalized::default();
        let mut failed: Vec<String> = Vec::new();
        let mut incomplete: Vec<String> = Vec::new();
        let mut last_failure: Option<(ErrorKind, String)> = None;

        for (spec, upstream) in series {
            info!(series_id = %spec.series_id, metric = %spec.metric_name, "fetching series");
            let batch = self.fetcher.fetch_all(upstream.as_ref()).await;
            report.absorb_fetch(&batch);

            if let FetchOutcome::Aborted { kind, message, .. } = &batch.outcome {
                if batch.is_empty() {
                    warn!(
                        series_id = %spec.series_id,
                        error_kind = %kind,
                        error = %message,
                        "series failed, skipping"
                    );
                    failed.push(spec.series_id.clone());
                    last_failure = Some((*kind, message.clone()));
                    continue;
                }
                incomplete.push(spec.series_id.clone());
            }

            let normalizer = MetricNormalizer::new(spec);
            combined.absorb(normalize_pages(&normalizer, upstream.name(), &batch.pages));
        }

        if !failed.is_empty() {
            if failed.len() as f64 > total as f64 * CRITICAL_SERIES_FAILURE_RATIO {
                error!(
                    failed = failed.len(),
                    total,
                    series = %failed.join(", "),
                    "CRITICAL: most FRED series failed to fetch"
                );
            } else {
                warn!(
                    failed = failed.len(),
                    total,
                    series = %failed.join(", "),
                    "some FRED series failed to fetch"
                );
            }
        }

        if total > 0 && failed.len() == total {
            let (kind, message) = last_failure.unwrap_or((ErrorKind::TerminalFetch, String::new()));
            report.status = SourceStatus::Failed {
                kind,
                message: format!("all {total} series failed; last error: {message}"),
            };
            return;
        }

        let partial = if failed.is_empty() && incomplete.is_empty() {
            None
        } else {
            let mut parts = Vec::new();
            if !failed.is_empty() {
                parts.push(format!(
                    "{}/{} series failed ({})",
                    failed.len(),
                    total,
                    failed.join(", ")
                ));
            }
            if !incomplete.is_empty() {
                parts.push(format!("incomplete series: {}", incomplete.join(", ")));
            }
            Some(parts.join("; "))
        };
        self.commit(&self.tables.metrics, combined, partial, report).await;
    }

    async fn commit<T: TableRecord>(
        &self,
        table: &TableName,
        normalized: Normalized<T>,
        partial: Option<String>,
        report: &mut SourceReport,
    ) {
        report.normalized = normalized.records.len();
        report.skipped = normalized.skipped;

        match self.storage.commit(table, &normalized.records).await {
            Ok(stats) => {
                report.stats = Some(stats);
                report.status = match partial {
                    Some(reason) => SourceStatus::Partial { reason },
                    None => SourceStatus::Success,
                };
            },
            Err(err) => {
                report.status = SourceStatus::Failed {
                    kind: ErrorKind::StorageWrite,
                    message: err.to_string(),
                };
            },
        }
    }

    /// Best effort: a failure to record is logged and otherwise ignored
    async fn record(&self, report: &SourceReport) {
        if let Err(err) = self
            .storage
            .record_run(&self.tables.runs, &report.to_run_record())
            .await
        {
            warn!(error_kind = %ErrorKind::StorageWrite, error = %err, "could not record run");
        }
    }
}

fn log_report(report: &SourceReport) {
    let stats = report.stats.unwrap_or_default();
    match &report.status {
        SourceStatus::Success => info!(
            pages = report.pages,
            fetched = report.fetched,
            normalized = report.normalized,
            skipped = report.skipped,
            inserted = stats.inserted,
            overridden = stats.overridden,
            retained = stats.retained,
            "source succeeded"
        ),
        SourceStatus::Partial { reason } => warn!(
            pages = report.pages,
            normalized = report.normalized,
            skipped = report.skipped,
            inserted = stats.inserted,
            overridden = stats.overridden,
            retained = stats.retained,
            reason = %reason,
            "source partially succeeded"
        ),
        SourceStatus::Failed { kind, message } => error!(
            pages = report.pages,
            fetched = report.fetched,
            normalized = report.normalized,
            error_kind = %kind,
            error = %message,
            "source failed, previous data kept"
        ),
    }
}
