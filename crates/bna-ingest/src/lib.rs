//! BNA Market Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Periodic ETL for Nashville (BNA) real-estate data: Zillow for-sale and rental
//! listings and FRED economic series are fetched, normalized into keyed rows and
//! merged into SQLite tables.
//!
//! # Pipeline
//!
//! - [`fetch`]: paginated upstream fetching with per-page retry and pacing
//! - [`normalize`]: raw JSON to typed, keyed records
//! - [`merge`]: keyed override-and-retain merge semantics
//! - [`storage`]: atomic upsert into SQLite, plus run history
//! - [`orchestrator`]: runs sources in isolation and reports per-source status
//!
//! # Example
//!
//! ```no_run
//! use bna_ingest::config::EtlConfig;
//! use bna_ingest::orchestrator::{DataSource, EtlOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::from_env()?;
//!     let orchestrator = EtlOrchestrator::from_config(&config).await?;
//!     let summary = orchestrator.run_all(&DataSource::ALL, true).await;
//!     assert!(!summary.has_failures());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod normalize;
pub mod orchestrator;
pub mod retry;
pub mod storage;

pub use config::EtlConfig;
pub use error::{ErrorKind, FetchError, NormalizationError, StorageError};
pub use merge::{Keyed, KeyedSet, MergeStats};
pub use normalize::{ListingRecord, MetricRecord, RentalUnitRecord};
pub use orchestrator::{DataSource, EtlOrchestrator, RunSummary, SourceReport, SourceStatus};
pub use retry::RetryPolicy;
