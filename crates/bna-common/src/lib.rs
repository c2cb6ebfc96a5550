//! BNA Market Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the BNA Market workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`BnaError`] and the [`Result`] alias used for configuration
//!   and start-up failures
//! - **Logging**: [`logging::init_logging`], a single place that wires `tracing`
//!   subscribers for every binary
//!
//! # Example
//!
//! ```no_run
//! use bna_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> bna_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{BnaError, Result};
