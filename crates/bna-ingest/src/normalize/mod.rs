//! Turning raw upstream pages into keyed records
//!
//! A [`RecordNormalizer`] maps one raw upstream record to zero or more typed
//! rows. [`normalize_pages`] drives it over a whole fetch in page order:
//! malformed records are skipped with a warning and counted, and when a key
//! shows up more than once the last occurrence wins. A repeated multi-row
//! record (a rental listing with units) replaces its earlier rows as a whole.

pub mod flatten;
pub mod listing;
pub mod metric;
pub mod rental;

pub use flatten::{flatten, parse_number, FlatRecord, Scalar};
pub use listing::{ListingNormalizer, ListingRecord};
pub use metric::{MetricNormalizer, MetricRecord};
pub use rental::{RentalNormalizer, RentalUnitRecord};

use crate::error::{ErrorKind, NormalizationError};
use crate::fetch::RawPage;
use crate::merge::{Keyed, KeyedSet};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub trait RecordNormalizer {
    type Record: Keyed;

    /// Rows produced by one upstream record
    fn normalize_record(&self, raw: &Value) -> Result<Vec<Self::Record>, NormalizationError>;

    /// Upstream record a row came from, when one record yields several rows.
    /// A later record with the same group replaces all rows of the earlier one.
    fn group_of(&self, _row: &Self::Record) -> Option<String> {
        None
    }
}

/// Output of normalizing one fetch
#[derive(Debug, Clone)]
pub struct Normalized<T: Keyed> {
    pub records: KeyedSet<T>,
    /// Upstream records dropped as malformed
    pub skipped: usize,
    /// Rows replaced by a later row with the same key
    pub duplicates: usize,
}

impl<T: Keyed> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            records: KeyedSet::new(),
            skipped: 0,
            duplicates: 0,
        }
    }
}

impl<T: Keyed> Normalized<T> {
    /// Fold another result in; its rows win over ours on key collisions
    pub fn absorb(&mut self, other: Normalized<T>) {
        self.skipped += other.skipped;
        self.duplicates += other.duplicates;
        for record in other.records {
            if self.records.insert(record) {
                self.duplicates += 1;
            }
        }
    }
}

pub fn normalize_pages<N>(normalizer: &N, source: &str, pages: &[RawPage]) -> Normalized<N::Record>
where
    N: RecordNormalizer,
{
    let mut out = Normalized::default();
    let mut groups: HashMap<String, Vec<<N::Record as Keyed>::Key>> = HashMap::new();

    for page in pages {
        for (position, raw) in page.records.iter().enumerate() {
            match normalizer.normalize_record(raw) {
                Ok(rows) => {
                    let group = rows.first().and_then(|row| normalizer.group_of(row));
                    if let Some(stale) = group.as_ref().and_then(|g| groups.remove(g)) {
                        let replaced = stale
                            .iter()
                            .filter(|key| out.records.remove(*key).is_some())
                            .count();
                        out.duplicates += replaced;
                        debug!(
                            source,
                            page = page.number,
                            group = ?group,
                            replaced,
                            "upstream record repeated, dropping its earlier rows"
                        );
                    }

                    let mut keys = Vec::with_capacity(rows.len());
                    for row in rows {
                        let key = row.key();
                        if out.records.insert(row) {
                            out.duplicates += 1;
                            debug!(
                                source,
                                page = page.number,
                                key = ?key,
                                "duplicate key, keeping later record"
                            );
                        }
                        keys.push(key);
                    }
                    if let Some(group) = group {
                        groups.insert(group, keys);
                    }
                },
                Err(err) => {
                    out.skipped += 1;
                    warn!(
                        source,
                        page = page.number,
                        position,
                        error_kind = %ErrorKind::Normalization,
                        error = %err,
                        "skipping malformed record"
                    );
                },
            }
        }
    }

    if out.duplicates > 0 {
        info!(source, duplicates = out.duplicates, "collapsed duplicate keys within batch");
    }
    out
}
