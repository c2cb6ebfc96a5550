//! FRED observations

use super::flatten::parse_number;
use super::RecordNormalizer;
use crate::config::SeriesSpec;
use crate::error::NormalizationError;
use crate::merge::Keyed;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// FRED's marker for a period without a value
pub const MISSING_VALUE: &str = ".";

/// One observation of an economic indicator, keyed by `(date, series_id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub date: NaiveDate,
    pub series_id: String,
    pub metric_name: String,
    pub value: f64,
}

impl Keyed for MetricRecord {
    type Key = (NaiveDate, String);

    fn key(&self) -> (NaiveDate, String) {
        (self.date, self.series_id.clone())
    }
}

/// Normalizes the observations of one series
#[derive(Debug, Clone)]
pub struct MetricNormalizer {
    series: SeriesSpec,
}

impl MetricNormalizer {
    pub fn new(series: SeriesSpec) -> Self {
        Self { series }
    }
}

impl RecordNormalizer for MetricNormalizer {
    type Record = MetricRecord;

    fn normalize_record(&self, raw: &Value) -> Result<Vec<MetricRecord>, NormalizationError> {
        let obs = raw.as_object().ok_or(NormalizationError::NotAnObject)?;

        let date_raw = obs
            .get("date")
            .and_then(Value::as_str)
            .ok_or(NormalizationError::MissingField("date"))?;
        let date = NaiveDate::parse_from_str(date_raw.trim(), "%Y-%m-%d")
            .map_err(|_| NormalizationError::invalid("date", date_raw))?;

        let value = match obs.get("value") {
            None | Some(Value::Null) => return Err(NormalizationError::MissingField("value")),
            Some(Value::String(s)) if s.trim() == MISSING_VALUE => {
                return Err(NormalizationError::MissingField("value"))
            },
            Some(Value::String(s)) => {
                parse_number(s).ok_or_else(|| NormalizationError::invalid("value", s))?
            },
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| NormalizationError::invalid("value", n))?,
            Some(other) => return Err(NormalizationError::invalid("value", other)),
        };

        Ok(vec![MetricRecord {
            date,
            series_id: self.series.series_id.clone(),
            metric_name: self.series.metric_name.clone(),
            value,
        }])
    }
}
