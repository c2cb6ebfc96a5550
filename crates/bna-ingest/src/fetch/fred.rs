//! FRED series observations (`/series/observations`)

use super::{get_json_object, json_type, PageSource, RawPage};
use crate::config::{ApiKey, FredConfig, SeriesSpec};
use crate::error::FetchError;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::Value;

/// Observations of one series over a fixed window, `page_size` per page
#[derive(Debug, Clone)]
pub struct FredSeries {
    client: Client,
    endpoint: String,
    api_key: ApiKey,
    series: SeriesSpec,
    start: NaiveDate,
    end: NaiveDate,
    page_size: u32,
    name: String,
}

impl FredSeries {
    pub fn new(
        client: Client,
        config: &FredConfig,
        series: SeriesSpec,
        window: (NaiveDate, NaiveDate),
    ) -> Self {
        let (start, end) = window;
        Self {
            client,
            endpoint: format!(
                "{}/series/observations",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key.clone(),
            name: format!("fred:{}", series.series_id),
            series,
            start,
            end,
            page_size: config.page_size.max(1),
        }
    }

    pub fn series(&self) -> &SeriesSpec {
        &self.series
    }

    fn offset(&self, page: u32) -> u64 {
        u64::from(page.saturating_sub(1)) * u64::from(self.page_size)
    }
}

#[async_trait]
impl PageSource for FredSeries {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, page: u32) -> Result<RawPage, FetchError> {
        let request = self.client.get(&self.endpoint).query(&[
            ("series_id", self.series.series_id.clone()),
            ("api_key", self.api_key.expose().to_string()),
            ("file_type", "json".to_string()),
            ("observation_start", self.start.format("%Y-%m-%d").to_string()),
            ("observation_end", self.end.format("%Y-%m-%d").to_string()),
            ("limit", self.page_size.to_string()),
            ("offset", self.offset(page).to_string()),
        ]);
        let mut body = get_json_object(request).await?;

        let records = match body.remove("observations") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(observations)) => observations,
            Some(other) => {
                return Err(FetchError::decode(format!(
                    "'observations' should be an array, got {}",
                    json_type(&other)
                )))
            },
        };

        let raw = RawPage::new(page, records);
        let page_size = u64::from(self.page_size);
        let total_pages = body
            .get("count")
            .and_then(Value::as_u64)
            .map(|count| count.div_ceil(page_size))
            .and_then(|pages| u32::try_from(pages).ok());
        Ok(match total_pages {
            Some(total) => raw.with_total_pages(total),
            None => raw,
        })
    }
}
