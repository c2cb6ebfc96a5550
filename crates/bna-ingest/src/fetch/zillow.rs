//! Zillow listing search over RapidAPI (`/propertyByPolygon`)

use super::{get_json_object, json_type, PageSource, RawPage};
use crate::config::{ApiKey, SearchFilters, ZillowConfig};
use crate::error::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// Which listings a search returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingKind {
    ForSale,
    ForRent,
}

impl ListingKind {
    /// Value of the `status_type` query parameter
    pub fn status_type(self) -> &'static str {
        match self {
            ListingKind::ForSale => "ForSale",
            ListingKind::ForRent => "ForRent",
        }
    }
}

/// One configured listing search; each page is a separate request
#[derive(Debug, Clone)]
pub struct ZillowSearch {
    client: Client,
    endpoint: String,
    api_key: ApiKey,
    host: String,
    polygon: String,
    kind: ListingKind,
    filters: Vec<(&'static str, String)>,
    name: String,
}

impl ZillowSearch {
    pub fn new(client: Client, config: &ZillowConfig, kind: ListingKind) -> Self {
        let filters: &SearchFilters = match kind {
            ListingKind::ForSale => &config.for_sale,
            ListingKind::ForRent => &config.rentals,
        };
        Self {
            client,
            endpoint: format!("{}/propertyByPolygon", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            host: config.host.clone(),
            polygon: config.bounds.polygon(),
            kind,
            filters: filters.query_pairs(),
            name: format!("zillow:{}", kind.status_type()),
        }
    }

    pub fn kind(&self) -> ListingKind {
        self.kind
    }

    fn query(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("polygon", self.polygon.clone()),
            ("status_type", self.kind.status_type().to_string()),
            ("page", page.to_string()),
        ];
        query.extend(self.filters.iter().cloned());
        query
    }
}

#[async_trait]
impl PageSource for ZillowSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, page: u32) -> Result<RawPage, FetchError> {
        let request = self
            .client
            .get(&self.endpoint)
            .header("x-rapidapi-key", self.api_key.expose())
            .header("x-rapidapi-host", &self.host)
            .query(&self.query(page));
        let mut body = get_json_object(request).await?;

        let records = match body.remove("props") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(props)) => props,
            Some(other) => {
                return Err(FetchError::decode(format!(
                    "'props' should be an array, got {}",
                    json_type(&other)
                )))
            },
        };

        let raw = RawPage::new(page, records);
        let total_pages = body
            .get("totalPages")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok());
        Ok(match total_pages {
            Some(total) => raw.with_total_pages(total),
            None => raw,
        })
    }
}
