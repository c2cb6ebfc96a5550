//! For-sale listings

use super::flatten::{flatten, take_number, take_text, FlatRecord, Scalar};
use super::RecordNormalizer;
use crate::error::NormalizationError;
use crate::merge::Keyed;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Listings priced at or above this are treated as data errors
pub const MAX_PRICE: f64 = 100_000_000.0;

/// One property listing, keyed by `zpid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub zpid: String,
    pub price: f64,
    pub bedrooms: Option<f64>,
    pub bathrooms: Option<f64>,
    pub living_area: Option<f64>,
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub days_on_zillow: Option<i64>,
    pub listing_status: Option<String>,
    pub property_type: Option<String>,
    /// Every other upstream column, flattened
    pub attributes: BTreeMap<String, Scalar>,
}

impl Keyed for ListingRecord {
    type Key = String;

    fn key(&self) -> String {
        self.zpid.clone()
    }
}

impl ListingRecord {
    /// Build a listing from a flattened record. `fallback_price` is used when
    /// the record itself carries no price.
    pub(crate) fn from_flat(
        mut flat: FlatRecord,
        fallback_price: Option<f64>,
    ) -> Result<Self, NormalizationError> {
        let zpid = take_text(&mut flat, "zpid").ok_or(NormalizationError::MissingField("zpid"))?;

        let price = take_number(&mut flat, "price", "price")?
            .or(fallback_price)
            .ok_or(NormalizationError::MissingField("price"))?;
        if price <= 0.0 || price >= MAX_PRICE {
            return Err(NormalizationError::OutOfRange {
                field: "price",
                value: price,
            });
        }

        let address =
            take_text(&mut flat, "address").ok_or(NormalizationError::MissingField("address"))?;

        let record = Self {
            zpid,
            price,
            bedrooms: take_number(&mut flat, "bedrooms", "bedrooms")?,
            bathrooms: take_number(&mut flat, "bathrooms", "bathrooms")?,
            living_area: take_number(&mut flat, "livingArea", "livingArea")?,
            address,
            latitude: take_number(&mut flat, "latitude", "latitude")?,
            longitude: take_number(&mut flat, "longitude", "longitude")?,
            days_on_zillow: take_number(&mut flat, "daysOnZillow", "daysOnZillow")?
                .map(|d| d.round() as i64),
            listing_status: take_text(&mut flat, "listingStatus"),
            property_type: take_text(&mut flat, "propertyType"),
            attributes: flat,
        };
        Ok(record)
    }
}

/// Normalizes `propertyByPolygon` results for `status_type=ForSale`
#[derive(Debug, Clone, Copy, Default)]
pub struct ListingNormalizer;

impl RecordNormalizer for ListingNormalizer {
    type Record = ListingRecord;

    fn normalize_record(&self, raw: &Value) -> Result<Vec<ListingRecord>, NormalizationError> {
        let flat = flatten(raw)?;
        ListingRecord::from_flat(flat, None).map(|record| vec![record])
    }
}
