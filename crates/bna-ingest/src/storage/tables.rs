//! Table layouts and row mapping for each record type
//!
//! Every table has the record's typed columns, a primary key on the business
//! key, and two bookkeeping columns: `first_seen_at` (set once, on insert) and
//! `last_seen_at` (refreshed whenever the key shows up in a batch).

use super::TableName;
use crate::merge::Keyed;
use crate::normalize::{ListingRecord, MetricRecord, RentalUnitRecord, Scalar};
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeMap;

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// A record type with its own table
pub trait TableRecord: Keyed + Clone + Send + Sync + Unpin + 'static {
    /// `(name, declaration)` of every data column, in bind order
    const COLUMNS: &'static [(&'static str, &'static str)];
    /// Primary key columns
    const KEY_COLUMNS: &'static [&'static str];
    /// Extra secondary indexes
    const INDEXED: &'static [&'static str];
    /// Table-level CHECK constraints
    const CHECKS: &'static [&'static str] = &[];

    /// Bind the data columns, in `COLUMNS` order
    fn bind_columns<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q>;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error>;
}

pub fn create_table_sql<T: TableRecord>(table: &TableName) -> String {
    let mut parts: Vec<String> = T::COLUMNS
        .iter()
        .map(|(name, decl)| format!("{name} {decl}"))
        .collect();
    parts.push("first_seen_at TEXT NOT NULL".to_string());
    parts.push("last_seen_at TEXT NOT NULL".to_string());
    parts.push(format!("PRIMARY KEY ({})", T::KEY_COLUMNS.join(", ")));
    parts.extend(T::CHECKS.iter().map(|check| format!("CHECK ({check})")));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        table.quoted(),
        parts.join(",\n    ")
    )
}

pub fn index_sql<T: TableRecord>(table: &TableName) -> Vec<String> {
    T::INDEXED
        .iter()
        .chain(std::iter::once(&"last_seen_at"))
        .map(|column| {
            format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{}_{}\" ON {} ({})",
                table.as_str(),
                column,
                table.quoted(),
                column
            )
        })
        .collect()
}

/// Keyed upsert. Data columns bind to `?1..?n`; the fetch timestamp binds to
/// `?n+1` and fills both timestamps on insert, only `last_seen_at` on update.
pub fn upsert_sql<T: TableRecord>(table: &TableName) -> String {
    let names: Vec<&str> = T::COLUMNS.iter().map(|(name, _)| *name).collect();
    let seen = names.len() + 1;
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    let updates: Vec<String> = names
        .iter()
        .filter(|name| !T::KEY_COLUMNS.contains(*name))
        .map(|name| format!("{name} = excluded.{name}"))
        .chain(std::iter::once(
            "last_seen_at = excluded.last_seen_at".to_string(),
        ))
        .collect();

    format!(
        "INSERT INTO {} ({}, first_seen_at, last_seen_at)\n\
         VALUES ({}, ?{seen}, ?{seen})\n\
         ON CONFLICT ({}) DO UPDATE SET {}",
        table.quoted(),
        names.join(", "),
        placeholders.join(", "),
        T::KEY_COLUMNS.join(", "),
        updates.join(", ")
    )
}

pub fn select_sql<T: TableRecord>(table: &TableName) -> String {
    let names: Vec<&str> = T::COLUMNS.iter().map(|(name, _)| *name).collect();
    format!(
        "SELECT {} FROM {} ORDER BY {}",
        names.join(", "),
        table.quoted(),
        T::KEY_COLUMNS.join(", ")
    )
}

pub(crate) fn bind_upsert<'q, T: TableRecord>(
    record: &T,
    query: SqliteQuery<'q>,
    seen_at: DateTime<Utc>,
) -> SqliteQuery<'q> {
    record.bind_columns(query).bind(seen_at)
}

const LISTING_COLUMNS: [(&str, &str); 12] = [
    ("zpid", "TEXT NOT NULL"),
    ("price", "REAL NOT NULL"),
    ("bedrooms", "REAL"),
    ("bathrooms", "REAL"),
    ("living_area", "REAL"),
    ("address", "TEXT NOT NULL"),
    ("latitude", "REAL"),
    ("longitude", "REAL"),
    ("days_on_zillow", "INTEGER"),
    ("listing_status", "TEXT"),
    ("property_type", "TEXT"),
    ("attributes", "TEXT NOT NULL"),
];

const RENTAL_COLUMNS: [(&str, &str); 17] = [
    LISTING_COLUMNS[0],
    ("unit_index", "INTEGER NOT NULL"),
    LISTING_COLUMNS[1],
    LISTING_COLUMNS[2],
    LISTING_COLUMNS[3],
    LISTING_COLUMNS[4],
    LISTING_COLUMNS[5],
    LISTING_COLUMNS[6],
    LISTING_COLUMNS[7],
    LISTING_COLUMNS[8],
    LISTING_COLUMNS[9],
    LISTING_COLUMNS[10],
    LISTING_COLUMNS[11],
    ("beds_unit", "REAL"),
    ("baths_unit", "REAL"),
    ("price_unit", "REAL"),
    ("unit_attributes", "TEXT NOT NULL"),
];

/// Binds the listing columns after `zpid` (and after `unit_index` for rentals)
fn bind_listing_body<'q>(listing: &ListingRecord, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
    query
        .bind(listing.price)
        .bind(listing.bedrooms)
        .bind(listing.bathrooms)
        .bind(listing.living_area)
        .bind(listing.address.clone())
        .bind(listing.latitude)
        .bind(listing.longitude)
        .bind(listing.days_on_zillow)
        .bind(listing.listing_status.clone())
        .bind(listing.property_type.clone())
        .bind(Json(listing.attributes.clone()))
}

fn listing_from_row(row: &SqliteRow) -> Result<ListingRecord, sqlx::Error> {
    let attributes: Json<BTreeMap<String, Scalar>> = row.try_get("attributes")?;
    Ok(ListingRecord {
        zpid: row.try_get("zpid")?,
        price: row.try_get("price")?,
        bedrooms: row.try_get("bedrooms")?,
        bathrooms: row.try_get("bathrooms")?,
        living_area: row.try_get("living_area")?,
        address: row.try_get("address")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        days_on_zillow: row.try_get("days_on_zillow")?,
        listing_status: row.try_get("listing_status")?,
        property_type: row.try_get("property_type")?,
        attributes: attributes.0,
    })
}

impl TableRecord for ListingRecord {
    const COLUMNS: &'static [(&'static str, &'static str)] = &LISTING_COLUMNS;
    const KEY_COLUMNS: &'static [&'static str] = &["zpid"];
    const INDEXED: &'static [&'static str] = &["price", "bedrooms", "bathrooms"];
    const CHECKS: &'static [&'static str] = &["price > 0"];

    fn bind_columns<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        bind_listing_body(self, query.bind(self.zpid.clone()))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        listing_from_row(row)
    }
}

impl TableRecord for RentalUnitRecord {
    const COLUMNS: &'static [(&'static str, &'static str)] = &RENTAL_COLUMNS;
    const KEY_COLUMNS: &'static [&'static str] = &["zpid", "unit_index"];
    const INDEXED: &'static [&'static str] = &["zpid", "price", "bedrooms", "beds_unit"];
    const CHECKS: &'static [&'static str] = &["price > 0"];

    fn bind_columns<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        let query = query
            .bind(self.listing.zpid.clone())
            .bind(i64::from(self.unit_index));
        bind_listing_body(&self.listing, query)
            .bind(self.beds_unit)
            .bind(self.baths_unit)
            .bind(self.price_unit)
            .bind(Json(self.unit_attributes.clone()))
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let unit_index: i64 = row.try_get("unit_index")?;
        let unit_attributes: Json<BTreeMap<String, Scalar>> = row.try_get("unit_attributes")?;
        Ok(Self {
            listing: listing_from_row(row)?,
            unit_index: u32::try_from(unit_index).map_err(|e| sqlx::Error::ColumnDecode {
                index: "unit_index".to_string(),
                source: Box::new(e),
            })?,
            beds_unit: row.try_get("beds_unit")?,
            baths_unit: row.try_get("baths_unit")?,
            price_unit: row.try_get("price_unit")?,
            unit_attributes: unit_attributes.0,
        })
    }
}

impl TableRecord for MetricRecord {
    const COLUMNS: &'static [(&'static str, &'static str)] = &[
        ("date", "TEXT NOT NULL"),
        ("series_id", "TEXT NOT NULL"),
        ("metric_name", "TEXT NOT NULL"),
        ("value", "REAL NOT NULL"),
    ];
    const KEY_COLUMNS: &'static [&'static str] = &["date", "series_id"];
    const INDEXED: &'static [&'static str] = &["series_id", "metric_name"];

    fn bind_columns<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        query
            .bind(self.date)
            .bind(self.series_id.clone())
            .bind(self.metric_name.clone())
            .bind(self.value)
    }

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            date: row.try_get("date")?,
            series_id: row.try_get("series_id")?,
            metric_name: row.try_get("metric_name")?,
            value: row.try_get("value")?,
        })
    }
}
