//! Rental listings, one row per unit
//!
//! Multi-unit rentals carry a `units` list. Each entry becomes its own row that
//! repeats the parent listing columns and adds the unit's columns with a
//! `_unit` suffix. A listing whose `units` field is missing, empty or
//! unreadable becomes exactly one row with `unit_index = 0` and null unit
//! columns, so single-unit rentals are stored the same way as multi-unit ones.

use super::flatten::{flatten, take_number, FlatRecord, Scalar};
use super::listing::ListingRecord;
use super::RecordNormalizer;
use crate::error::NormalizationError;
use crate::merge::Keyed;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub const UNIT_SUFFIX: &str = "_unit";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalUnitRecord {
    pub listing: ListingRecord,
    /// Position of the unit in the upstream `units` list
    pub unit_index: u32,
    pub beds_unit: Option<f64>,
    pub baths_unit: Option<f64>,
    pub price_unit: Option<f64>,
    /// Remaining unit columns, keys suffixed with `_unit`
    pub unit_attributes: BTreeMap<String, Scalar>,
}

impl Keyed for RentalUnitRecord {
    type Key = (String, u32);

    fn key(&self) -> (String, u32) {
        (self.listing.zpid.clone(), self.unit_index)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct UnitColumns {
    beds: Option<f64>,
    baths: Option<f64>,
    price: Option<f64>,
    attributes: BTreeMap<String, Scalar>,
}

impl UnitColumns {
    /// Unit fields that do not read as numbers are stored as null; one odd
    /// unit never drops the listing.
    fn from_flat(mut flat: FlatRecord) -> Self {
        let beds = unit_number(&mut flat, "beds", "beds_unit");
        let baths = unit_number(&mut flat, "baths", "baths_unit");
        let price = unit_number(&mut flat, "price", "price_unit");
        let attributes = flat
            .into_iter()
            .map(|(k, v)| (format!("{k}{UNIT_SUFFIX}"), v))
            .collect();
        Self {
            beds,
            baths,
            price,
            attributes,
        }
    }
}

fn unit_number(flat: &mut FlatRecord, key: &str, field: &'static str) -> Option<f64> {
    take_number(flat, key, field).unwrap_or_else(|err| {
        debug!(error = %err, "unreadable unit field, storing null");
        None
    })
}

/// Normalizes `propertyByPolygon` results for `status_type=ForRent`
#[derive(Debug, Clone, Copy, Default)]
pub struct RentalNormalizer;

impl RecordNormalizer for RentalNormalizer {
    type Record = RentalUnitRecord;

    fn normalize_record(&self, raw: &Value) -> Result<Vec<RentalUnitRecord>, NormalizationError> {
        let mut object = raw
            .as_object()
            .cloned()
            .ok_or(NormalizationError::NotAnObject)?;
        let units_raw = object.remove("units");
        let parent = flatten(&Value::Object(object))?;

        let units = match units_raw.as_ref().and_then(parse_units) {
            Some(units) => units
                .iter()
                .filter_map(|unit| flatten(unit).ok())
                .map(UnitColumns::from_flat)
                .collect(),
            None => {
                if units_raw.as_ref().is_some_and(|v| !v.is_null()) {
                    debug!(zpid = ?parent.get("zpid"), "unreadable units field, keeping one row");
                }
                Vec::new()
            },
        };

        // multi-unit buildings often only price their units
        let fallback_price = units
            .iter()
            .filter_map(|u| u.price)
            .filter(|p| *p > 0.0)
            .min_by(f64::total_cmp);
        let listing = ListingRecord::from_flat(parent, fallback_price)?;

        if units.is_empty() {
            return Ok(vec![RentalUnitRecord {
                listing,
                unit_index: 0,
                beds_unit: None,
                baths_unit: None,
                price_unit: None,
                unit_attributes: BTreeMap::new(),
            }]);
        }

        Ok(units
            .into_iter()
            .zip(0u32..)
            .map(|(unit, unit_index)| RentalUnitRecord {
                listing: listing.clone(),
                unit_index,
                beds_unit: unit.beds,
                baths_unit: unit.baths,
                price_unit: unit.price,
                unit_attributes: unit.attributes,
            })
            .collect())
    }

    fn group_of(&self, row: &RentalUnitRecord) -> Option<String> {
        Some(row.listing.zpid.clone())
    }
}

/// Read the `units` field: a JSON array, or a string holding a JSON or
/// Python-literal list (`"[{'beds': 2, 'price': '$1,800'}]"`)
pub fn parse_units(value: &Value) -> Option<Vec<Value>> {
    let parsed = match value {
        Value::Array(items) => return Some(items.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .or_else(|| python_literal_to_json(s).and_then(|j| serde_json::from_str(&j).ok()))?,
        _ => return None,
    };
    match parsed {
        Value::Array(items) => Some(items),
        _ => None,
    }
}

/// Rewrite a Python literal (single-quoted strings, `True`/`False`/`None`)
/// as JSON. Returns `None` on an unterminated string.
fn python_literal_to_json(src: &str) -> Option<String> {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                let quote = c;
                out.push('"');
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => {
                            let escaped = chars.next()?;
                            match escaped {
                                '\'' => out.push('\''),
                                other => {
                                    out.push('\\');
                                    out.push(other);
                                },
                            }
                        },
                        ch if ch == quote => {
                            closed = true;
                            break;
                        },
                        '"' => out.push_str("\\\""),
                        ch => out.push(ch),
                    }
                }
                if !closed {
                    return None;
                }
                out.push('"');
            },
            c if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            },
            c => out.push(c),
        }
    }
    Some(out)
}
