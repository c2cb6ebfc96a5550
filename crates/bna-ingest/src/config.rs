//! ETL configuration
//!
//! Everything the pipeline needs is read once into [`EtlConfig`], validated, and
//! passed down explicitly. Variables come from the process environment after
//! `.env` is loaded; [`EtlConfig::from_lookup`] takes any lookup function so tests
//! never touch global state.

use crate::retry::RetryPolicy;
use crate::storage::is_valid_identifier;
use bna_common::{BnaError, Result};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://bna_market.db";
pub const DEFAULT_ZILLOW_BASE_URL: &str = "https://zillow-com1.p.rapidapi.com";
pub const DEFAULT_ZILLOW_HOST: &str = "zillow-com1.p.rapidapi.com";
pub const DEFAULT_FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred";
pub const DEFAULT_MAX_PAGES: u32 = 20;
pub const DEFAULT_PAGE_DELAY_MS: u64 = 500;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_YEARS_HISTORICAL: u32 = 15;
pub const DEFAULT_FRED_PAGE_SIZE: u32 = 1000;

/// FRED rejects larger `limit` values
const FRED_MAX_PAGE_SIZE: u32 = 100_000;

/// API credential that never shows up in logs or `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    pub zillow: ZillowConfig,
    pub fred: FredConfig,
    pub fetch: FetchSettings,
    pub retry: RetryPolicy,
    pub tables: TableNames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// How long SQLite waits on a lock held by another process
    pub busy_timeout: Duration,
    /// Upper bound on one whole commit transaction
    pub commit_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(30),
            commit_timeout: Duration::from_secs(120),
        }
    }
}

impl DatabaseConfig {
    /// Private in-memory database, mostly for tests
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Self::default()
        }
    }
}

/// Bounding box of the search area, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub west: f64,
    pub north: f64,
    pub east: f64,
    pub south: f64,
}

impl GeoBounds {
    /// Nashville MSA
    pub const NASHVILLE: GeoBounds = GeoBounds {
        west: -87.2316,
        north: 36.5227,
        east: -86.3316,
        south: 35.8027,
    };

    /// Closed polygon ring as the listing search expects it: `"lon lat, lon lat, ..."`
    pub fn polygon(&self) -> String {
        let corners = [
            (self.west, self.north),
            (self.east, self.north),
            (self.east, self.south),
            (self.west, self.south),
            (self.west, self.north),
        ];
        corners
            .iter()
            .map(|(lon, lat)| format!("{lon} {lat}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn validate(&self) -> Result<()> {
        let lon_ok = |v: f64| (-180.0..=180.0).contains(&v);
        let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);
        if !(lon_ok(self.west) && lon_ok(self.east) && lat_ok(self.north) && lat_ok(self.south)) {
            return Err(BnaError::config(format!(
                "bounding box {self:?} has coordinates out of range"
            )));
        }
        if self.west >= self.east || self.south >= self.north {
            return Err(BnaError::config(format!("bounding box {self:?} is inverted")));
        }
        Ok(())
    }
}

impl FromStr for GeoBounds {
    type Err = BnaError;

    /// Parses `"west,north,east,south"`
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| BnaError::invalid_value("ZILLOW_BOUNDS", s))?;
        match parts.as_slice() {
            [west, north, east, south] => Ok(Self {
                west: *west,
                north: *north,
                east: *east,
                south: *south,
            }),
            _ => Err(BnaError::invalid_value("ZILLOW_BOUNDS", s)),
        }
    }
}

/// Listing search filters sent with every page request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub min_price: u32,
    pub max_price: u32,
    pub beds_min: u32,
    pub beds_max: u32,
    pub baths_min: u32,
    pub baths_max: u32,
    pub sqft_min: u32,
    pub sqft_max: u32,
    pub build_year_min: u32,
}

impl SearchFilters {
    pub fn for_sale_defaults() -> Self {
        Self {
            min_price: 100_000,
            max_price: 700_000,
            beds_min: 1,
            beds_max: 5,
            baths_min: 1,
            baths_max: 4,
            sqft_min: 700,
            sqft_max: 5000,
            build_year_min: 1990,
        }
    }

    pub fn rental_defaults() -> Self {
        Self {
            min_price: 1400,
            max_price: 3200,
            beds_min: 1,
            beds_max: 4,
            baths_min: 1,
            baths_max: 4,
            sqft_min: 550,
            sqft_max: 6000,
            build_year_min: 1979,
        }
    }

    /// Upstream query parameter names and values
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("minPrice", self.min_price.to_string()),
            ("maxPrice", self.max_price.to_string()),
            ("bedsMin", self.beds_min.to_string()),
            ("bedsMax", self.beds_max.to_string()),
            ("bathsMin", self.baths_min.to_string()),
            ("bathsMax", self.baths_max.to_string()),
            ("sqftMin", self.sqft_min.to_string()),
            ("sqftMax", self.sqft_max.to_string()),
            ("buildYearMin", self.build_year_min.to_string()),
        ]
    }

    fn validate(&self, name: &str) -> Result<()> {
        let ranges = [
            ("price", self.min_price, self.max_price),
            ("beds", self.beds_min, self.beds_max),
            ("baths", self.baths_min, self.baths_max),
            ("sqft", self.sqft_min, self.sqft_max),
        ];
        for (field, min, max) in ranges {
            if min > max {
                return Err(BnaError::config(format!(
                    "{name} filter {field} range is inverted ({min} > {max})"
                )));
            }
        }
        Ok(())
    }

    fn from_vars(vars: &Vars<'_>, prefix: &str, defaults: Self) -> Result<Self> {
        let key = |suffix: &str| format!("{prefix}_{suffix}");
        Ok(Self {
            min_price: vars.parse(&key("MIN_PRICE"), defaults.min_price)?,
            max_price: vars.parse(&key("MAX_PRICE"), defaults.max_price)?,
            beds_min: vars.parse(&key("BEDS_MIN"), defaults.beds_min)?,
            beds_max: vars.parse(&key("BEDS_MAX"), defaults.beds_max)?,
            baths_min: vars.parse(&key("BATHS_MIN"), defaults.baths_min)?,
            baths_max: vars.parse(&key("BATHS_MAX"), defaults.baths_max)?,
            sqft_min: vars.parse(&key("SQFT_MIN"), defaults.sqft_min)?,
            sqft_max: vars.parse(&key("SQFT_MAX"), defaults.sqft_max)?,
            build_year_min: vars.parse(&key("BUILD_YEAR_MIN"), defaults.build_year_min)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ZillowConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub host: String,
    pub bounds: GeoBounds,
    pub for_sale: SearchFilters,
    pub rentals: SearchFilters,
}

/// One FRED series and the metric name stored with its observations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesSpec {
    pub series_id: String,
    pub metric_name: String,
}

impl SeriesSpec {
    pub fn new(series_id: impl Into<String>, metric_name: impl Into<String>) -> Self {
        Self {
            series_id: series_id.into(),
            metric_name: metric_name.into(),
        }
    }

    /// Nashville MSA indicators
    pub fn nashville_defaults() -> Vec<Self> {
        vec![
            Self::new("ACTLISCOU34980", "active_listings"),
            Self::new("MEDLISPRI34980", "median_price"),
            Self::new("MEDDAYONMAR34980", "median_dom"),
            Self::new("NASH947NA", "employment_non_farm"),
            Self::new("NVLPOP", "msa_population"),
            Self::new("MEDLISPRIPERSQUFEE34980", "median_pp_sqft"),
            Self::new("MEDLISPRI34980", "median_listing_price_change"),
            Self::new("NASH947PCPI", "msa_per_capita_income"),
        ]
    }

    /// Parses `"metric_name:SERIES_ID,metric_name:SERIES_ID"`
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((name, id)) if !name.trim().is_empty() && !id.trim().is_empty() => {
                    Ok(Self::new(id.trim(), name.trim()))
                },
                _ => Err(BnaError::invalid_value("FRED_SERIES", entry)),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FredConfig {
    pub api_key: ApiKey,
    pub base_url: String,
    pub series: Vec<SeriesSpec>,
    pub years_historical: u32,
    pub page_size: u32,
}

impl FredConfig {
    /// Series to fetch, one entry per series id. A repeated id keeps its last
    /// metric name, matching how rows with the same key resolve.
    pub fn unique_series(&self) -> Vec<SeriesSpec> {
        let mut out: Vec<SeriesSpec> = Vec::with_capacity(self.series.len());
        for spec in &self.series {
            match out.iter_mut().find(|s| s.series_id == spec.series_id) {
                Some(existing) => existing.metric_name = spec.metric_name.clone(),
                None => out.push(spec.clone()),
            }
        }
        out
    }

    /// `(observation_start, observation_end)` ending on `today`
    pub fn observation_window(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let days = u64::from(self.years_historical) * 365;
        let start = today.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN);
        (start, today)
    }
}

/// Pagination pacing shared by every source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchSettings {
    pub max_pages: u32,
    /// Sleep after every page attempt
    pub page_delay: Duration,
    /// Bound on a single HTTP attempt
    pub request_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            page_delay: Duration::from_millis(DEFAULT_PAGE_DELAY_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Destination table names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    pub for_sale: String,
    pub rentals: String,
    pub metrics: String,
    pub runs: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            for_sale: "bna_forsale".to_string(),
            rentals: "bna_rentals".to_string(),
            metrics: "bna_fred_metrics".to_string(),
            runs: "etl_runs".to_string(),
        }
    }
}

impl TableNames {
    fn validate(&self) -> Result<()> {
        let names = [
            ("TABLE_FOR_SALE", &self.for_sale),
            ("TABLE_RENTALS", &self.rentals),
            ("TABLE_FRED_METRICS", &self.metrics),
            ("TABLE_ETL_RUNS", &self.runs),
        ];
        let mut seen = HashSet::new();
        for (key, name) in names {
            if !is_valid_identifier(name) {
                return Err(BnaError::invalid_value(key, name.as_str()));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(BnaError::config(format!(
                    "table name '{name}' is used for more than one table"
                )));
            }
        }
        Ok(())
    }

    fn from_vars(vars: &Vars<'_>) -> Self {
        let defaults = Self::default();
        Self {
            for_sale: vars.string("TABLE_FOR_SALE", &defaults.for_sale),
            rentals: vars.string("TABLE_RENTALS", &defaults.rentals),
            metrics: vars.string("TABLE_FRED_METRICS", &defaults.metrics),
            runs: vars.string("TABLE_ETL_RUNS", &defaults.runs),
        }
    }
}

/// Typed access to configuration variables; blank values count as unset
struct Vars<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .ok_or_else(|| BnaError::config(format!("{key} is not set")))
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|_| BnaError::invalid_value(key, raw)),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: u64) -> Result<Duration> {
        self.parse(key, default).map(Duration::from_millis)
    }

    fn secs(&self, key: &str, default: u64) -> Result<Duration> {
        self.parse(key, default).map(Duration::from_secs)
    }

    fn database(&self) -> Result<DatabaseConfig> {
        let defaults = DatabaseConfig::default();
        Ok(DatabaseConfig {
            url: self.string("DATABASE_URL", &defaults.url),
            max_connections: self.parse("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            busy_timeout: self.secs("DATABASE_BUSY_TIMEOUT_SECS", defaults.busy_timeout.as_secs())?,
            commit_timeout: self.secs(
                "DATABASE_COMMIT_TIMEOUT_SECS",
                defaults.commit_timeout.as_secs(),
            )?,
        })
    }
}

impl EtlConfig {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build and validate a configuration from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup: &lookup };

        let bounds = match vars.get("ZILLOW_BOUNDS") {
            Some(raw) => raw.parse()?,
            None => GeoBounds::NASHVILLE,
        };
        let series = match vars.get("FRED_SERIES") {
            Some(raw) => SeriesSpec::parse_list(&raw)?,
            None => SeriesSpec::nashville_defaults(),
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: vars.parse("ETL_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: vars.millis(
                "ETL_RETRY_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )?,
            max_delay: vars.millis(
                "ETL_RETRY_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )?,
            jitter: vars.parse("ETL_RETRY_JITTER", defaults.jitter)?,
        };

        let config = Self {
            database: vars.database()?,
            zillow: ZillowConfig {
                api_key: ApiKey::new(vars.required("RAPID_API_KEY")?),
                base_url: vars.string("ZILLOW_BASE_URL", DEFAULT_ZILLOW_BASE_URL),
                host: vars.string("ZILLOW_HOST", DEFAULT_ZILLOW_HOST),
                bounds,
                for_sale: SearchFilters::from_vars(
                    &vars,
                    "ZILLOW_FORSALE",
                    SearchFilters::for_sale_defaults(),
                )?,
                rentals: SearchFilters::from_vars(
                    &vars,
                    "ZILLOW_RENTALS",
                    SearchFilters::rental_defaults(),
                )?,
            },
            fred: FredConfig {
                api_key: ApiKey::new(vars.required("FRED_API_KEY")?),
                base_url: vars.string("FRED_BASE_URL", DEFAULT_FRED_BASE_URL),
                series,
                years_historical: vars.parse("FRED_YEARS_HISTORICAL", DEFAULT_YEARS_HISTORICAL)?,
                page_size: vars.parse("FRED_PAGE_SIZE", DEFAULT_FRED_PAGE_SIZE)?,
            },
            fetch: FetchSettings {
                max_pages: vars.parse("ETL_MAX_PAGES", DEFAULT_MAX_PAGES)?,
                page_delay: vars.millis("ETL_PAGE_DELAY_MS", DEFAULT_PAGE_DELAY_MS)?,
                request_timeout: vars
                    .secs("ETL_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            },
            retry,
            tables: TableNames::from_vars(&vars),
        };

        config.validate()?;
        Ok(config)
    }

    /// Database and table settings only; commands that never call upstream
    /// APIs use this so they work without API keys.
    pub fn storage_from_env() -> Result<(DatabaseConfig, TableNames)> {
        let _ = dotenvy::dotenv();
        let lookup = |key: &str| std::env::var(key).ok();
        Self::storage_from_lookup(lookup)
    }

    pub fn storage_from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(DatabaseConfig, TableNames)> {
        let vars = Vars { lookup: &lookup };
        let database = vars.database()?;
        let tables = TableNames::from_vars(&vars);
        validate_database(&database)?;
        tables.validate()?;
        Ok((database, tables))
    }

    pub fn validate(&self) -> Result<()> {
        validate_database(&self.database)?;

        if self.zillow.api_key.expose().is_empty() {
            return Err(BnaError::config("RAPID_API_KEY is empty"));
        }
        if self.fred.api_key.expose().is_empty() {
            return Err(BnaError::config("FRED_API_KEY is empty"));
        }
        self.zillow.bounds.validate()?;
        self.zillow.for_sale.validate("for-sale")?;
        self.zillow.rentals.validate("rental")?;

        if self.fred.series.is_empty() {
            return Err(BnaError::config("no FRED series configured"));
        }
        if self.fred.years_historical == 0 {
            return Err(BnaError::invalid_value("FRED_YEARS_HISTORICAL", "0"));
        }
        if self.fred.page_size == 0 || self.fred.page_size > FRED_MAX_PAGE_SIZE {
            return Err(BnaError::invalid_value(
                "FRED_PAGE_SIZE",
                self.fred.page_size.to_string(),
            ));
        }

        if self.fetch.max_pages == 0 {
            return Err(BnaError::invalid_value("ETL_MAX_PAGES", "0"));
        }
        if self.fetch.request_timeout.is_zero() {
            return Err(BnaError::invalid_value("ETL_REQUEST_TIMEOUT_SECS", "0"));
        }

        self.retry.validate()?;
        self.tables.validate()?;
        Ok(())
    }
}

fn validate_database(database: &DatabaseConfig) -> Result<()> {
    if database.url.trim().is_empty() {
        return Err(BnaError::config("DATABASE_URL is empty"));
    }
    if database.max_connections == 0 {
        return Err(BnaError::invalid_value("DATABASE_MAX_CONNECTIONS", "0"));
    }
    if database.commit_timeout.is_zero() {
        return Err(BnaError::invalid_value("DATABASE_COMMIT_TIMEOUT_SECS", "0"));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<EtlConfig> {
        let mut vars: HashMap<String, String> = HashMap::from([
            ("RAPID_API_KEY".to_string(), "rapid-key".to_string()),
            ("FRED_API_KEY".to_string(), "fred-key".to_string()),
        ]);
        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        EtlConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
        assert_eq!(config.fetch.max_pages, 20);
        assert_eq!(config.fetch.page_delay, Duration::from_millis(500));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.zillow.bounds, GeoBounds::NASHVILLE);
        assert_eq!(config.zillow.for_sale, SearchFilters::for_sale_defaults());
        assert_eq!(config.zillow.rentals.max_price, 3200);
        assert_eq!(config.fred.series.len(), 8);
        assert_eq!(config.tables, TableNames::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("ETL_MAX_PAGES", "3"),
            ("ETL_RETRY_MAX_ATTEMPTS", "2"),
            ("ETL_RETRY_JITTER", "0"),
            ("ZILLOW_RENTALS_MAX_PRICE", "4000"),
            ("FRED_SERIES", "population:NVLPOP, income:NASH947PCPI"),
            ("TABLE_FOR_SALE", "listings"),
        ])
        .unwrap();

        assert_eq!(config.fetch.max_pages, 3);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.jitter, 0.0);
        assert_eq!(config.zillow.rentals.max_price, 4000);
        assert_eq!(
            config.fred.series,
            vec![
                SeriesSpec::new("NVLPOP", "population"),
                SeriesSpec::new("NASH947PCPI", "income"),
            ]
        );
        assert_eq!(config.tables.for_sale, "listings");
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let result = EtlConfig::from_lookup(|key| match key {
            "FRED_API_KEY" => Some("fred-key".to_string()),
            _ => None,
        });
        let err = result.unwrap_err();
        assert!(err.to_string().contains("RAPID_API_KEY"));
    }

    #[test]
    fn test_blank_values_count_as_unset() {
        let result = load(&[("RAPID_API_KEY", "   ")]);
        assert!(result.is_err());

        let config = load(&[("ETL_MAX_PAGES", "")]).unwrap();
        assert_eq!(config.fetch.max_pages, DEFAULT_MAX_PAGES);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("ETL_MAX_PAGES", "many")]),
            Err(BnaError::InvalidValue { .. })
        ));
        assert!(load(&[("ETL_MAX_PAGES", "0")]).is_err());
        assert!(load(&[("ETL_RETRY_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("ETL_RETRY_JITTER", "2.0")]).is_err());
        assert!(load(&[("ETL_RETRY_BASE_DELAY_MS", "90000")]).is_err());
        assert!(load(&[("ZILLOW_FORSALE_MIN_PRICE", "900000")]).is_err());
        assert!(load(&[("ZILLOW_BOUNDS", "-86.3,36.5,-87.2,35.8")]).is_err());
        assert!(load(&[("FRED_SERIES", "broken")]).is_err());
        assert!(load(&[("FRED_PAGE_SIZE", "0")]).is_err());
        assert!(load(&[("DATABASE_URL", " ")]).is_ok());
    }

    #[test]
    fn test_table_names_are_checked() {
        assert!(load(&[("TABLE_RENTALS", "rentals; DROP TABLE x")]).is_err());
        assert!(load(&[("TABLE_RENTALS", "bna_forsale")]).is_err());
    }

    #[test]
    fn test_polygon_ring_is_closed() {
        let ring = GeoBounds::NASHVILLE.polygon();
        let points: Vec<&str> = ring.split(", ").collect();
        assert_eq!(points.len(), 5);
        assert_eq!(points.first(), points.last());
        assert_eq!(points[0], "-87.2316 36.5227");
        assert_eq!(points[2], "-86.3316 35.8027");
    }

    #[test]
    fn test_unique_series_keeps_last_name() {
        let config = load(&[]).unwrap();
        let unique = config.fred.unique_series();

        assert_eq!(unique.len(), 7);
        let median = unique
            .iter()
            .find(|s| s.series_id == "MEDLISPRI34980")
            .unwrap();
        assert_eq!(median.metric_name, "median_listing_price_change");
    }

    #[test]
    fn test_observation_window() {
        let config = load(&[("FRED_YEARS_HISTORICAL", "1")]).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let (start, end) = config.fred.observation_window(today);
        assert_eq!(end, today);
        assert_eq!(start, NaiveDate::from_ymd_opt(2023, 7, 1).unwrap());
    }

    #[test]
    fn test_api_keys_are_redacted() {
        let config = load(&[]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("rapid-key"));
        assert!(!debug.contains("fred-key"));
    }

    #[test]
    fn test_storage_only_needs_no_api_keys() {
        let (db, tables) = EtlConfig::storage_from_lookup(|_| None).unwrap();
        assert_eq!(db.url, DEFAULT_DATABASE_URL);
        assert_eq!(tables.runs, "etl_runs");
    }
}
