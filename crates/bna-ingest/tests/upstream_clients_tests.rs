//! Upstream client tests against a mock HTTP server
//!
//! These tests validate:
//! - Request shape (headers, query parameters, pagination offsets)
//! - Response parsing (`props`/`totalPages`, `observations`/`count`)
//! - Retry classification of 5xx and 4xx responses
//! - A full run wired from configuration

mod common;

use bna_ingest::config::{
    ApiKey, EtlConfig, FredConfig, GeoBounds, SearchFilters, SeriesSpec, ZillowConfig,
};
use bna_ingest::error::{ErrorKind, FetchError};
use bna_ingest::fetch::{
    http_client, FetchOutcome, FredSeries, ListingKind, PageSource, ZillowSearch,
};
use bna_ingest::orchestrator::{DataSource, EtlOrchestrator, SourceStatus};
use bna_ingest::storage::TableName;
use bna_ingest::{ListingRecord, MetricRecord, RentalUnitRecord};
use chrono::NaiveDate;
use common::{fast_fetcher, init_tracing, observation, prop};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn zillow_config(base_url: &str) -> ZillowConfig {
    ZillowConfig {
        api_key: ApiKey::new("zillow-test-key"),
        base_url: base_url.to_string(),
        host: "zillow.test".to_string(),
        bounds: GeoBounds::NASHVILLE,
        for_sale: SearchFilters::for_sale_defaults(),
        rentals: SearchFilters::rental_defaults(),
    }
}

fn fred_config(base_url: &str, page_size: u32) -> FredConfig {
    FredConfig {
        api_key: ApiKey::new("fred-test-key"),
        base_url: base_url.to_string(),
        series: vec![SeriesSpec::new("ACTLISCOU34980", "active_listings")],
        years_historical: 15,
        page_size,
    }
}

fn client() -> reqwest::Client {
    http_client(Duration::from_secs(5)).unwrap()
}

fn window() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2011, 10, 19).unwrap(),
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
    )
}

#[tokio::test]
async fn test_zillow_request_shape() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/propertyByPolygon"))
        .and(header("x-rapidapi-key", "zillow-test-key"))
        .and(header("x-rapidapi-host", "zillow.test"))
        .and(query_param("status_type", "ForSale"))
        .and(query_param("page", "1"))
        .and(query_param("minPrice", "100000"))
        .and(query_param("maxPrice", "700000"))
        .and(query_param("buildYearMin", "1990"))
        .and(query_param("polygon", GeoBounds::NASHVILLE.polygon().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "props": [prop("1", 350000.0, "1 Main St"), prop("2", 410000.0, "2 Main St")],
            "resultsPerPage": 41,
            "totalPages": 3,
            "totalResultCount": 92
        })))
        .expect(1)
        .mount(&server)
        .await;

    let search = ZillowSearch::new(client(), &zillow_config(&server.uri()), ListingKind::ForSale);
    assert_eq!(search.name(), "zillow:ForSale");

    let page = search.fetch_page(1).await.unwrap();
    assert_eq!(page.number, 1);
    assert_eq!(page.records.len(), 2);
    assert_eq!(page.total_pages, Some(3));
    assert!(!page.is_last());
}

#[tokio::test]
async fn test_zillow_missing_props_is_an_empty_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/propertyByPolygon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "totalResultCount": 0 })))
        .mount(&server)
        .await;

    let search = ZillowSearch::new(client(), &zillow_config(&server.uri()), ListingKind::ForRent);
    let page = search.fetch_page(4).await.unwrap();
    assert!(page.records.is_empty());
    assert_eq!(page.total_pages, None);
}

#[tokio::test]
async fn test_zillow_non_array_props_is_a_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/propertyByPolygon"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "props": "none" })))
        .mount(&server)
        .await;

    let search = ZillowSearch::new(client(), &zillow_config(&server.uri()), ListingKind::ForSale);
    let err = search.fetch_page(1).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn test_zillow_pagination_stops_at_last_page() {
    init_tracing();
    let server = MockServer::start().await;

    for page in 1..=2 {
        Mock::given(method("GET"))
            .and(path("/propertyByPolygon"))
            .and(query_param("page", page.to_string().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "props": [prop(&format!("p{page}"), 250000.0, "Demonbreun St")],
                "totalPages": 2
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let search = ZillowSearch::new(client(), &zillow_config(&server.uri()), ListingKind::ForSale);
    let batch = fast_fetcher(3).fetch_all(&search).await;
    assert_eq!(batch.outcome, FetchOutcome::LastPage);
    assert_eq!(batch.pages.len(), 2);
    assert_eq!(batch.record_count(), 2);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/propertyByPolygon"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .expect(3)
        .mount(&server)
        .await;

    let search = ZillowSearch::new(client(), &zillow_config(&server.uri()), ListingKind::ForSale);
    let batch = fast_fetcher(3).fetch_all(&search).await;

    assert!(batch.is_empty());
    match batch.outcome {
        FetchOutcome::Aborted {
            page,
            attempts,
            kind,
            ..
        } => {
            assert_eq!(page, 1);
            assert_eq!(attempts, 3);
            assert_eq!(kind, ErrorKind::TransientFetch);
        },
        other => panic!("expected abort, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/propertyByPolygon"))
        .respond_with(ResponseTemplate::new(403).set_body_string("invalid key"))
        .expect(1)
        .mount(&server)
        .await;

    let search = ZillowSearch::new(client(), &zillow_config(&server.uri()), ListingKind::ForSale);
    let err = search.fetch_page(1).await.unwrap_err();
    assert!(matches!(err, FetchError::Rejected { status: 403, .. }), "got {err:?}");

    let batch = fast_fetcher(5).fetch_all(&search).await;
    assert!(matches!(
        batch.outcome,
        FetchOutcome::Aborted {
            attempts: 1,
            kind: ErrorKind::TerminalFetch,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fred_request_shape_and_offsets() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .and(query_param("series_id", "ACTLISCOU34980"))
        .and(query_param("api_key", "fred-test-key"))
        .and(query_param("file_type", "json"))
        .and(query_param("observation_start", "2011-10-19"))
        .and(query_param("observation_end", "2026-10-16"))
        .and(query_param("limit", "2"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 3,
            "offset": 0,
            "limit": 2,
            "observations": [observation("2024-01-01", "5210"), observation("2024-02-01", "5388")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .and(query_param("offset", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 3,
            "offset": 2,
            "limit": 2,
            "observations": [observation("2024-03-01", ".")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = fred_config(&server.uri(), 2);
    let series = FredSeries::new(client(), &config, config.series[0].clone(), window());
    assert_eq!(series.name(), "fred:ACTLISCOU34980");

    let batch = fast_fetcher(2).fetch_all(&series).await;
    assert_eq!(batch.outcome, FetchOutcome::LastPage);
    assert_eq!(batch.pages.len(), 2);
    assert_eq!(batch.pages[0].total_pages, Some(2));
    assert_eq!(batch.record_count(), 3);
}

#[tokio::test]
async fn test_full_run_from_configuration() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zillow/propertyByPolygon"))
        .and(query_param("status_type", "ForSale"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "props": [prop("111", 300000.0, "111 Broadway"), prop("222", 200000.0, "222 Broadway")],
            "totalPages": 1
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/zillow/propertyByPolygon"))
        .and(query_param("status_type", "ForRent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "props": [{
                "zpid": "555",
                "address": "555 Church St",
                "units": "[{'beds': 1, 'price': '$1,650'}, {'beds': 2, 'price': '$2,100'}]"
            }],
            "totalPages": 1
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/fred/series/observations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "observations": [observation("2024-01-01", "1.5"), observation("2024-02-01", "2.5")]
        })))
        .mount(&server)
        .await;

    let vars: HashMap<&str, String> = HashMap::from([
        ("RAPID_API_KEY", "zillow-test-key".to_string()),
        ("FRED_API_KEY", "fred-test-key".to_string()),
        ("ZILLOW_BASE_URL", format!("{}/zillow", server.uri())),
        ("FRED_BASE_URL", format!("{}/fred", server.uri())),
        ("FRED_SERIES", "median_price:MEDLISPRI34980".to_string()),
        ("DATABASE_URL", "sqlite::memory:".to_string()),
        ("ETL_PAGE_DELAY_MS", "0".to_string()),
        ("ETL_RETRY_BASE_DELAY_MS", "0".to_string()),
        ("ETL_RETRY_MAX_DELAY_MS", "0".to_string()),
    ]);
    let config = EtlConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

    let orchestrator = EtlOrchestrator::from_config(&config).await.unwrap();
    let summary = orchestrator.run_all(&DataSource::ALL, false).await;

    assert!(!summary.has_failures(), "{summary:?}");
    for report in &summary.reports {
        assert_eq!(report.status, SourceStatus::Success, "{report:?}");
    }

    let storage = orchestrator.storage();
    let for_sale = storage
        .load_all::<ListingRecord>(&TableName::new("bna_forsale").unwrap())
        .await
        .unwrap();
    assert_eq!(for_sale.len(), 2);

    let rentals = storage
        .load_all::<RentalUnitRecord>(&TableName::new("bna_rentals").unwrap())
        .await
        .unwrap();
    assert_eq!(rentals.len(), 2);
    // the parent had no price of its own
    assert!(rentals.iter().all(|r| r.listing.price == 1650.0));

    let metrics = storage
        .load_all::<MetricRecord>(&TableName::new("bna_fred_metrics").unwrap())
        .await
        .unwrap();
    assert_eq!(metrics.len(), 2);
    assert!(metrics.iter().all(|m| m.metric_name == "median_price"));

    let runs = storage
        .recent_runs(&TableName::new("etl_runs").unwrap(), 10)
        .await
        .unwrap();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|r| r.status == "success"));
}
