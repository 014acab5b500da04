use anyhow::Result;
use httpmock::prelude::*;
use repricer::adapters::ReportClientSettings;
use repricer::core::decision::EligibilityMode;
use repricer::core::dispatch::DispatchSettings;
use repricer::core::merge::SeedPlaceholders;
use repricer::domain::model::{AuditKind, ColumnMap};
use repricer::domain::ports::SheetStore;
use repricer::utils::error::ErrorCategory;
use repricer::{
    AuditStore, CpuPool, CsvSheetStore, CycleOptions, EtlEngine, HttpPricingEndpoint,
    RepricingPipeline, Services, TenantConfig, YandexReportClient,
};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

const OWN_LISTING: &str = "\
SHOP_SKU,OFFER,LINK,MERCH_PRICE_WITH_PROMOS,STOP,PRICE.1,SHOP_WITH_BEST_PRICE_ON_MARKET,PRIM,COMMENT
00123,Disk,https://shop/123,150,100,,,,keep
456,Fan,https://shop/456,150,100,,,,
789,Cable,https://shop/789,150,,,,,
";

const MARKET_REPORT: &str = "\
SHOP_SKU,OFFER,MERCH_PRICE_WITH_PROMOS,SHOP_WITH_BEST_PRICE_ON_MARKET,PRICE,PRICE
123,Disk,150,competitor,150,120
456,Fan,150,MyShop,150,120
789,Cable,150,competitor,150,120
";

type TestServices = Services<CsvSheetStore, YandexReportClient, HttpPricingEndpoint>;

fn zipped(csv: &str) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("report.csv", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(csv.as_bytes()).unwrap();
    writer.finish().unwrap().into_inner()
}

fn tenant() -> TenantConfig {
    TenantConfig {
        tenant_id: Some("acme".to_string()),
        spreadsheet_id: Some("sheet-1".to_string()),
        interval_minutes: Some(15.0),
        api_key: Some("key".to_string()),
        business_id: Some("777".to_string()),
        report_range: Some("Listing".to_string()),
        market_name: Some("YandexMarket".to_string()),
        min_delta: Some(10),
        max_delta: Some(50),
        own_shops: Some("MyShop, Outlet".to_string()),
        ..Default::default()
    }
}

fn services(server: &MockServer, root: &Path, dry_run: bool) -> Result<TestServices> {
    Ok(Services {
        sheets: Arc::new(CsvSheetStore::new(root.join("sheets"))),
        reports: Arc::new(YandexReportClient::new(ReportClientSettings {
            base_url: server.base_url(),
            poll_interval: Duration::from_millis(10),
            max_polls: 3,
            request_timeout: Duration::from_secs(5),
        })?),
        endpoint: Arc::new(HttpPricingEndpoint::new(
            server.base_url(),
            Duration::from_secs(5),
        )?),
        pool: CpuPool::new(2),
        options: Arc::new(CycleOptions {
            columns: ColumnMap::default(),
            report_keep: [
                "SHOP_SKU",
                "OFFER",
                "MERCH_PRICE_WITH_PROMOS",
                "SHOP_WITH_BEST_PRICE_ON_MARKET",
                "PRICE.1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            numeric_columns: vec![
                "MERCH_PRICE_WITH_PROMOS".to_string(),
                "STOP".to_string(),
                "PRICE.1".to_string(),
            ],
            seed: SeedPlaceholders::default(),
            audit_dir: root.join("databases"),
            eligibility: EligibilityMode::Strict,
        }),
        dispatch: DispatchSettings {
            max_in_flight: 4,
            pacing: Duration::from_millis(1),
            dry_run,
        },
    })
}

fn mock_report(server: &MockServer, csv: &str) {
    let file_url = server.url("/download/report.zip");
    server.mock(|when, then| {
        when.method(POST).path("/reports/prices/generate");
        then.status(200)
            .json_body(serde_json::json!({"result": {"reportId": "r-9", "estimatedGenerationTime": 100}}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/reports/info/r-9");
        then.status(200)
            .json_body(serde_json::json!({"result": {"status": "DONE", "file": file_url}}));
    });
    let body = zipped(csv);
    server.mock(|when, then| {
        when.method(GET).path("/download/report.zip");
        then.status(200).body(body);
    });
}

async fn write_own_listing(root: &Path, csv: &str) -> Result<()> {
    let dir = root.join("sheets").join("sheet-1");
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join("Listing.csv"), csv).await?;
    Ok(())
}

#[tokio::test]
async fn test_full_cycle_audits_dispatches_and_writes_back() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start();
    mock_report(&server, MARKET_REPORT);
    let pricing = server.mock(|when, then| {
        when.method(POST)
            .path("/businesses/777/offer-prices/updates")
            .header("Api-Key", "key");
        then.status(200).json_body(serde_json::json!({"status": "OK"}));
    });
    write_own_listing(temp_dir.path(), OWN_LISTING).await?;

    let services = services(&server, temp_dir.path(), false)?;
    let pipeline = RepricingPipeline::new(tenant().resolve()?, services.clone(), 11);
    let report = EtlEngine::new(pipeline).run().await?;

    assert_eq!(report.rows_processed, 3);
    assert_eq!(report.rows_changed, 1);
    assert_eq!(report.rows_not_changed, 2);
    assert_eq!(report.dispatched_ok, 1);
    assert_eq!(report.dispatch_failed, 0);
    assert!(!report.seeded);
    pricing.assert_hits(1);

    let store = AuditStore::open_for(temp_dir.path().join("databases"), "acme", "YandexMarket")?;
    let changed = store.recent(AuditKind::Successful, 10)?;
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0].sku, "123");
    let new_price = changed[0].new_price.unwrap();
    assert!((110.0..=119.0).contains(&new_price));

    let failed = store.recent(AuditKind::Failed, 10)?;
    assert_eq!(failed.len(), 2);
    let empty_floor = failed.iter().find(|e| e.sku == "789").unwrap();
    assert_eq!(empty_floor.reason, "empty floor price");
    let own_shop = failed.iter().find(|e| e.sku == "456").unwrap();
    assert!(own_shop.reason.contains("already holds the minimum market price"));

    let sheets = services.sheets.clone();
    let merged = sheets.fetch("sheet-1", "Listing_merged").await?;
    let finished = sheets.fetch("sheet-1", "Listing_final").await?;
    assert_eq!(merged.len(), 3);
    assert_eq!(finished.headers, merged.headers);

    let price_col = finished.column_index("MERCH_PRICE_WITH_PROMOS").unwrap();
    let note_col = finished.column_index("PRIM").unwrap();
    let comment_col = finished.column_index("COMMENT").unwrap();
    assert_eq!(finished.cell(0, 0), "123");
    assert_eq!(finished.cell(0, price_col), format!("{}", new_price as i64));
    assert!(finished.cell(0, note_col).starts_with("Price changed"));
    assert_eq!(finished.cell(0, comment_col), "keep");
    assert_eq!(merged.cell(0, price_col), "150");
    assert_eq!(finished.cell(2, note_col), "empty floor price");

    Ok(())
}

#[tokio::test]
async fn test_dry_run_sends_nothing_but_still_audits() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start();
    mock_report(&server, MARKET_REPORT);
    let pricing = server.mock(|when, then| {
        when.method(POST).path("/businesses/777/offer-prices/updates");
        then.status(200).json_body(serde_json::json!({"status": "OK"}));
    });
    write_own_listing(temp_dir.path(), OWN_LISTING).await?;

    let services = services(&server, temp_dir.path(), true)?;
    let pipeline = RepricingPipeline::new(tenant().resolve()?, services, 11);
    let report = EtlEngine::new(pipeline).run().await?;

    pricing.assert_hits(0);
    assert_eq!(report.dispatched_ok, 1);
    let store = AuditStore::open_for(temp_dir.path().join("databases"), "acme", "YandexMarket")?;
    assert_eq!(store.recent(AuditKind::Successful, 10)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_empty_listing_is_seeded_from_report() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start();
    mock_report(&server, MARKET_REPORT);
    let pricing = server.mock(|when, then| {
        when.method(POST).path("/businesses/777/offer-prices/updates");
        then.status(200);
    });

    let services = services(&server, temp_dir.path(), false)?;
    let pipeline = RepricingPipeline::new(tenant().resolve()?, services.clone(), 1);
    let report = EtlEngine::new(pipeline).run().await?;

    assert!(report.seeded);
    assert_eq!(report.rows_processed, 3);
    pricing.assert_hits(0);

    let seeded = services.sheets.fetch("sheet-1", "Listing").await?;
    assert_eq!(seeded.headers, ColumnMap::default().columns());
    assert_eq!(seeded.len(), 3);
    assert_eq!(seeded.cell(0, 0), "123");
    assert!(!temp_dir.path().join("databases").exists());
    Ok(())
}

#[tokio::test]
async fn test_report_failure_aborts_before_write_back() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/reports/prices/generate");
        then.status(503).body("maintenance");
    });
    write_own_listing(temp_dir.path(), OWN_LISTING).await?;

    let services = services(&server, temp_dir.path(), false)?;
    let pipeline = RepricingPipeline::new(tenant().resolve()?, services.clone(), 1);
    let err = EtlEngine::new(pipeline).run().await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::SourceFetch);
    assert!(!services
        .sheets
        .range_path("sheet-1", "Listing_merged")
        .exists());
    assert!(!services
        .sheets
        .range_path("sheet-1", "Listing_final")
        .exists());
    assert!(!temp_dir.path().join("databases").exists());
    Ok(())
}
