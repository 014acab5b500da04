use crate::domain::dataset::Dataset;
use crate::domain::ports::MarketReportSource;
use crate::utils::error::{RepricerError, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::{debug, info, warn};

const SOURCE_NAME: &str = "market report";
const CREATION_DATE_FROM: &str = "01-01-2023";

#[derive(Debug, Clone, PartialEq)]
pub struct ReportClientSettings {
    pub base_url: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub request_timeout: Duration,
}

impl Default for ReportClientSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.partner.market.yandex.ru".to_string(),
            poll_interval: Duration::from_secs(10),
            max_polls: 60,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedReport {
    report_id: String,
    estimated_generation_time: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReportInfo {
    status: String,
    sub_status: Option<String>,
    file: Option<String>,
}

/// Generates, polls and downloads the marketplace prices report.
#[derive(Debug, Clone)]
pub struct YandexReportClient {
    client: Client,
    settings: ReportClientSettings,
}

impl YandexReportClient {
    pub fn new(settings: ReportClientSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;
        Ok(Self { client, settings })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn read_ok(response: reqwest::Response, step: &str) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        debug!("{} response {}: {}", step, status, body);
        if status != StatusCode::OK {
            return Err(RepricerError::source_fetch(
                SOURCE_NAME,
                format!("{} returned {}: {}", step, status, body),
            ));
        }
        Ok(body)
    }

    async fn generate(&self, api_key: &str, business_id: &str) -> Result<String> {
        let business_id_value = business_id
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(business_id));
        let body = json!({
            "businessId": business_id_value,
            "categoryIds": [],
            "creationDateFrom": CREATION_DATE_FROM,
            "creationDateTo": chrono::Local::now().format("%d-%m-%Y").to_string(),
        });

        info!("📝 Requesting price report for business {}", business_id);
        let response = self
            .client
            .post(self.url("/reports/prices/generate"))
            .query(&[("format", "CSV")])
            .header("Api-Key", api_key)
            .json(&body)
            .send()
            .await?;
        let text = Self::read_ok(response, "report generation").await?;

        let envelope: Envelope<GeneratedReport> = serde_json::from_str(&text)?;
        let report = envelope.result.ok_or_else(|| {
            RepricerError::source_fetch(SOURCE_NAME, "generation response has no result")
        })?;
        if let Some(ms) = report.estimated_generation_time {
            info!(
                "Report {} started, estimated generation time {:.1}s",
                report.report_id,
                ms as f64 / 1000.0
            );
        }
        Ok(report.report_id)
    }

    async fn wait_for_file(&self, api_key: &str, report_id: &str) -> Result<String> {
        for attempt in 1..=self.settings.max_polls {
            tokio::time::sleep(self.settings.poll_interval).await;

            let response = self
                .client
                .get(self.url(&format!("/reports/info/{}", report_id)))
                .header("Api-Key", api_key)
                .send()
                .await?;
            let text = Self::read_ok(response, "report status").await?;
            let envelope: Envelope<ReportInfo> = serde_json::from_str(&text)?;
            let info = envelope.result.ok_or_else(|| {
                RepricerError::source_fetch(SOURCE_NAME, "status response has no result")
            })?;

            debug!("Report {} status {} (poll {})", report_id, info.status, attempt);
            match info.status.as_str() {
                "DONE" => {
                    return info.file.ok_or_else(|| {
                        RepricerError::source_fetch(SOURCE_NAME, "finished report has no file URL")
                    })
                }
                "FAILED" | "NO_DATA" => {
                    warn!(
                        "Report {} ended with {} ({})",
                        report_id,
                        info.status,
                        info.sub_status.as_deref().unwrap_or("no sub-status")
                    );
                    return Err(RepricerError::ReportGenerationFailure {
                        status: info.status,
                        sub_status: info.sub_status,
                    });
                }
                _ => {}
            }
        }

        Err(RepricerError::ReportGenerationFailure {
            status: "TIMEOUT".to_string(),
            sub_status: Some(format!("not ready after {} polls", self.settings.max_polls)),
        })
    }

    async fn download(&self, api_key: &str, file_url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(file_url)
            .header("Authorization", format!("OAuth {}", api_key))
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RepricerError::source_fetch(
                SOURCE_NAME,
                format!("report download returned {}", status),
            ));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Parses the first file of a zipped CSV report.
pub fn dataset_from_zip(bytes: &[u8]) -> Result<Dataset> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() == 0 {
        return Err(RepricerError::source_fetch(SOURCE_NAME, "report archive is empty"));
    }

    let mut entry = archive.by_index(0)?;
    debug!("Reading report entry {}", entry.name());
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    Dataset::from_csv_reader(content.as_slice())
}

impl MarketReportSource for YandexReportClient {
    async fn fetch_market_report(&self, api_key: &str, business_id: &str) -> Result<Dataset> {
        let report_id = self.generate(api_key, business_id).await?;
        let file_url = self.wait_for_file(api_key, &report_id).await?;
        let bytes = self.download(api_key, &file_url).await?;

        let dataset = tokio::task::spawn_blocking(move || dataset_from_zip(&bytes)).await??;
        info!(
            "📥 Market report downloaded: {} rows, {} columns",
            dataset.len(),
            dataset.headers.len()
        );
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zipped_csv(csv: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("prices.csv", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(csv.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn client(server: &MockServer, max_polls: u32) -> YandexReportClient {
        YandexReportClient::new(ReportClientSettings {
            base_url: server.base_url(),
            poll_interval: Duration::from_millis(5),
            max_polls,
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn mock_generate(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST)
                .path("/reports/prices/generate")
                .query_param("format", "CSV")
                .header("Api-Key", "key");
            then.status(200).json_body(json!({
                "status": "OK",
                "result": {"reportId": "r-1", "estimatedGenerationTime": 2000}
            }));
        });
    }

    #[test]
    fn test_zip_report_with_duplicate_price_columns() {
        let bytes = zipped_csv("SHOP_SKU,PRICE,PRICE\n123,150,120\n");
        let dataset = dataset_from_zip(&bytes).unwrap();

        assert_eq!(dataset.headers, vec!["SHOP_SKU", "PRICE", "PRICE.1"]);
        assert_eq!(dataset.rows[0], vec!["123", "150", "120"]);
    }

    #[tokio::test]
    async fn test_fetch_generates_polls_and_downloads() {
        let server = MockServer::start();
        mock_generate(&server);
        let file_url = server.url("/files/r-1.zip");
        let info = server.mock(|when, then| {
            when.method(GET).path("/reports/info/r-1");
            then.status(200).json_body(json!({
                "status": "OK",
                "result": {"status": "DONE", "file": file_url}
            }));
        });
        let download = server.mock(|when, then| {
            when.method(GET)
                .path("/files/r-1.zip")
                .header("Authorization", "OAuth key");
            then.status(200)
                .body(zipped_csv("SHOP_SKU,OFFER,PRICE\n00123,Disk,120\n"));
        });

        let dataset = client(&server, 3)
            .fetch_market_report("key", "76443469")
            .await
            .unwrap();

        info.assert();
        download.assert();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.cell(0, 0), "00123");
    }

    #[tokio::test]
    async fn test_failed_report_surfaces_status() {
        let server = MockServer::start();
        mock_generate(&server);
        server.mock(|when, then| {
            when.method(GET).path("/reports/info/r-1");
            then.status(200).json_body(json!({
                "result": {"status": "NO_DATA", "subStatus": "EMPTY_CATALOG"}
            }));
        });

        let err = client(&server, 3)
            .fetch_market_report("key", "1")
            .await
            .unwrap_err();

        match err {
            RepricerError::ReportGenerationFailure { status, sub_status } => {
                assert_eq!(status, "NO_DATA");
                assert_eq!(sub_status.as_deref(), Some("EMPTY_CATALOG"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_report_that_never_finishes_times_out() {
        let server = MockServer::start();
        mock_generate(&server);
        let info = server.mock(|when, then| {
            when.method(GET).path("/reports/info/r-1");
            then.status(200)
                .json_body(json!({"result": {"status": "PROCESSING"}}));
        });

        let err = client(&server, 2)
            .fetch_market_report("key", "1")
            .await
            .unwrap_err();

        info.assert_hits(2);
        assert!(matches!(
            err,
            RepricerError::ReportGenerationFailure { ref status, .. } if status == "TIMEOUT"
        ));
    }

    #[tokio::test]
    async fn test_generation_rejected_is_source_fetch_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/reports/prices/generate");
            then.status(401).body("unauthorized");
        });

        let err = client(&server, 1)
            .fetch_market_report("key", "1")
            .await
            .unwrap_err();
        assert!(matches!(err, RepricerError::SourceFetchError { .. }));
    }
}
