// Adapters layer: concrete implementations of the domain ports.

pub mod market_report;
pub mod pricing_api;
pub mod sheets;

pub use market_report::{ReportClientSettings, YandexReportClient};
pub use pricing_api::HttpPricingEndpoint;
pub use sheets::CsvSheetStore;
