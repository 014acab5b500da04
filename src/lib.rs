pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::cli::CliConfig;

pub use adapters::{CsvSheetStore, HttpPricingEndpoint, YandexReportClient};
pub use config::{AppConfig, TenantConfig, TenantSettings};
pub use core::{
    audit::AuditStore,
    cycle::{CycleOptions, RepricingPipeline, Services},
    etl::EtlEngine,
    scheduler::run_tenants,
    workers::CpuPool,
};
pub use utils::error::{RepricerError, Result};
