use crate::adapters::market_report::ReportClientSettings;
use crate::core::cycle::CycleOptions;
use crate::core::decision::{EligibilityMode, PricingPolicy};
use crate::core::dispatch::DispatchSettings;
use crate::core::merge::SeedPlaceholders;
use crate::domain::model::ColumnMap;
use crate::utils::error::{RepricerError, Result};
use crate::utils::validation::{self, require_text, Validate};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MIN_DELTA: i64 = 50;
pub const DEFAULT_MAX_DELTA: i64 = 200;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub market_api: MarketApiConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub columns: ColumnsConfig,
    #[serde(default)]
    pub seed: SeedPlaceholders,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: u64,
    #[serde(default = "default_cpu_workers")]
    pub cpu_workers: usize,
    #[serde(default = "default_audit_dir")]
    pub audit_dir: String,
    #[serde(default = "default_sheets_dir")]
    pub sheets_dir: String,
    /// Fixed RNG seed; unset means entropy-seeded.
    pub seed: Option<u64>,
    #[serde(default)]
    pub eligibility: EligibilityMode,
}

fn default_grace_period() -> u64 {
    30
}
fn default_cpu_workers() -> usize {
    4
}
fn default_audit_dir() -> String {
    "databases".to_string()
}
fn default_sheets_dir() -> String {
    "sheets".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            grace_period_seconds: default_grace_period(),
            cpu_workers: default_cpu_workers(),
            audit_dir: default_audit_dir(),
            sheets_dir: default_sheets_dir(),
            seed: None,
            eligibility: EligibilityMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_poll_interval")]
    pub report_poll_interval_seconds: u64,
    #[serde(default = "default_max_polls")]
    pub report_max_polls: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://api.partner.market.yandex.ru".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_max_polls() -> u32 {
    60
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for MarketApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            report_poll_interval_seconds: default_poll_interval(),
            report_max_polls: default_max_polls(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

fn default_max_in_flight() -> usize {
    4
}
fn default_pacing_ms() -> u64 {
    250
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnsConfig {
    #[serde(flatten)]
    pub map: ColumnMap,
    /// Market report columns kept before merging.
    #[serde(default = "default_report_keep")]
    pub report_keep: Vec<String>,
    /// Columns rewritten as numbers on write-back; defaults to the price columns.
    pub numeric: Option<Vec<String>>,
}

fn default_report_keep() -> Vec<String> {
    [
        "SHOP_SKU",
        "OFFER",
        "MAIN_PRICE",
        "MERCH_PRICE_WITH_PROMOS",
        "PRICE_GREEN_THRESHOLD",
        "PRICE_RED_THRESHOLD",
        "PRICE_WITH_PROMOS",
        "SHOP_WITH_BEST_PRICE_ON_MARKET",
        "PRICE.1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            map: ColumnMap::default(),
            report_keep: default_report_keep(),
            numeric: None,
        }
    }
}

impl ColumnsConfig {
    pub fn numeric_columns(&self) -> Vec<String> {
        self.numeric.clone().unwrap_or_else(|| {
            vec![
                self.map.price.clone(),
                self.map.stop.clone(),
                self.map.mp_on_market.clone(),
            ]
        })
    }
}

/// One tenant entry as written in the file. Fields stay optional here; they are
/// checked by [`TenantConfig::resolve`] at the start of every cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: Option<String>,
    pub spreadsheet_id: Option<String>,
    pub interval_minutes: Option<f64>,
    pub api_key: Option<String>,
    #[serde(default, deserialize_with = "string_or_integer")]
    pub business_id: Option<String>,
    pub report_range: Option<String>,
    pub market_name: Option<String>,
    pub min_delta: Option<i64>,
    pub max_delta: Option<i64>,
    /// Comma-separated names of the tenant's own shops.
    pub own_shops: Option<String>,
    pub merged_range: Option<String>,
    pub final_range: Option<String>,
}

fn string_or_integer<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    }))
}

/// Tenant entry with every required field present and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantSettings {
    pub tenant_id: String,
    pub spreadsheet_id: String,
    pub interval_minutes: f64,
    pub api_key: String,
    pub business_id: String,
    pub report_range: String,
    pub market_name: String,
    pub min_delta: i64,
    pub max_delta: i64,
    pub own_shops: Vec<String>,
    pub merged_range: String,
    pub final_range: String,
}

impl TenantSettings {
    pub fn policy(&self, eligibility: EligibilityMode) -> PricingPolicy {
        PricingPolicy::new(self.own_shops.clone(), self.min_delta, self.max_delta)
            .with_eligibility(eligibility)
    }
}

impl TenantConfig {
    /// Name used in logs, even for an entry that fails validation.
    pub fn label(&self) -> String {
        self.tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("<unnamed>")
            .to_string()
    }

    pub fn market_label(&self) -> String {
        self.market_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("<unknown>")
            .to_string()
    }

    /// Checks the entry and fills in defaults.
    pub fn resolve(&self) -> Result<TenantSettings> {
        let tenant_id = require_text("tenant_id", &self.tenant_id)?.to_string();
        let spreadsheet_id = require_text("spreadsheet_id", &self.spreadsheet_id)?.to_string();
        let api_key = require_text("api_key", &self.api_key)?.to_string();
        let business_id = require_text("business_id", &self.business_id)?.to_string();
        let report_range = require_text("report_range", &self.report_range)?.to_string();
        let market_name = require_text("market_name", &self.market_name)?.to_string();

        let interval_minutes = self
            .interval_minutes
            .ok_or_else(|| RepricerError::MissingConfigError {
                field: "interval_minutes".to_string(),
            })?;
        if !interval_minutes.is_finite() || interval_minutes <= 0.0 {
            return Err(RepricerError::InvalidConfigValueError {
                field: "interval_minutes".to_string(),
                value: interval_minutes.to_string(),
                reason: "Interval must be a positive number of minutes".to_string(),
            });
        }

        let min_delta = self.min_delta.unwrap_or(DEFAULT_MIN_DELTA);
        let max_delta = self.max_delta.unwrap_or(DEFAULT_MAX_DELTA);
        if min_delta < 0 {
            return Err(RepricerError::InvalidConfigValueError {
                field: "min_delta".to_string(),
                value: min_delta.to_string(),
                reason: "Delta cannot be negative".to_string(),
            });
        }
        if min_delta > max_delta {
            return Err(RepricerError::InvalidConfigValueError {
                field: "max_delta".to_string(),
                value: max_delta.to_string(),
                reason: format!("Must be at least min_delta ({})", min_delta),
            });
        }

        let own_shops = self
            .own_shops
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let optional_range = |value: &Option<String>, suffix: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{}", report_range, suffix))
        };
        let merged_range = optional_range(&self.merged_range, "merged");
        let final_range = optional_range(&self.final_range, "final");

        Ok(TenantSettings {
            tenant_id,
            spreadsheet_id,
            interval_minutes,
            api_key,
            business_id,
            report_range,
            market_name,
            min_delta,
            max_delta,
            own_shops,
            merged_range,
            final_range,
        })
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| RepricerError::ConfigError {
            message: format!("Cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;
        toml::from_str(&processed).map_err(|e| RepricerError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| RepricerError::ConfigError {
            message: format!("Invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });
        Ok(result.to_string())
    }

    pub fn report_client_settings(&self) -> ReportClientSettings {
        ReportClientSettings {
            base_url: self.market_api.base_url.clone(),
            poll_interval: Duration::from_secs(self.market_api.report_poll_interval_seconds),
            max_polls: self.market_api.report_max_polls,
            request_timeout: self.request_timeout(),
        }
    }

    pub fn dispatch_settings(&self, dry_run_override: bool) -> DispatchSettings {
        DispatchSettings {
            max_in_flight: self.dispatch.max_in_flight,
            pacing: Duration::from_millis(self.dispatch.pacing_ms),
            dry_run: self.runtime.dry_run || dry_run_override,
        }
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            columns: self.columns.map.clone(),
            report_keep: self.columns.report_keep.clone(),
            numeric_columns: self.columns.numeric_columns(),
            seed: self.seed.clone(),
            audit_dir: PathBuf::from(&self.runtime.audit_dir),
            eligibility: self.runtime.eligibility,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.market_api.request_timeout_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.runtime.grace_period_seconds)
    }
}

impl Validate for AppConfig {
    /// File-level checks only; tenant fields are checked per cycle.
    fn validate(&self) -> Result<()> {
        validation::validate_url("market_api.base_url", &self.market_api.base_url)?;
        validation::validate_path("runtime.audit_dir", &self.runtime.audit_dir)?;
        validation::validate_path("runtime.sheets_dir", &self.runtime.sheets_dir)?;
        validation::validate_range("runtime.cpu_workers", self.runtime.cpu_workers, 1, 64)?;
        validation::validate_range("dispatch.pacing_ms", self.dispatch.pacing_ms, 0, 60_000)?;
        validation::validate_positive_number("dispatch.max_in_flight", self.dispatch.max_in_flight, 1)?;
        validation::validate_positive_number(
            "market_api.report_max_polls",
            self.market_api.report_max_polls as usize,
            1,
        )?;
        validation::validate_non_empty_string("columns.sku", &self.columns.map.sku)?;

        if self.tenants.is_empty() {
            return Err(RepricerError::ConfigError {
                message: "No [[tenants]] configured".to_string(),
            });
        }
        Ok(())
    }
}
