use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Logical catalog fields a tenant maps onto its own sheet column names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    Sku,
    OfferName,
    Link,
    CurrentPrice,
    FloorPrice,
    MarketReferencePrice,
    BestPriceHolder,
    Note,
}

impl Field {
    /// Column order used when a listing is seeded from the market report.
    pub const ALL: [Field; 8] = [
        Field::Sku,
        Field::OfferName,
        Field::Link,
        Field::CurrentPrice,
        Field::FloorPrice,
        Field::MarketReferencePrice,
        Field::BestPriceHolder,
        Field::Note,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    #[serde(default = "default_sku")]
    pub sku: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_link")]
    pub link: String,
    #[serde(default = "default_price")]
    pub price: String,
    #[serde(default = "default_stop")]
    pub stop: String,
    #[serde(default = "default_mp_on_market")]
    pub mp_on_market: String,
    #[serde(default = "default_market_with_mp")]
    pub market_with_mp: String,
    #[serde(default = "default_note")]
    pub note: String,
}

fn default_sku() -> String {
    "SHOP_SKU".to_string()
}
fn default_name() -> String {
    "OFFER".to_string()
}
fn default_link() -> String {
    "LINK".to_string()
}
fn default_price() -> String {
    "MERCH_PRICE_WITH_PROMOS".to_string()
}
fn default_stop() -> String {
    "STOP".to_string()
}
fn default_mp_on_market() -> String {
    "PRICE.1".to_string()
}
fn default_market_with_mp() -> String {
    "SHOP_WITH_BEST_PRICE_ON_MARKET".to_string()
}
fn default_note() -> String {
    "PRIM".to_string()
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            sku: default_sku(),
            name: default_name(),
            link: default_link(),
            price: default_price(),
            stop: default_stop(),
            mp_on_market: default_mp_on_market(),
            market_with_mp: default_market_with_mp(),
            note: default_note(),
        }
    }
}

impl ColumnMap {
    pub fn column(&self, field: Field) -> &str {
        match field {
            Field::Sku => &self.sku,
            Field::OfferName => &self.name,
            Field::Link => &self.link,
            Field::CurrentPrice => &self.price,
            Field::FloorPrice => &self.stop,
            Field::MarketReferencePrice => &self.mp_on_market,
            Field::BestPriceHolder => &self.market_with_mp,
            Field::Note => &self.note,
        }
    }

    pub fn field_for(&self, header: &str) -> Option<Field> {
        Field::ALL.into_iter().find(|f| self.column(*f) == header)
    }

    pub fn columns(&self) -> Vec<String> {
        Field::ALL.iter().map(|f| self.column(*f).to_string()).collect()
    }
}

/// Seller SKU key: trimmed, and stripped of leading zeros when purely numeric.
pub fn normalize_sku(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        let stripped = trimmed.trim_start_matches('0');
        if stripped.is_empty() {
            "0".to_string()
        } else {
            stripped.to_string()
        }
    } else {
        trimmed.to_string()
    }
}

/// One catalog line. Price cells keep their sheet text; they are only parsed
/// when a decision is made, so malformed values survive to the write-back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub sku: String,
    pub offer_name: String,
    pub link: String,
    pub current_price: String,
    pub floor_price: String,
    pub market_reference_price: String,
    pub best_price_holder: String,
    pub note: String,
    /// Unmapped own-listing columns, carried through untouched.
    pub extra: HashMap<String, String>,
}

impl CatalogRow {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Sku => &self.sku,
            Field::OfferName => &self.offer_name,
            Field::Link => &self.link,
            Field::CurrentPrice => &self.current_price,
            Field::FloorPrice => &self.floor_price,
            Field::MarketReferencePrice => &self.market_reference_price,
            Field::BestPriceHolder => &self.best_price_holder,
            Field::Note => &self.note,
        }
    }

    pub fn set(&mut self, field: Field, value: String) {
        match field {
            Field::Sku => self.sku = value,
            Field::OfferName => self.offer_name = value,
            Field::Link => self.link = value,
            Field::CurrentPrice => self.current_price = value,
            Field::FloorPrice => self.floor_price = value,
            Field::MarketReferencePrice => self.market_reference_price = value,
            Field::BestPriceHolder => self.best_price_holder = value,
            Field::Note => self.note = value,
        }
    }

    /// Value for a sheet header, whether mapped or carried in `extra`.
    pub fn cell(&self, header: &str, columns: &ColumnMap) -> String {
        match columns.field_for(header) {
            Some(field) => self.get(field).to_string(),
            None => self.extra.get(header).cloned().unwrap_or_default(),
        }
    }
}

/// Output of the merger: rows plus the header order to write them back with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledSet {
    pub headers: Vec<String>,
    pub rows: Vec<CatalogRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exclusion {
    EmptyFloor,
    DataQuality,
    ConditionsNotMet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Changed,
    Unchanged,
    Excluded(Exclusion),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceDecision {
    pub sku: String,
    pub old_price: Option<f64>,
    /// Equal to `old_price` unless the outcome is `Changed`.
    pub new_price: Option<f64>,
    pub market_reference_price: Option<f64>,
    pub floor_price: Option<f64>,
    pub outcome: Outcome,
    pub reason: String,
    /// Present only when the price changed.
    pub discount_base: Option<i64>,
}

impl PriceDecision {
    pub fn is_changed(&self) -> bool {
        self.outcome == Outcome::Changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    Successful,
    Failed,
}

impl AuditKind {
    pub fn for_decision(decision: &PriceDecision) -> Self {
        if decision.is_changed() {
            AuditKind::Successful
        } else {
            AuditKind::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sku: String,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    pub market_reference_price: Option<f64>,
    pub floor_price: Option<f64>,
    pub discount_base: Option<i64>,
    pub best_price_holder: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub tenant: String,
    pub market: String,
}

impl AuditEntry {
    pub fn from_decision(
        row: &CatalogRow,
        decision: &PriceDecision,
        tenant: &str,
        market: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sku: decision.sku.clone(),
            old_price: decision.old_price,
            new_price: decision.new_price,
            market_reference_price: decision.market_reference_price,
            floor_price: decision.floor_price,
            discount_base: decision.discount_base,
            best_price_holder: row.best_price_holder.clone(),
            reason: decision.reason.clone(),
            timestamp,
            tenant: tenant.to_string(),
            market: market.to_string(),
        }
    }
}

/// One outbound price update. `discount_base` is kept as text because it may
/// come from a sheet cell; it is coerced to an integer when the payload is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub offer_id: String,
    pub new_price: f64,
    pub discount_base: String,
}

impl DispatchRequest {
    pub fn from_decision(decision: &PriceDecision) -> Option<Self> {
        if !decision.is_changed() {
            return None;
        }
        Some(Self {
            offer_id: decision.sku.clone(),
            new_price: decision.new_price?,
            discount_base: decision
                .discount_base
                .map(|d| d.to_string())
                .unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    Sent,
    DryRun,
    BusinessError(String),
    TransportError { status: u16, body: String },
    NetworkError(String),
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Sent | DispatchOutcome::DryRun)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub offer_id: String,
    pub outcome: DispatchOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub tenant: String,
    pub market: String,
    pub rows_processed: usize,
    pub rows_changed: usize,
    pub rows_not_changed: usize,
    pub dispatched_ok: usize,
    pub dispatch_failed: usize,
    pub seeded: bool,
    pub duration: Duration,
}
