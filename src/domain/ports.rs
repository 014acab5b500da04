use crate::domain::dataset::Dataset;
use crate::domain::model::{CycleReport, DispatchOutcome};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Spreadsheet collaborator: ranges of a spreadsheet read and written as datasets.
pub trait SheetStore: Send + Sync {
    /// An empty range reads as an empty dataset, not an error.
    fn fetch(
        &self,
        spreadsheet_id: &str,
        range: &str,
    ) -> impl std::future::Future<Output = Result<Dataset>> + Send;
    fn write(
        &self,
        spreadsheet_id: &str,
        range: &str,
        data: &Dataset,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Marketplace price report for one business account.
pub trait MarketReportSource: Send + Sync {
    fn fetch_market_report(
        &self,
        api_key: &str,
        business_id: &str,
    ) -> impl std::future::Future<Output = Result<Dataset>> + Send;
}

/// Credentials and account a batch of price updates is addressed to.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointTarget {
    #[serde(skip)]
    pub api_key: String,
    pub business_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPrice {
    pub value: f64,
    pub currency_id: String,
    pub discount_base: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferUpdate {
    pub offer_id: String,
    pub price: OfferPrice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceUpdatePayload {
    pub offers: Vec<OfferUpdate>,
}

/// Remote pricing endpoint. Implementations classify every failure into a
/// `DispatchOutcome` instead of returning an error, so one item never aborts a batch.
#[async_trait]
pub trait PricingEndpoint: Send + Sync + 'static {
    async fn update_price(
        &self,
        target: &EndpointTarget,
        payload: &PriceUpdatePayload,
    ) -> DispatchOutcome;
}

/// One tenant reconciliation cycle split into its three stages.
#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: Send;
    type Transformed: Send;

    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    async fn load(&self, result: Self::Transformed) -> Result<CycleReport>;
}
