pub mod audit;
pub mod cycle;
pub mod decision;
pub mod dispatch;
pub mod etl;
pub mod merge;
pub mod scheduler;
pub mod workers;

pub use crate::domain::ports::{MarketReportSource, Pipeline, PricingEndpoint, SheetStore};
pub use crate::utils::error::Result;
