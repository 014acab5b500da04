use crate::domain::model::CycleReport;
use crate::domain::ports::Pipeline;
use crate::utils::error::Result;
use std::time::Instant;
use tracing::{debug, info};

/// Runs one extract → transform → load pass of a pipeline.
pub struct EtlEngine<P: Pipeline> {
    pipeline: P,
}

impl<P: Pipeline> EtlEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub async fn run(&self) -> Result<CycleReport> {
        let started = Instant::now();
        info!("🚀 Starting reconciliation cycle");

        debug!("Extracting sources...");
        let extracted = self.pipeline.extract().await?;

        debug!("Transforming...");
        let transformed = self.pipeline.transform(extracted).await?;

        debug!("Loading...");
        let mut report = self.pipeline.load(transformed).await?;
        report.duration = started.elapsed();

        info!(
            "🏁 Cycle finished in {:.1}s: {} rows, {} changed, {} unchanged, {} sent, {} failed{}",
            report.duration.as_secs_f64(),
            report.rows_processed,
            report.rows_changed,
            report.rows_not_changed,
            report.dispatched_ok,
            report.dispatch_failed,
            if report.seeded { " (seeded)" } else { "" }
        );
        if let Ok(json) = serde_json::to_string(&report) {
            debug!("Cycle report: {}", json);
        }
        Ok(report)
    }
}
