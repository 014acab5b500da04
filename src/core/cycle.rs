use crate::config::TenantSettings;
use crate::core::audit::AuditStore;
use crate::core::decision::{decide_all, EligibilityMode};
use crate::core::dispatch::{DispatchEngine, DispatchSettings};
use crate::core::merge::{merge, prepare_market_report, seed_listing, to_dataset, SeedPlaceholders};
use crate::core::workers::CpuPool;
use crate::domain::dataset::{format_number, Dataset};
use crate::domain::model::{
    AuditEntry, AuditKind, CatalogRow, ColumnMap, CycleReport, DispatchRequest, PriceDecision, ReconciledSet,
};
use crate::domain::ports::{EndpointTarget, MarketReportSource, Pipeline, PricingEndpoint, SheetStore};
use crate::utils::error::{RepricerError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings shared by every tenant's cycle.
#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub columns: ColumnMap,
    pub report_keep: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub seed: SeedPlaceholders,
    pub audit_dir: PathBuf,
    pub eligibility: EligibilityMode,
}

/// Collaborators shared by all tenants.
pub struct Services<S, R, P: PricingEndpoint> {
    pub sheets: Arc<S>,
    pub reports: Arc<R>,
    pub endpoint: Arc<P>,
    pub pool: CpuPool,
    pub options: Arc<CycleOptions>,
    pub dispatch: DispatchSettings,
}

impl<S, R, P: PricingEndpoint> Clone for Services<S, R, P> {
    fn clone(&self) -> Self {
        Self {
            sheets: self.sheets.clone(),
            reports: self.reports.clone(),
            endpoint: self.endpoint.clone(),
            pool: self.pool.clone(),
            options: self.options.clone(),
            dispatch: self.dispatch.clone(),
        }
    }
}

pub struct CycleSources {
    pub own: Dataset,
    pub report: Dataset,
}

pub enum CyclePlan {
    /// Own listing was empty: write the report-derived listing and stop.
    Seed(Dataset),
    Reprice {
        headers: Vec<String>,
        decided: Vec<(CatalogRow, PriceDecision)>,
    },
    Idle,
}

/// One tenant's reconciliation cycle: fetch, merge and decide, then audit,
/// dispatch and write back.
pub struct RepricingPipeline<S, R, P: PricingEndpoint> {
    settings: TenantSettings,
    services: Services<S, R, P>,
    rng_seed: u64,
}

impl<S, R, P> RepricingPipeline<S, R, P>
where
    S: SheetStore + 'static,
    R: MarketReportSource + 'static,
    P: PricingEndpoint,
{
    pub fn new(settings: TenantSettings, services: Services<S, R, P>, rng_seed: u64) -> Self {
        Self {
            settings,
            services,
            rng_seed,
        }
    }

    fn report(&self) -> CycleReport {
        CycleReport {
            tenant: self.settings.tenant_id.clone(),
            market: self.settings.market_name.clone(),
            ..Default::default()
        }
    }

    async fn write_back(&self, headers: Vec<String>, decided: &[(CatalogRow, PriceDecision)]) -> Result<()> {
        let options = self.services.options.clone();
        let merged_rows: Vec<CatalogRow> = decided.iter().map(|(row, _)| row.clone()).collect();
        let final_rows: Vec<CatalogRow> = decided
            .iter()
            .map(|(row, decision)| {
                let mut row = row.clone();
                if let (true, Some(price)) = (decision.is_changed(), decision.new_price) {
                    row.current_price = format_number(price);
                }
                row.note = decision.reason.clone();
                row
            })
            .collect();

        let (merged, finished) = self
            .services
            .pool
            .run(move || {
                let columns = &options.columns;
                let mut merged = to_dataset(
                    &ReconciledSet {
                        headers: headers.clone(),
                        rows: merged_rows,
                    },
                    columns,
                );
                let mut finished = to_dataset(
                    &ReconciledSet {
                        headers,
                        rows: final_rows,
                    },
                    columns,
                );
                for (column, stats) in merged.normalize_numeric(&options.numeric_columns) {
                    debug!(
                        "Column {}: {} converted, {} left as text",
                        column, stats.converted, stats.failed
                    );
                }
                finished.normalize_numeric(&options.numeric_columns);
                (merged, finished)
            })
            .await?;

        let id = &self.settings.spreadsheet_id;
        self.services
            .sheets
            .write(id, &self.settings.merged_range, &merged)
            .await?;
        self.services
            .sheets
            .write(id, &self.settings.final_range, &finished)
            .await?;
        info!(
            "📝 Wrote {} rows to {} and {}",
            finished.len(),
            self.settings.merged_range,
            self.settings.final_range
        );
        Ok(())
    }
}

#[async_trait]
impl<S, R, P> Pipeline for RepricingPipeline<S, R, P>
where
    S: SheetStore + 'static,
    R: MarketReportSource + 'static,
    P: PricingEndpoint,
{
    type Extracted = CycleSources;
    type Transformed = CyclePlan;

    async fn extract(&self) -> Result<CycleSources> {
        let settings = &self.settings;
        let own = async {
            self.services
                .sheets
                .fetch(&settings.spreadsheet_id, &settings.report_range)
                .await
                .map_err(|e| RepricerError::source_fetch("own listing", e.to_string()))
        };
        let report = self
            .services
            .reports
            .fetch_market_report(&settings.api_key, &settings.business_id);

        let (own, report) = tokio::try_join!(own, report)?;
        info!(
            "📊 Fetched own listing ({} rows) and market report ({} rows)",
            own.len(),
            report.len()
        );
        Ok(CycleSources { own, report })
    }

    async fn transform(&self, data: CycleSources) -> Result<CyclePlan> {
        let CycleSources { own, report } = data;
        let options = self.services.options.clone();

        let prepared = {
            let options = options.clone();
            self.services
                .pool
                .run(move || prepare_market_report(&report, &options.report_keep, &options.columns))
                .await?
        };

        if own.is_empty() {
            if prepared.is_empty() {
                warn!("Both the own listing and the market report are empty, nothing to do");
                return Ok(CyclePlan::Idle);
            }
            info!("🌱 Own listing is empty, seeding it from the market report");
            let seeded = seed_listing(&prepared, &options.columns, &options.seed);
            return Ok(CyclePlan::Seed(seeded));
        }

        let merged = {
            let options = options.clone();
            self.services
                .pool
                .run(move || merge(&own, &prepared, &options.columns))
                .await?
        };

        let policy = Arc::new(self.settings.policy(options.eligibility));
        let mut rng = StdRng::seed_from_u64(self.rng_seed);
        let decided = decide_all(&self.services.pool, merged.rows, policy, &mut rng).await?;

        Ok(CyclePlan::Reprice {
            headers: merged.headers,
            decided,
        })
    }

    async fn load(&self, plan: CyclePlan) -> Result<CycleReport> {
        let mut report = self.report();
        let (headers, decided) = match plan {
            CyclePlan::Idle => return Ok(report),
            CyclePlan::Seed(seeded) => {
                self.services
                    .sheets
                    .write(&self.settings.spreadsheet_id, &self.settings.report_range, &seeded)
                    .await?;
                report.seeded = true;
                report.rows_processed = seeded.len();
                report.rows_not_changed = seeded.len();
                return Ok(report);
            }
            CyclePlan::Reprice { headers, decided } => (headers, decided),
        };

        let now = Utc::now();
        let (mut successful, mut failed) = (Vec::new(), Vec::new());
        for (row, decision) in &decided {
            let entry = AuditEntry::from_decision(
                row,
                decision,
                &self.settings.tenant_id,
                &self.settings.market_name,
                now,
            );
            match AuditKind::for_decision(decision) {
                AuditKind::Successful => successful.push(entry),
                AuditKind::Failed => failed.push(entry),
            }
        }
        report.rows_processed = decided.len();
        report.rows_changed = successful.len();
        report.rows_not_changed = failed.len();

        let audit_dir = self.services.options.audit_dir.clone();
        let (tenant, market) = (
            self.settings.tenant_id.clone(),
            self.settings.market_name.clone(),
        );
        self.services
            .pool
            .run(move || {
                AuditStore::open_for(&audit_dir, &tenant, &market)?.record_cycle(&successful, &failed)
            })
            .await??;

        let requests: Vec<DispatchRequest> = decided
            .iter()
            .filter_map(|(_, decision)| DispatchRequest::from_decision(decision))
            .collect();
        if !requests.is_empty() {
            let engine = DispatchEngine::new(self.services.endpoint.clone(), self.services.dispatch.clone());
            let target = EndpointTarget {
                api_key: self.settings.api_key.clone(),
                business_id: self.settings.business_id.clone(),
            };
            let results = engine.dispatch(&requests, &target).await;
            report.dispatched_ok = results.iter().filter(|r| r.outcome.is_success()).count();
            report.dispatch_failed = results.len() - report.dispatched_ok;
        }

        self.write_back(headers, &decided).await?;
        Ok(report)
    }
}
