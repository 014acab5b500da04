use crate::config::TenantConfig;
use crate::core::cycle::{RepricingPipeline, Services};
use crate::core::etl::EtlEngine;
use crate::domain::model::CycleReport;
use crate::domain::ports::{MarketReportSource, PricingEndpoint, SheetStore};
use crate::utils::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);
/// Cadence used for a tenant whose interval is missing or invalid.
pub const FALLBACK_INTERVAL_MINUTES: f64 = 5.0;

/// Time left in the cadence window after a cycle that took `elapsed`.
pub fn next_sleep(interval_minutes: f64, elapsed: Duration) -> Duration {
    let minutes = interval_minutes.ceil();
    let period = if minutes.is_finite() && minutes > 0.0 {
        Duration::from_secs(minutes as u64 * 60)
    } else {
        Duration::ZERO
    };
    period.saturating_sub(elapsed)
}

/// Runs `cycle` on a fixed cadence until `shutdown` fires. Failed cycles are
/// logged and the schedule continues. Returns the number of cycles started.
pub async fn run_schedule<F, Fut>(interval_minutes: f64, shutdown: CancellationToken, mut cycle: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<CycleReport>>,
{
    let mut cycles = 0;
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let started = Instant::now();
        cycles += 1;
        if let Err(e) = cycle().await {
            error!(
                "❌ Cycle failed ({:?}): {}. {}",
                e.category(),
                e,
                e.recovery_suggestion()
            );
        }

        let sleep = next_sleep(interval_minutes, started.elapsed());
        info!("💤 Next cycle in {}s", sleep.as_secs());
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(sleep) => {}
        }
    }
    info!("Tenant scheduler stopped after {} cycles", cycles);
    cycles
}

async fn run_cycle<S, R, P>(tenant: &TenantConfig, services: &Services<S, R, P>, seed: u64) -> Result<CycleReport>
where
    S: SheetStore + 'static,
    R: MarketReportSource + 'static,
    P: PricingEndpoint,
{
    let settings = tenant.resolve()?;
    let pipeline = RepricingPipeline::new(settings, services.clone(), seed);
    EtlEngine::new(pipeline).run().await
}

/// One tenant's loop. Tenant fields are re-validated at the start of every cycle.
pub async fn run_tenant<S, R, P>(
    tenant: TenantConfig,
    services: Services<S, R, P>,
    seed: Option<u64>,
    shutdown: CancellationToken,
) -> usize
where
    S: SheetStore + 'static,
    R: MarketReportSource + 'static,
    P: PricingEndpoint,
{
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let interval = match tenant.interval_minutes {
        Some(minutes) if minutes.is_finite() && minutes > 0.0 => minutes,
        _ => {
            warn!(
                "Tenant has no valid interval, retrying every {} minutes",
                FALLBACK_INTERVAL_MINUTES
            );
            FALLBACK_INTERVAL_MINUTES
        }
    };

    let tenant = &tenant;
    let services = &services;
    run_schedule(interval, shutdown, || {
        let cycle_seed: u64 = rng.gen();
        run_cycle(tenant, services, cycle_seed)
    })
    .await
}

/// Waits up to `grace` for every task in `set`, then aborts the rest and waits
/// for them to wind down. Returns how many tasks had to be aborted.
pub async fn drain_with_grace<T: 'static>(set: &mut JoinSet<T>, grace: Duration) -> usize {
    let finished = tokio::time::timeout(grace, async {
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!("Tenant task ended abnormally: {}", e);
            }
        }
    })
    .await;

    if finished.is_ok() {
        return 0;
    }

    let stragglers = set.len();
    warn!(
        "⏱️ {} tenant tasks still running after {}s, cancelling them",
        stragglers,
        grace.as_secs()
    );
    set.abort_all();
    while set.join_next().await.is_some() {}
    stragglers
}

/// Starts one scheduler per tenant and runs until `shutdown` fires, then drains them.
pub async fn run_tenants<S, R, P>(
    tenants: Vec<TenantConfig>,
    services: Services<S, R, P>,
    seed: Option<u64>,
    grace: Duration,
    shutdown: CancellationToken,
) -> usize
where
    S: SheetStore + 'static,
    R: MarketReportSource + 'static,
    P: PricingEndpoint,
{
    let mut set = JoinSet::new();
    for (idx, tenant) in tenants.into_iter().enumerate() {
        let span = info_span!("tenant", tenant = %tenant.label(), market = %tenant.market_label());
        let tenant_seed = seed.map(|s| s.wrapping_add(idx as u64));
        set.spawn(run_tenant(tenant, services.clone(), tenant_seed, shutdown.clone()).instrument(span));
    }
    info!("▶️ Started {} tenant schedulers", set.len());

    shutdown.cancelled().await;
    info!(
        "🛑 Shutdown requested, waiting up to {}s for {} tenants",
        grace.as_secs(),
        set.len()
    );
    drain_with_grace(&mut set, grace).await
}
