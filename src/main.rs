use clap::Parser;
use repricer::config::cli::{AuditArgs, Command};
use repricer::core::decision::EligibilityMode;
use repricer::core::dispatch::DispatchSettings;
use repricer::domain::model::AuditKind;
use repricer::utils::error::ErrorSeverity;
use repricer::utils::{logger, validation::Validate};
use repricer::{
    run_tenants, AppConfig, AuditStore, CliConfig, CpuPool, CsvSheetStore, HttpPricingEndpoint,
    RepricerError, Services, YandexReportClient,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

async fn run(config: AppConfig, dry_run_flag: bool) -> repricer::Result<()> {
    let dispatch: DispatchSettings = config.dispatch_settings(dry_run_flag);
    if dispatch.dry_run {
        warn!("🧪 Dry-run mode: price updates are logged, not sent");
    }
    if config.runtime.eligibility == EligibilityMode::FloorOnly {
        warn!("Eligibility mode floor_only: rows priced below market or floor may be raised");
    }

    let services = Services {
        sheets: Arc::new(CsvSheetStore::new(&config.runtime.sheets_dir)),
        reports: Arc::new(YandexReportClient::new(config.report_client_settings())?),
        endpoint: Arc::new(HttpPricingEndpoint::new(
            config.market_api.base_url.clone(),
            config.request_timeout(),
        )?),
        pool: CpuPool::new(config.runtime.cpu_workers),
        options: Arc::new(config.cycle_options()),
        dispatch,
    };

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let aborted = run_tenants(
        config.tenants.clone(),
        services,
        config.runtime.seed,
        config.grace_period(),
        shutdown,
    )
    .await;
    if aborted > 0 {
        warn!("{} tenant tasks were cancelled after the grace period", aborted);
    }
    info!("👋 All tenant schedulers stopped");
    Ok(())
}

fn check(config: &AppConfig) {
    println!("✅ Configuration is valid: {} tenants", config.tenants.len());
    for tenant in &config.tenants {
        match tenant.resolve() {
            Ok(settings) => println!(
                "  • {} [{}] every {} min, deltas {}..{}, own shops: {}",
                settings.tenant_id,
                settings.market_name,
                settings.interval_minutes,
                settings.min_delta,
                settings.max_delta,
                if settings.own_shops.is_empty() {
                    "-".to_string()
                } else {
                    settings.own_shops.join(", ")
                }
            ),
            Err(e) => println!("  • {} ⚠️ {}", tenant.label(), e),
        }
    }
}

fn audit(config: &AppConfig, args: &AuditArgs) -> repricer::Result<()> {
    let tenant = config
        .tenants
        .iter()
        .find(|t| t.tenant_id.as_deref().map(str::trim) == Some(args.tenant.as_str()))
        .ok_or_else(|| RepricerError::ConfigError {
            message: format!("Unknown tenant '{}'", args.tenant),
        })?;
    let settings = tenant.resolve()?;

    let store = AuditStore::open_for(
        &config.runtime.audit_dir,
        &settings.tenant_id,
        &settings.market_name,
    )?;
    let kind = if args.failed {
        AuditKind::Failed
    } else {
        AuditKind::Successful
    };
    for entry in store.recent(kind, args.limit)? {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}

fn exit_code(e: &RepricerError) -> i32 {
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    let loaded = AppConfig::from_file(&cli.config).and_then(|config| {
        config.validate()?;
        Ok(config)
    });
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration validation failed: {}", e);
            error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command() {
        Command::Run => run(config, cli.dry_run).await,
        Command::Check => {
            check(&config);
            Ok(())
        }
        Command::Audit(args) => audit(&config, &args),
    };

    if let Err(e) = result {
        error!(
            "❌ {} (category: {:?}, severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e);
        let code = exit_code(&e);
        if code > 0 {
            std::process::exit(code);
        }
    }
    Ok(())
}
