use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "repricer")]
#[command(about = "Reconciles marketplace price reports with tenant listings and reprices offers")]
pub struct CliConfig {
    #[arg(long, short, default_value = "repricer.toml")]
    pub config: PathBuf,

    #[arg(long, short, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Log price updates instead of sending them")]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run every tenant on its cadence until interrupted
    Run,
    /// Validate the config file and print a tenant summary
    Check,
    /// Show recent audit entries of one tenant
    Audit(AuditArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AuditArgs {
    #[arg(long)]
    pub tenant: String,

    /// Show rejected attempts instead of applied changes
    #[arg(long)]
    pub failed: bool,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

impl CliConfig {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
