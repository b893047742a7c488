use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use tradedge_config::{load_config, AppConfig};
use tradedge_core::Session;

use crate::live::{
    fetch_entitlements, fetch_once, format_trade, run_live, session_from_config,
    LiveSessionSettings,
};
use crate::telemetry::init_tracing;

#[derive(Parser)]
#[command(author, version, about = "Tradedge trade-alert client")]
pub struct Cli {
    /// Increases logging verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Selects which configuration environment to load (maps to config/{env}.toml)
    #[arg(long, default_value = "default")]
    env: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stream live trade alerts until interrupted
    Run(RunArgs),
    /// Fetch the trade history once and print the visible trades
    Fetch(FetchArgs),
    /// Show the purchased packages of the signed-in user
    Entitlements(EntitlementsArgs),
}

/// Overrides for the configured session credentials.
#[derive(Args, Clone, Default)]
pub struct SessionArgs {
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    token: Option<String>,
    /// Phone number used for outbound trade messages
    #[arg(long)]
    phone: Option<String>,
}

impl SessionArgs {
    fn resolve(&self, config: &AppConfig) -> Result<Session> {
        let mut session_config = config.session.clone();
        if let Some(user_id) = &self.user_id {
            session_config.user_id = user_id.clone();
        }
        if let Some(token) = &self.token {
            session_config.access_token = token.clone();
        }
        if let Some(phone) = &self.phone {
            session_config.phone_number = Some(phone.clone());
        }
        session_from_config(&session_config)
    }
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Address for the Prometheus metrics endpoint
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
    /// Path to the JSON log file
    #[arg(long)]
    log_path: Option<PathBuf>,
}

impl RunArgs {
    fn resolved_log_path(&self, config: &AppConfig) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| config.live.log_path.clone())
    }

    async fn run(self, config: &AppConfig) -> Result<()> {
        let session = self.session.resolve(config)?;
        let mut settings = LiveSessionSettings::from_config(config)?;
        if let Some(addr) = self.metrics_addr {
            settings.metrics_addr = Some(addr);
        }
        run_live(settings, session).await
    }
}

#[derive(Args)]
pub struct FetchArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Only print trades created today
    #[arg(long)]
    today: bool,
    /// Emit JSON instead of one line per trade
    #[arg(long)]
    json: bool,
}

impl FetchArgs {
    async fn run(self, config: &AppConfig) -> Result<()> {
        let session = self.session.resolve(config)?;
        let settings = LiveSessionSettings::from_config(config)?;
        let report = fetch_once(&settings, &session).await?;
        info!(
            today = report.today.len(),
            all = report.all.len(),
            duplicates = report.duplicates,
            filtered = report.filtered,
            "trade history loaded"
        );
        let trades = if self.today {
            &report.today
        } else {
            &report.all
        };
        if self.json {
            println!("{}", serde_json::to_string_pretty(trades)?);
        } else if trades.is_empty() {
            println!("no visible trades");
        } else {
            for trade in trades {
                println!("{}", format_trade(trade));
            }
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct EntitlementsArgs {
    #[command(flatten)]
    session: SessionArgs,
    #[arg(long)]
    json: bool,
}

impl EntitlementsArgs {
    async fn run(self, config: &AppConfig) -> Result<()> {
        let session = self.session.resolve(config)?;
        let settings = LiveSessionSettings::from_config(config)?;
        let snapshot = fetch_entitlements(&settings, &session).await?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(());
        }
        if snapshot.purchased_subtype_ids.is_empty() {
            println!("no purchased packages");
            return Ok(());
        }
        let now = Utc::now();
        for id in &snapshot.purchased_subtype_ids {
            let validity = snapshot
                .validity_by_package
                .get(id)
                .map(|until| until.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "no expiry".to_string());
            let status = if snapshot.is_active(id, now) {
                "active"
            } else {
                "expired"
            };
            println!("{id:<8} {status:<8} {validity}");
        }
        Ok(())
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(Some(&cli.env)).context("failed to load configuration")?;

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| match cli.verbose {
        0 if config.log_level.is_empty() => "info".to_string(),
        0 => config.log_level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    });

    let log_override = match &cli.command {
        Commands::Run(args) => Some(args.resolved_log_path(&config)),
        _ => None,
    };

    init_tracing(&filter, log_override.as_deref()).context("failed to initialize logging")?;

    match cli.command {
        Commands::Run(args) => args.run(&config).await?,
        Commands::Fetch(args) => args.run(&config).await?,
        Commands::Entitlements(args) => args.run(&config).await?,
    }

    Ok(())
}
