use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use bullion_ledger::config::Config;
use bullion_ledger::handlers::transactions::HistoryParams;
use bullion_ledger::services::export::ExportFormat;
use bullion_ledger::AppState;

#[derive(Parser)]
#[command(name = "bullion-ledger")]
#[command(about = "Bullion Ledger - redemption lifecycle and unified transaction history", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Keep all records in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Operator actions on a single redemption
    #[command(subcommand)]
    Redemption(RedemptionCommands),

    /// Export one user's transaction history
    Export {
        #[arg(long, value_name = "USER_ID")]
        user: Uuid,

        /// csv or json (JSON Lines)
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// YYYY-MM-DD or RFC 3339, inclusive
        #[arg(long)]
        from: Option<String>,

        /// YYYY-MM-DD or RFC 3339, inclusive
        #[arg(long)]
        to: Option<String>,

        /// purchase, redemption or gift
        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        search: Option<String>,
    },

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum RedemptionCommands {
    /// Move a pending redemption to processing
    Approve {
        #[arg(value_name = "REDEMPTION_ID")]
        id: Uuid,
    },
    /// Move a processing redemption to completed
    Complete {
        #[arg(value_name = "REDEMPTION_ID")]
        id: Uuid,
    },
    /// Mark a redemption as failed
    Fail {
        #[arg(value_name = "REDEMPTION_ID")]
        id: Uuid,
        #[arg(short, long)]
        message: String,
    },
    /// Re-send every notification that was never delivered
    RetryNotifications {
        #[arg(value_name = "REDEMPTION_ID")]
        id: Uuid,
    },
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = bullion_ledger::db::create_pool(config.require_database_url()?).await?;

    tracing::info!("Running database migrations...");
    bullion_ledger::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_redemption(state: &AppState, command: RedemptionCommands) -> anyhow::Result<()> {
    let redemptions = &state.redemptions;
    match command {
        RedemptionCommands::Approve { id } => {
            let r = redemptions.approve(id).await?;
            println!("✓ Redemption {} is now {}", r.id, r.status);
        }
        RedemptionCommands::Complete { id } => {
            let r = redemptions.complete(id).await?;
            println!("✓ Redemption {} is now {}", r.id, r.status);
        }
        RedemptionCommands::Fail { id, message } => {
            let r = redemptions.fail(id, message).await?;
            println!("✓ Redemption {} is now {}", r.id, r.status);
        }
        RedemptionCommands::RetryNotifications { id } => {
            let report = redemptions.redeliver_notifications(id).await?;
            if report.attempted.is_empty() {
                println!("Nothing to redeliver for {}", id);
            }
            for (event, outcome) in report.attempted {
                println!("  {:<12} {:?}", event.as_str(), outcome);
            }
        }
    }
    Ok(())
}

pub async fn handle_export(
    state: &AppState,
    user: Uuid,
    format: ExportFormat,
    params: HistoryParams,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let filter = params.into_filter(Some(user))?;
    let mut stream = state.export.export(&filter, format).await?;

    let mut writer: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &output {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let mut lines = 0usize;
    while let Some(chunk) = stream.next().await {
        writer.write_all(chunk?.as_bytes()).await?;
        lines += 1;
    }
    writer.flush().await?;

    if let Some(path) = output {
        eprintln!("✓ Wrote {} lines to {}", lines, path.display());
    }
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(not set, in-memory only)".to_string())
    );
    println!(
        "  Notification Webhook: {}",
        config.notification_webhook_url.as_deref().unwrap_or("(log only)")
    );
    println!(
        "  Platform Fee: {}% (min {}, max {})",
        config.platform_fee_percent,
        config.platform_fee_min_usd,
        config
            .platform_fee_max_usd
            .as_ref()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  Export Max Rows: {}", config.export_max_rows);

    println!("✓ Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
