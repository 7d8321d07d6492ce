mod cli;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bullion_ledger::adapters::{InMemoryStore, PostgresStore};
use bullion_ledger::config::{Config, LogFormat};
use bullion_ledger::handlers::transactions::HistoryParams;
use bullion_ledger::health::{HealthChecks, InMemoryChecker, PostgresChecker, WebhookChecker};
use bullion_ledger::services::notifications::{LogNotifier, NotificationSender, WebhookNotifier};
use bullion_ledger::{create_app, AppState};
use cli::{Cli, Commands, DbCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    match cli.command {
        Some(Commands::Serve { in_memory }) => serve(config, in_memory).await,
        None => serve(config, false).await,
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Redemption(command)) => {
            let state = build_state(&config, false).await?;
            cli::handle_redemption(&state, command).await
        }
        Some(Commands::Export {
            user,
            format,
            output,
            from,
            to,
            kind,
            status,
            search,
        }) => {
            let params = HistoryParams {
                date_from: from,
                date_to: to,
                kind,
                status,
                search,
                ..Default::default()
            };
            let state = build_state(&config, false).await?;
            cli::handle_export(&state, user, format, params, output).await
        }
        Some(Commands::Config) => cli::handle_config_validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn build_state(config: &Config, in_memory: bool) -> anyhow::Result<AppState> {
    let mut health = HealthChecks::builder().timeout(config.store_timeout());
    let sender: Arc<dyn NotificationSender> = match &config.notification_webhook_url {
        Some(url) => {
            let notifier =
                WebhookNotifier::new(url.clone(), config.notification_webhook_secret.clone());
            tracing::info!(url = %url, "Notifications delivered by webhook");
            health = health.check(
                "notifications",
                false,
                Arc::new(WebhookChecker::new(notifier.clone())),
            );
            Arc::new(notifier)
        }
        None => {
            tracing::info!("No webhook configured, notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    if in_memory {
        tracing::warn!("Running on the in-memory store, records are lost on exit");
        let health = health.check("store", true, Arc::new(InMemoryChecker)).build();
        return AppState::build(config, Arc::new(InMemoryStore::new()), sender, health);
    }

    let pool = bullion_ledger::db::create_pool(config.require_database_url()?).await?;
    bullion_ledger::db::run_migrations(&pool).await?;
    let health = health
        .check("postgres", true, Arc::new(PostgresChecker::new(pool.clone())))
        .build();
    AppState::build(config, Arc::new(PostgresStore::new(pool)), sender, health)
}

async fn serve(config: Config, in_memory: bool) -> anyhow::Result<()> {
    let state = build_state(&config, in_memory).await?;
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
