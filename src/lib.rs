pub mod adapters;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod utils;
pub mod validation;

use axum::{
    http::Method,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::health::HealthChecks;
use crate::middleware::auth::{admin_auth, AdminKey};
use crate::middleware::request_logger::{request_logger_middleware, RequestLogConfig};
use crate::ports::{GiftRepository, NotificationFlagStore, PurchaseRepository, RedemptionRepository};
use crate::services::notifications::NotificationSender;
use crate::services::sources::default_sources;
use crate::services::{
    ExportService, LedgerService, NotificationDedupLedger, NotificationDispatcher,
    RedemptionService, TransferService,
};

#[derive(Clone)]
pub struct AppState {
    pub redemptions: RedemptionService,
    pub ledger: LedgerService,
    pub export: ExportService,
    pub transfers: TransferService,
    pub health: HealthChecks,
    pub admin_key: AdminKey,
    pub request_log: RequestLogConfig,
}

impl AppState {
    /// Wires every service onto one record store.
    pub fn build<S>(
        config: &Config,
        store: Arc<S>,
        sender: Arc<dyn NotificationSender>,
        health: HealthChecks,
    ) -> anyhow::Result<Self>
    where
        S: RedemptionRepository
            + PurchaseRepository
            + GiftRepository
            + NotificationFlagStore
            + 'static,
    {
        let fees = config.fee_config()?;
        let dedup = NotificationDedupLedger::new(store.clone(), config.store_timeout());
        let dispatcher = NotificationDispatcher::new(dedup, sender);
        let ledger = LedgerService::new(default_sources(store.clone()), config.ledger_config());

        Ok(Self {
            redemptions: RedemptionService::new(
                store.clone(),
                dispatcher,
                fees.clone(),
                config.redemption_settings(),
            ),
            export: ExportService::new(ledger.clone(), config.export_config()),
            ledger,
            transfers: TransferService::new(
                store.clone(),
                store,
                fees,
                config.mg_per_token.clone(),
                config.store_timeout(),
            ),
            health,
            admin_key: AdminKey::new(&config.admin_api_key),
            request_log: RequestLogConfig {
                log_body: config.log_request_body,
            },
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/admin/redemptions/:id/approve",
            post(handlers::redemptions::approve_redemption),
        )
        .route(
            "/admin/redemptions/:id/complete",
            post(handlers::redemptions::complete_redemption),
        )
        .route(
            "/admin/redemptions/:id/fail",
            post(handlers::redemptions::fail_redemption),
        )
        .route(
            "/admin/redemptions/:id/notifications/retry",
            post(handlers::redemptions::retry_notifications),
        )
        .route(
            "/admin/transactions",
            get(handlers::transactions::list_all_transactions),
        )
        .route_layer(from_fn_with_state(state.admin_key.clone(), admin_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/redemptions",
            post(handlers::redemptions::submit_redemption)
                .get(handlers::redemptions::list_redemptions),
        )
        .route("/redemptions/:id", get(handlers::redemptions::get_redemption))
        .route(
            "/redemptions/:id/cancel",
            post(handlers::redemptions::cancel_redemption),
        )
        .route("/transactions", get(handlers::transactions::list_transactions))
        .route(
            "/transactions/export",
            get(handlers::transactions::export_transactions),
        )
        .route("/purchases", post(handlers::transfers::record_purchase))
        .route("/gifts", post(handlers::transfers::record_gift))
        .merge(admin)
        .layer(from_fn_with_state(state.request_log, request_logger_middleware))
        .layer(cors)
        .with_state(state)
}
