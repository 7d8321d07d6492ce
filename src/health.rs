use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::services::notifications::WebhookNotifier;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl Into<String>) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.into(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e.to_string()),
        }
    }
}

/// The in-memory store cannot fail.
pub struct InMemoryChecker;

#[async_trait]
impl DependencyChecker for InMemoryChecker {
    async fn check(&self) -> DependencyStatus {
        DependencyStatus::healthy(Instant::now())
    }
}

/// Reports the notification webhook's circuit breaker without calling the endpoint.
pub struct WebhookChecker {
    notifier: WebhookNotifier,
}

impl WebhookChecker {
    pub fn new(notifier: WebhookNotifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl DependencyChecker for WebhookChecker {
    async fn check(&self) -> DependencyStatus {
        match self.notifier.circuit_state() {
            "closed" => DependencyStatus::healthy(Instant::now()),
            state => DependencyStatus::unhealthy(format!("circuit breaker {}", state)),
        }
    }
}

struct RegisteredChecker {
    name: String,
    critical: bool,
    checker: Arc<dyn DependencyChecker>,
}

/// Dependency checks run concurrently, each under its own timeout.
#[derive(Clone)]
pub struct HealthChecks {
    checkers: Arc<Vec<RegisteredChecker>>,
    start_time: Instant,
    timeout: Duration,
}

impl HealthChecks {
    pub fn builder() -> HealthChecksBuilder {
        HealthChecksBuilder {
            checkers: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub async fn check_health(&self) -> HealthResponse {
        let results = futures::future::join_all(self.checkers.iter().map(|entry| async move {
            let status = timeout(self.timeout, entry.checker.check())
                .await
                .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
            (entry.name.clone(), entry.critical, status)
        }))
        .await;

        let overall_status = determine_overall_status(&results);
        HealthResponse {
            status: overall_status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            dependencies: results
                .into_iter()
                .map(|(name, _, status)| (name, status))
                .collect(),
        }
    }
}

pub struct HealthChecksBuilder {
    checkers: Vec<RegisteredChecker>,
    timeout: Duration,
}

impl HealthChecksBuilder {
    /// A failing critical dependency makes the service unhealthy; others only degrade it.
    pub fn check(
        mut self,
        name: impl Into<String>,
        critical: bool,
        checker: Arc<dyn DependencyChecker>,
    ) -> Self {
        self.checkers.push(RegisteredChecker {
            name: name.into(),
            critical,
            checker,
        });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> HealthChecks {
        HealthChecks {
            checkers: Arc::new(self.checkers),
            start_time: Instant::now(),
            timeout: self.timeout,
        }
    }
}

fn determine_overall_status(results: &[(String, bool, DependencyStatus)]) -> String {
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (_, critical, status) in results {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if *critical {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}
