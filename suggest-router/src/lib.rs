//! Suggest orchestration: fans a query out to independent providers under
//! per-provider deadlines, then merges and ranks what came back in time.

pub mod api;
pub mod backend;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod feature_flags;
pub mod metrics_defs;
pub mod orchestrator;
pub mod providers;
pub mod request;
pub mod suggestion;
pub mod telemetry;

#[cfg(test)]
mod testutils;

use api::SuggestService;
use config::Config;
use errors::SuggestRouterError;
use feature_flags::FeatureFlags;
use orchestrator::{Orchestrator, OrchestratorSettings};
use providers::Registry;
use shared::admin_service::AdminService;
use shared::http::serve_listener;
use std::future::Future;
use std::sync::Arc;
use telemetry::MetricsTelemetry;
use tokio::net::TcpListener;

/// A configured router whose providers have not been initialized yet.
pub struct SuggestRouter {
    registry: Arc<Registry>,
    orchestrator: Arc<Orchestrator>,
}

impl SuggestRouter {
    pub fn from_config(config: &Config) -> Result<Self, SuggestRouterError> {
        config.validate()?;

        let registry = Arc::new(Registry::from_config(&config.providers)?);
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            Arc::new(FeatureFlags::new(config.flags.clone())),
            Arc::new(MetricsTelemetry),
            OrchestratorSettings {
                global_timeout: config.global_timeout(),
                max_suggestions: config.max_suggestions,
                server_variants: config.server_variants.clone(),
            },
        ));

        Ok(SuggestRouter {
            registry,
            orchestrator,
        })
    }

    /// Initializes every provider, then serves suggest traffic and admin
    /// probes until `shutdown` resolves or a listener fails. Providers are
    /// shut down before returning in both cases.
    pub async fn serve(
        self,
        listener: TcpListener,
        admin_listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), SuggestRouterError> {
        self.registry.initialize_all().await;

        let suggest_task = serve_listener(listener, SuggestService::new(self.orchestrator.clone()));
        let ready_registry = self.registry.clone();
        let admin_task = serve_listener(
            admin_listener,
            AdminService::new(move || ready_registry.is_ready()),
        );

        let result = tokio::select! {
            result = async { tokio::try_join!(suggest_task, admin_task) } => result.map(|_| ()),
            _ = shutdown => {
                tracing::info!("shutdown requested");
                Ok(())
            }
        };

        if let Err(e) = &result {
            tracing::error!(error = %e, "suggest router stopped with an error");
        }
        self.registry.shutdown_all().await;
        result
    }
}

pub async fn run(
    config: Config,
    shutdown: impl Future<Output = ()>,
) -> Result<(), SuggestRouterError> {
    let router = SuggestRouter::from_config(&config)?;

    let listener =
        TcpListener::bind(format!("{}:{}", config.listener.host, config.listener.port)).await?;
    let admin_listener = TcpListener::bind(format!(
        "{}:{}",
        config.admin_listener.host, config.admin_listener.port
    ))
    .await?;
    tracing::info!(
        listener = %listener.local_addr()?,
        admin_listener = %admin_listener.local_addr()?,
        providers = config.providers.len(),
        "suggest router listening"
    );

    router.serve(listener, admin_listener, shutdown).await
}
