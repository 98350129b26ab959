use crate::config::{LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::{MetricDef, describe_all};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Every metric emitted by the daemon.
pub fn all_metrics() -> impl Iterator<Item = &'static MetricDef> {
    synced_cache::metrics_defs::ALL_METRICS
        .iter()
        .chain(suggest_router::metrics_defs::ALL_METRICS)
}

/// Installs the tracing subscriber, plus the Sentry client and its tracing
/// layer when a DSN is configured. The returned guard flushes Sentry events
/// when dropped and must live until shutdown.
pub fn init_logging(config: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let level = config.map_or("info", |c| c.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let guard = config
        .and_then(|c| c.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(guard.is_some().then(sentry::integrations::tracing::layer))
        .init();

    guard
}

#[derive(thiserror::Error, Debug)]
#[error("could not install statsd recorder: {0}")]
pub struct MetricsInitError(String);

pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsInitError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(config.prefix.as_str()))
        .map_err(|e| MetricsInitError(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| MetricsInitError(e.to_string()))?;

    let defs: Vec<MetricDef> = all_metrics().copied().collect();
    describe_all(&defs);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}
