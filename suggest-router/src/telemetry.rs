use crate::config::BucketingScheme;
use crate::metrics_defs::{FLAG_DECISION, PROVIDER_DURATION, PROVIDER_OUTCOME};
use shared::{counter, histogram};
use std::time::Duration;

/// How a single provider query ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProviderOutcome {
    /// Returned at least one suggestion.
    Success,
    /// Completed without suggestions.
    Empty,
    /// Rejected the request during validation.
    Invalid,
    /// Did not finish before its deadline.
    Timeout,
    /// Failed or panicked.
    Error,
}

impl ProviderOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProviderOutcome::Success => "success",
            ProviderOutcome::Empty => "empty",
            ProviderOutcome::Invalid => "invalid",
            ProviderOutcome::Timeout => "timeout",
            ProviderOutcome::Error => "error",
        }
    }
}

/// Destination for per-request observations. Recording must never block or
/// fail the request.
pub trait TelemetrySink: Send + Sync {
    fn record_provider_outcome(&self, provider: &str, outcome: ProviderOutcome, duration: Duration);

    fn record_flag_decision(&self, flag: &str, enabled: bool, scheme: BucketingScheme);
}

/// Emits observations through the global `metrics` recorder.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricsTelemetry;

impl TelemetrySink for MetricsTelemetry {
    fn record_provider_outcome(&self, provider: &str, outcome: ProviderOutcome, duration: Duration) {
        counter!(
            PROVIDER_OUTCOME,
            "provider" => provider.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        histogram!(
            PROVIDER_DURATION,
            "provider" => provider.to_string(),
            "outcome" => outcome.as_str()
        )
        .record(duration.as_secs_f64());
    }

    fn record_flag_decision(&self, flag: &str, enabled: bool, scheme: BucketingScheme) {
        let enabled = if enabled { "true" } else { "false" };
        counter!(
            FLAG_DECISION,
            "flag" => flag.to_string(),
            "enabled" => enabled,
            "scheme" => scheme.as_str()
        )
        .increment(1);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record_provider_outcome(&self, _: &str, _: ProviderOutcome, _: Duration) {}

    fn record_flag_decision(&self, _: &str, _: bool, _: BucketingScheme) {}
}
