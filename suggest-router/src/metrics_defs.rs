//! Metrics definitions for the suggest router.

use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "suggest.request.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a suggest request in seconds, from receipt to merged response.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "suggest.requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of suggest requests currently being fanned out.",
};

pub const PROVIDER_DURATION: MetricDef = MetricDef {
    name: "suggest.provider.duration",
    metric_type: MetricType::Histogram,
    description: "Duration of a single provider query in seconds. Tagged with provider, outcome.",
};

pub const PROVIDER_OUTCOME: MetricDef = MetricDef {
    name: "suggest.provider.outcome",
    metric_type: MetricType::Counter,
    description: "Provider queries by outcome (success, empty, invalid, timeout, error). Tagged with provider, outcome.",
};

pub const FLAG_DECISION: MetricDef = MetricDef {
    name: "suggest.flag.decision",
    metric_type: MetricType::Counter,
    description: "Feature flag decisions made per request. Tagged with flag, enabled, scheme.",
};

pub const BREAKER_TRANSITIONS: MetricDef = MetricDef {
    name: "suggest.breaker.transitions",
    metric_type: MetricType::Counter,
    description: "Circuit breaker state changes. Tagged with breaker, to (closed, open, half_open).",
};

pub const BREAKER_REJECTED: MetricDef = MetricDef {
    name: "suggest.breaker.rejected",
    metric_type: MetricType::Counter,
    description: "Calls answered by the fallback because the circuit breaker was open. Tagged with breaker.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    PROVIDER_DURATION,
    PROVIDER_OUTCOME,
    FLAG_DECISION,
    BREAKER_TRANSITIONS,
    BREAKER_REJECTED,
];
