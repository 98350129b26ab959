//! Metrics definitions for synced caches.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_SYNC_DURATION: MetricDef = MetricDef {
    name: "cache.sync.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete one cache sync attempt in seconds. Tagged with cache.",
};

pub const CACHE_SYNC_OUTCOME: MetricDef = MetricDef {
    name: "cache.sync.outcome",
    metric_type: MetricType::Counter,
    description: "Completed cache sync attempts. Tagged with cache, outcome (unchanged, updated, skipped).",
};

pub const CACHE_SYNC_ERRORS: MetricDef = MetricDef {
    name: "cache.sync.errors",
    metric_type: MetricType::Counter,
    description: "Cache sync attempts that failed to read or parse the remote object. Tagged with cache.",
};

pub const ALL_METRICS: &[MetricDef] = &[CACHE_SYNC_DURATION, CACHE_SYNC_OUTCOME, CACHE_SYNC_ERRORS];
