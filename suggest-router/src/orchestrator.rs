//! Fan-out of one suggest request to every candidate provider.

use crate::feature_flags::{FeatureFlags, FlagDecision, RequestFlags};
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::backend::BackendError;
use crate::providers::{Provider, ProviderError, QueryContext, RegisteredProvider, Registry};
use crate::request::SuggestionRequest;
use crate::suggestion::{SuggestResponse, Suggestion};
use crate::telemetry::{ProviderOutcome, TelemetrySink};
use shared::{gauge, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Extra time the collector waits past the latest provider deadline before
/// aborting tasks that did not wind down on their own.
const COLLECTION_GRACE: Duration = Duration::from_millis(50);

/// How long a timed out query may keep running after its cancellation token
/// fired, so it can release backend resources. Must stay below
/// `COLLECTION_GRACE`.
const CANCEL_WIND_DOWN: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub global_timeout: Duration,
    pub max_suggestions: usize,
    pub server_variants: Vec<String>,
}

/// Result of one provider task.
struct ProviderTaskResult {
    name: String,
    index: usize,
    outcome: ProviderOutcome,
    duration: Duration,
    suggestions: Vec<Suggestion>,
}

/// Spawned provider tasks with the metadata needed when a task never
/// reports back (panic or abort).
struct SpawnedTasks {
    join_set: JoinSet<ProviderTaskResult>,
    task_providers: HashMap<tokio::task::Id, (String, Instant)>,
    latest_deadline: Instant,
}

/// Counts a request as in flight until dropped, including when the request
/// future is abandoned mid fan-out.
struct InflightGuard<'a> {
    count: &'a AtomicUsize,
}

impl<'a> InflightGuard<'a> {
    fn new(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard { count }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

/// Dispatches requests to providers and merges their answers.
///
/// Every candidate provider runs in its own task with its own deadline. A
/// provider that fails, panics, or runs out of time contributes nothing; the
/// request itself always succeeds.
pub struct Orchestrator {
    registry: Arc<Registry>,
    flags: Arc<FeatureFlags>,
    telemetry: Arc<dyn TelemetrySink>,
    settings: OrchestratorSettings,
    inflight: AtomicUsize,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<Registry>,
        flags: Arc<FeatureFlags>,
        telemetry: Arc<dyn TelemetrySink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Orchestrator {
            registry,
            flags,
            telemetry,
            settings,
            inflight: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Requests currently being dispatched.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    pub async fn suggest(&self, request: SuggestionRequest) -> SuggestResponse {
        let started = Instant::now();
        let _inflight = InflightGuard::new(&self.inflight);

        let request = Arc::new(request);
        let (candidates, decisions) = {
            let request_flags = self.flags.for_request(request.session_id());
            let candidates = self.select_candidates(&request, &request_flags);
            (candidates, request_flags.decisions())
        };

        tracing::debug!(
            correlation_id = request.correlation_id(),
            candidates = candidates.len(),
            "dispatching suggest request"
        );

        let results = if candidates.is_empty() {
            Vec::new()
        } else {
            let tasks = self.spawn_provider_tasks(candidates, &request);
            self.collect_results(tasks).await
        };
        let response = self.merge(results, &request);

        self.report_flag_decisions(&decisions);
        histogram!(REQUEST_DURATION).record(started.elapsed().as_secs_f64());
        response
    }

    /// Providers to query for `request`, in registration order.
    ///
    /// An explicit provider list selects among all registered providers;
    /// otherwise only providers enabled by default take part. Flag gated
    /// providers are then kept only when their flag is on for this request.
    fn select_candidates(
        &self,
        request: &SuggestionRequest,
        flags: &RequestFlags<'_>,
    ) -> Vec<&RegisteredProvider> {
        if let Some(names) = request.providers() {
            for name in names {
                if self.registry.get(name).is_none() {
                    tracing::debug!(provider = %name, "ignoring unknown provider in request");
                }
            }
        }

        self.registry
            .iter()
            .filter(|entry| match request.providers() {
                Some(names) => names.iter().any(|name| *name == entry.registration.name),
                None => entry.registration.enabled_by_default,
            })
            .filter(|entry| {
                entry
                    .registration
                    .flag
                    .as_deref()
                    .is_none_or(|flag| flags.is_enabled(flag))
            })
            .collect()
    }

    fn global_deadline(&self, request: &SuggestionRequest) -> Instant {
        request
            .deadline()
            .unwrap_or_else(|| request.received_at() + self.settings.global_timeout)
    }

    fn spawn_provider_tasks(
        &self,
        candidates: Vec<&RegisteredProvider>,
        request: &Arc<SuggestionRequest>,
    ) -> SpawnedTasks {
        let global_deadline = self.global_deadline(request);
        let mut join_set = JoinSet::new();
        let mut task_providers = HashMap::new();
        let mut latest_deadline = global_deadline;

        for entry in candidates {
            // A declared provider timeout wins over the global one, in both directions.
            let deadline = entry
                .registration
                .timeout
                .map(|timeout| request.received_at() + timeout)
                .unwrap_or(global_deadline);
            latest_deadline = latest_deadline.max(deadline);

            let provider = entry.provider.clone();
            let request = request.clone();
            let name = entry.registration.name.clone();
            let index = entry.registration.index;

            let abort_handle = join_set.spawn(async move {
                let started = Instant::now();
                let (outcome, suggestions) =
                    run_provider(provider.as_ref(), &name, &request, deadline).await;
                ProviderTaskResult {
                    name,
                    index,
                    outcome,
                    duration: started.elapsed(),
                    suggestions,
                }
            });

            task_providers.insert(
                abort_handle.id(),
                (entry.registration.name.clone(), Instant::now()),
            );
        }

        SpawnedTasks {
            join_set,
            task_providers,
            latest_deadline,
        }
    }

    async fn collect_results(&self, spawned: SpawnedTasks) -> Vec<ProviderTaskResult> {
        let SpawnedTasks {
            mut join_set,
            mut task_providers,
            latest_deadline,
        } = spawned;
        let mut results = Vec::with_capacity(join_set.len());

        let deadline = tokio::time::sleep_until(latest_deadline + COLLECTION_GRACE);
        tokio::pin!(deadline);

        while !join_set.is_empty() {
            tokio::select! {
                Some(join_result) = join_set.join_next_with_id() => {
                    match join_result {
                        Ok((id, result)) => {
                            task_providers.remove(&id);
                            self.telemetry.record_provider_outcome(
                                &result.name,
                                result.outcome,
                                result.duration,
                            );
                            results.push(result);
                        }
                        Err(e) => {
                            if let Some((name, spawned_at)) = task_providers.remove(&e.id()) {
                                tracing::error!(provider = %name, error = %e, "provider task failed");
                                self.telemetry.record_provider_outcome(
                                    &name,
                                    ProviderOutcome::Error,
                                    spawned_at.elapsed(),
                                );
                            }
                        }
                    }
                }
                _ = &mut deadline => {
                    tracing::warn!(
                        remaining = join_set.len(),
                        "provider tasks outlived their deadlines, aborting"
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        // Whatever is left was aborted above; none of it reaches the response.
        while let Some(join_result) = join_set.join_next_with_id().await {
            let id = match join_result {
                Ok((id, _)) => id,
                Err(e) => e.id(),
            };
            if let Some((name, spawned_at)) = task_providers.remove(&id) {
                self.telemetry.record_provider_outcome(
                    &name,
                    ProviderOutcome::Timeout,
                    spawned_at.elapsed(),
                );
            }
        }

        results
    }

    /// Orders suggestions by descending score. Equal scores keep registration
    /// order because the sort is stable and input is sorted by index first.
    fn merge(
        &self,
        mut results: Vec<ProviderTaskResult>,
        request: &SuggestionRequest,
    ) -> SuggestResponse {
        results.sort_by_key(|result| result.index);

        let mut suggestions: Vec<Suggestion> = results
            .into_iter()
            .flat_map(|result| result.suggestions)
            .filter(|suggestion| {
                let valid = suggestion.is_valid();
                if !valid {
                    tracing::warn!(
                        provider = suggestion.provider(),
                        score = suggestion.score(),
                        "dropping suggestion with out of range score"
                    );
                }
                valid
            })
            .collect();

        suggestions.sort_by(|a, b| b.score().total_cmp(&a.score()));

        let limit = request
            .limit()
            .map_or(self.settings.max_suggestions, |limit| {
                limit.min(self.settings.max_suggestions)
            });
        suggestions.truncate(limit);

        SuggestResponse {
            suggestions,
            request_id: request.request_id().map(str::to_string),
            client_variants: request.client_variants().to_vec(),
            server_variants: self.settings.server_variants.clone(),
        }
    }

    fn report_flag_decisions(&self, decisions: &[FlagDecision]) {
        for decision in decisions {
            self.telemetry
                .record_flag_decision(&decision.flag, decision.enabled, decision.scheme);
        }
    }
}

/// Validates and queries one provider under its deadline.
///
/// On expiry the provider's cancellation token fires while its query future
/// is still polled for a short wind-down, then the future is dropped. A late
/// answer is never observed either way.
async fn run_provider(
    provider: &dyn Provider,
    name: &str,
    request: &SuggestionRequest,
    deadline: Instant,
) -> (ProviderOutcome, Vec<Suggestion>) {
    if let Err(e) = provider.validate(request) {
        tracing::debug!(provider = %name, error = %e, "provider skipped request");
        return (ProviderOutcome::Invalid, Vec::new());
    }

    let cancel = CancellationToken::new();
    let ctx = QueryContext {
        deadline,
        cancel: cancel.clone(),
    };

    let mut query = provider.query(request, &ctx);
    // The query goes first so a backend that hits the shared deadline reports it itself.
    let finished = tokio::select! {
        biased;
        result = &mut query => Some(result),
        _ = tokio::time::sleep_until(deadline) => None,
    };
    let Some(result) = finished else {
        cancel.cancel();
        let _ = tokio::time::timeout(CANCEL_WIND_DOWN, &mut query).await;
        tracing::debug!(provider = %name, "provider deadline exceeded");
        return (ProviderOutcome::Timeout, Vec::new());
    };

    match result {
        Ok(suggestions) if suggestions.is_empty() => (ProviderOutcome::Empty, suggestions),
        Ok(suggestions) => (ProviderOutcome::Success, suggestions),
        // Backends enforce the same deadline and may hit it first.
        Err(ProviderError::Backend(BackendError::Timeout | BackendError::Cancelled)) => {
            tracing::debug!(provider = %name, "provider backend ran out of time");
            (ProviderOutcome::Timeout, Vec::new())
        }
        Err(e) if Instant::now() >= deadline => {
            tracing::debug!(provider = %name, error = %e, "provider failed at its deadline");
            (ProviderOutcome::Timeout, Vec::new())
        }
        Err(e) => {
            tracing::warn!(provider = %name, error = %e, "provider query failed");
            (ProviderOutcome::Error, Vec::new())
        }
    }
}
