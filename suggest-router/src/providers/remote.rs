use crate::backend::{BackendArgs, BackendClient, BackendError};
use crate::circuit_breaker::{BreakerSettings, CircuitBreaker, CircuitState};
use crate::config::RemoteConfig;
use crate::providers::{Provider, ProviderError, QueryContext};
use crate::request::SuggestionRequest;
use crate::suggestion::{Suggestion, SuggestionPayload};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Deserialize)]
struct RemoteResult {
    title: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct RemoteResults {
    results: Vec<RemoteResult>,
}

/// Suggestions from an external HTTP backend, guarded by a circuit breaker.
///
/// While the breaker is open the backend is not contacted and the provider
/// answers with no suggestions.
pub struct RemoteProvider {
    name: String,
    score: f64,
    max_results: usize,
    client: Arc<dyn BackendClient>,
    breaker: CircuitBreaker,
}

impl RemoteProvider {
    pub fn new(
        name: &str,
        score: f64,
        config: &RemoteConfig,
        client: Arc<dyn BackendClient>,
    ) -> Self {
        RemoteProvider {
            name: name.to_string(),
            score,
            max_results: config.max_results,
            client,
            breaker: CircuitBreaker::new(name, BreakerSettings::from(&config.breaker)),
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    async fn fetch(
        &self,
        args: &BackendArgs<'_>,
        ctx: &QueryContext,
    ) -> Result<Vec<RemoteResult>, BackendError> {
        let body = self.client.call(args, ctx.deadline, &ctx.cancel).await?;
        let decoded: RemoteResults =
            serde_json::from_slice(&body).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(decoded.results)
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        request: &SuggestionRequest,
        ctx: &QueryContext,
    ) -> Result<Vec<Suggestion>, ProviderError> {
        let args = BackendArgs {
            query: request.query(),
            languages: request.languages(),
            country: request.location().and_then(|l| l.country.as_deref()),
            limit: self.max_results,
        };

        let results = self
            .breaker
            .call(|| async { self.fetch(&args, ctx).await.map(Some) }, || None)
            .await?;

        let Some(results) = results else {
            tracing::debug!(provider = %self.name, "circuit open, skipping backend");
            return Ok(vec![]);
        };

        results
            .into_iter()
            .take(self.max_results)
            .map(|result| {
                Suggestion::new(
                    self.name.clone(),
                    self.score,
                    result.title,
                    result.url,
                    SuggestionPayload::Remote {
                        description: result.description,
                    },
                )
                .map_err(ProviderError::from)
            })
            .collect()
    }

    async fn shutdown(&self) {
        self.client.close().await;
    }
}
