//! Suggestion providers and the registry that owns them.
//!
//! Every provider kind implements [`Provider`]. The orchestrator only ever
//! talks to providers through that trait, so adding a kind means adding a
//! variant to `ProviderKind` and a branch in [`registry::Registry::from_config`].

pub mod registry;
pub mod remote;
pub mod top_picks;

use crate::backend::BackendError;
use crate::request::SuggestionRequest;
use crate::suggestion::{InvalidScore, Suggestion};
use async_trait::async_trait;
use synced_cache::CacheError;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use registry::{ProviderRegistration, RegisteredProvider, Registry};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request rejected: {0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("provider data is not loaded yet")]
    NotReady,

    #[error("provider produced an invalid suggestion: {0}")]
    InvalidSuggestion(#[from] InvalidScore),
}

/// Per-query execution context handed to a provider by the orchestrator.
#[derive(Clone, Debug)]
pub struct QueryContext {
    /// The instant by which the provider's answer must be available.
    pub deadline: Instant,
    /// Fires when the orchestrator gives up on this provider. The query is
    /// still polled briefly afterwards so in-flight backend calls can stop on
    /// their own; then it is dropped.
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap synchronous check run before `query`. An error excludes the
    /// provider from this request.
    fn validate(&self, _request: &SuggestionRequest) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn query(
        &self,
        request: &SuggestionRequest,
        ctx: &QueryContext,
    ) -> Result<Vec<Suggestion>, ProviderError>;

    /// Called once at startup, before the first query.
    async fn initialize(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Called once at teardown.
    async fn shutdown(&self) {}

    fn is_ready(&self) -> bool {
        true
    }
}
