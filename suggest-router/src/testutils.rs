use crate::backend::BackendError;
use crate::config::BucketingScheme;
use crate::providers::{Provider, ProviderError, QueryContext};
use crate::request::SuggestionRequest;
use crate::suggestion::{Suggestion, SuggestionPayload};
use crate::telemetry::{ProviderOutcome, TelemetrySink};
use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Starts an HTTP server on an ephemeral port that answers every request
/// with `handler`.
pub async fn spawn_http_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let handler = handler.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler(req).await) }
                });
                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    addr
}

pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .unwrap()
}

/// How a [`FakeProvider`] answers queries.
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Returns one suggestion per score after the delay.
    Respond { delay: Duration, scores: Vec<f64> },
    /// Never returns; only the deadline ends the query.
    Hang,
    /// Waits for its cancellation token, then gives up like a backend would.
    UntilCancelled,
    /// Fails with a provider error.
    Fail,
    /// Panics inside the query.
    Panic,
    /// Rejects every request during validation.
    RejectAll,
}

pub struct FakeProvider {
    name: String,
    behavior: Behavior,
    pub queries: AtomicUsize,
    /// Cancellation token of the most recent query.
    pub last_cancel: Mutex<Option<CancellationToken>>,
    /// Set once a query has seen its cancellation token fire.
    pub observed_cancel: AtomicBool,
    pub initialized: AtomicBool,
    pub shut_down: AtomicBool,
    ready: AtomicBool,
}

impl FakeProvider {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(FakeProvider {
            name: name.to_string(),
            behavior,
            queries: AtomicUsize::new(0),
            last_cancel: Mutex::new(None),
            observed_cancel: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            ready: AtomicBool::new(true),
        })
    }

    pub fn responding(name: &str, scores: &[f64]) -> Arc<Self> {
        Self::new(
            name,
            Behavior::Respond {
                delay: Duration::ZERO,
                scores: scores.to_vec(),
            },
        )
    }

    pub fn delayed(name: &str, delay: Duration, scores: &[f64]) -> Arc<Self> {
        Self::new(
            name,
            Behavior::Respond {
                delay,
                scores: scores.to_vec(),
            },
        )
    }

    pub fn was_cancelled(&self) -> bool {
        self.last_cancel
            .lock()
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn suggestions(&self, scores: &[f64]) -> Result<Vec<Suggestion>, ProviderError> {
        scores
            .iter()
            .enumerate()
            .map(|(i, score)| {
                Suggestion::new(
                    self.name.clone(),
                    *score,
                    format!("{} {i}", self.name),
                    format!("https://{}.example.com/{i}", self.name),
                    SuggestionPayload::Remote { description: None },
                )
                .map_err(ProviderError::from)
            })
            .collect()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, _request: &SuggestionRequest) -> Result<(), ProviderError> {
        match self.behavior {
            Behavior::RejectAll => Err(ProviderError::Validation("rejected".into())),
            _ => Ok(()),
        }
    }

    async fn query(
        &self,
        _request: &SuggestionRequest,
        ctx: &QueryContext,
    ) -> Result<Vec<Suggestion>, ProviderError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        *self.last_cancel.lock() = Some(ctx.cancel.clone());
        match &self.behavior {
            Behavior::Respond { delay, scores } => {
                tokio::time::sleep(*delay).await;
                self.suggestions(scores)
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::UntilCancelled => {
                ctx.cancel.cancelled().await;
                self.observed_cancel.store(true, Ordering::SeqCst);
                Err(ProviderError::Backend(BackendError::Cancelled))
            }
            Behavior::Fail => Err(ProviderError::NotReady),
            Behavior::Panic => panic!("provider {} exploded", self.name),
            Behavior::RejectAll => unreachable!("validation rejects every request"),
        }
    }

    async fn initialize(&self) -> Result<(), ProviderError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Telemetry sink that keeps everything it is given.
#[derive(Default)]
pub struct RecordingTelemetry {
    pub outcomes: Mutex<Vec<(String, ProviderOutcome)>>,
    pub flags: Mutex<Vec<(String, bool, BucketingScheme)>>,
}

impl RecordingTelemetry {
    pub fn outcome_for(&self, provider: &str) -> Option<ProviderOutcome> {
        self.outcomes
            .lock()
            .iter()
            .find(|(name, _)| name == provider)
            .map(|(_, outcome)| *outcome)
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn record_provider_outcome(&self, provider: &str, outcome: ProviderOutcome, _: Duration) {
        self.outcomes.lock().push((provider.to_string(), outcome));
    }

    fn record_flag_decision(&self, flag: &str, enabled: bool, scheme: BucketingScheme) {
        self.flags.lock().push((flag.to_string(), enabled, scheme));
    }
}
