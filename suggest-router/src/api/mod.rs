//! HTTP surface of the suggest router.

pub mod params;

use crate::errors::SuggestRouterError;
use crate::orchestrator::Orchestrator;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use params::parse_suggest_request;
use serde::Serialize;
use shared::http::{make_boxed_error_response, make_json_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerBody = BoxBody<Bytes, SuggestRouterError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct ProviderInfo<'a> {
    id: &'a str,
    availability: &'static str,
}

#[derive(Serialize)]
struct ProvidersBody<'a> {
    providers: Vec<ProviderInfo<'a>>,
}

/// Serves `/api/v1/suggest` and `/api/v1/providers`.
pub struct SuggestService {
    orchestrator: Arc<Orchestrator>,
}

impl SuggestService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

impl Service<Request<Incoming>> for SuggestService {
    type Response = Response<HandlerBody>;
    type Error = SuggestRouterError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let orchestrator = self.orchestrator.clone();
        Box::pin(async move { Ok(handle(&orchestrator, req).await) })
    }
}

/// Routes one request. The body is never read.
pub async fn handle<B>(orchestrator: &Orchestrator, req: Request<B>) -> Response<HandlerBody> {
    if req.method() != Method::GET {
        return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    // Owned so that no borrow of the request is held across the fan-out.
    let path = req.uri().path().to_owned();
    match path.as_str() {
        "/api/v1/suggest" => {
            let parsed = parse_suggest_request(req.uri().query(), req.headers());
            let request = match parsed {
                Ok(request) => request,
                Err(e) => {
                    tracing::debug!(error = %e, "rejecting suggest request");
                    return make_json_response(
                        StatusCode::BAD_REQUEST,
                        &ErrorBody {
                            error: e.to_string(),
                        },
                    );
                }
            };
            let response = orchestrator.suggest(request).await;
            make_json_response(StatusCode::OK, &response)
        }
        "/api/v1/providers" => {
            let providers = orchestrator
                .registry()
                .iter()
                .map(|entry| ProviderInfo {
                    id: &entry.registration.name,
                    availability: if entry.registration.enabled_by_default {
                        "enabled_by_default"
                    } else {
                        "disabled_by_default"
                    },
                })
                .collect();
            make_json_response(StatusCode::OK, &ProvidersBody { providers })
        }
        path => {
            tracing::debug!(path, "no route matched");
            make_boxed_error_response(StatusCode::NOT_FOUND)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_flags::FeatureFlags;
    use crate::orchestrator::OrchestratorSettings;
    use crate::providers::{ProviderRegistration, RegisteredProvider, Registry};
    use crate::telemetry::NoopTelemetry;
    use crate::testutils::FakeProvider;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn orchestrator() -> Orchestrator {
        let entries = [("top_picks", true, 0.25), ("remote", false, 0.3)]
            .into_iter()
            .map(|(name, enabled_by_default, score)| RegisteredProvider {
                registration: ProviderRegistration {
                    name: name.to_string(),
                    enabled_by_default,
                    timeout: None,
                    score,
                    flag: None,
                    index: 0,
                },
                provider: FakeProvider::responding(name, &[score]),
            })
            .collect();

        Orchestrator::new(
            Arc::new(Registry::new(entries)),
            Arc::new(FeatureFlags::default()),
            Arc::new(NoopTelemetry),
            OrchestratorSettings {
                global_timeout: Duration::from_millis(200),
                max_suggestions: 10,
                server_variants: vec!["s1".into()],
            },
        )
    }

    async fn call(method: Method, uri: &str) -> (StatusCode, Option<Value>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-geo-country", "US")
            .body(())
            .unwrap();
        let response = handle(&orchestrator(), request).await;
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).ok())
    }

    #[tokio::test]
    async fn test_suggest_endpoint() {
        let (status, body) = call(
            Method::GET,
            "/api/v1/suggest?q=amaz&request_id=abc&client_variants=c1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let body = body.unwrap();
        assert_eq!(body["request_id"], json!("abc"));
        assert_eq!(body["client_variants"], json!(["c1"]));
        assert_eq!(body["server_variants"], json!(["s1"]));
        let suggestions = body["suggestions"].as_array().unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0]["provider"], json!("top_picks"));
    }

    #[tokio::test]
    async fn test_suggest_with_explicit_providers() {
        let (status, body) =
            call(Method::GET, "/api/v1/suggest?q=amaz&providers=remote,top_picks").await;
        assert_eq!(status, StatusCode::OK);

        let providers: Vec<Value> = body.unwrap()["suggestions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["provider"].clone())
            .collect();
        assert_eq!(providers, vec![json!("remote"), json!("top_picks")]);
    }

    #[tokio::test]
    async fn test_suggest_bad_request() {
        let (status, body) = call(Method::GET, "/api/v1/suggest?limit=3").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.unwrap()["error"].as_str().unwrap().contains("`q`"));

        let (status, _) = call(Method::GET, "/api/v1/suggest?q=a&limit=many").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_providers_endpoint() {
        let (status, body) = call(Method::GET, "/api/v1/providers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body.unwrap(),
            json!({"providers": [
                {"id": "top_picks", "availability": "enabled_by_default"},
                {"id": "remote", "availability": "disabled_by_default"},
            ]})
        );
    }

    #[tokio::test]
    async fn test_unknown_routes() {
        assert_eq!(call(Method::GET, "/api/v2/suggest").await.0, StatusCode::NOT_FOUND);
        assert_eq!(
            call(Method::POST, "/api/v1/suggest?q=a").await.0,
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
