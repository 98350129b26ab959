use crate::circuit_breaker::{ClassifiedError, FailureKind};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::ACCEPT_LANGUAGE;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(String),

    #[error("backend returned HTTP {0}")]
    Status(u16),

    #[error("backend response could not be decoded: {0}")]
    Decode(String),

    #[error("backend call timed out")]
    Timeout,

    #[error("backend call cancelled")]
    Cancelled,
}

impl ClassifiedError for BackendError {
    fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            BackendError::Request(_) => Some(FailureKind::Request),
            BackendError::Status(_) => Some(FailureKind::Status),
            BackendError::Decode(_) => Some(FailureKind::Decode),
            BackendError::Timeout => Some(FailureKind::Timeout),
            BackendError::Cancelled => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Request(err.to_string())
        }
    }
}

/// What a backend needs to know about a suggest request.
#[derive(Clone, Copy, Debug)]
pub struct BackendArgs<'a> {
    pub query: &'a str,
    pub languages: &'a [String],
    pub country: Option<&'a str>,
    pub limit: usize,
}

/// Client for an external suggestion backend.
///
/// Implementations must stop working on the call as soon as `cancel` fires
/// or `deadline` passes.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn call(
        &self,
        args: &BackendArgs<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Bytes, BackendError>;

    /// Releases held resources at shutdown.
    async fn close(&self) {}
}

pub struct HttpBackend {
    client: reqwest::Client,
    url: Url,
}

impl HttpBackend {
    pub fn new(url: Url, connect_timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(HttpBackend { client, url })
    }

    fn request_url(&self, args: &BackendArgs<'_>) -> Url {
        let mut url = self.url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", args.query);
            pairs.append_pair("limit", &args.limit.to_string());
            if let Some(country) = args.country {
                pairs.append_pair("country", country);
            }
        }
        url
    }

    async fn fetch(&self, args: &BackendArgs<'_>) -> Result<Bytes, BackendError> {
        let mut request = self.client.get(self.request_url(args));
        if !args.languages.is_empty() {
            request = request.header(ACCEPT_LANGUAGE, args.languages.join(","));
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(BackendError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    async fn call(
        &self,
        args: &BackendArgs<'_>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Bytes, BackendError> {
        // Dropping the fetch future aborts the underlying HTTP request.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // A caller giving up at the deadline is still a timeout for the breaker.
                if Instant::now() >= deadline {
                    Err(BackendError::Timeout)
                } else {
                    Err(BackendError::Cancelled)
                }
            }
            result = tokio::time::timeout_at(deadline, self.fetch(args)) => {
                result.unwrap_or(Err(BackendError::Timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{spawn_http_server, text_response};
    use hyper::StatusCode as HyperStatus;

    async fn start_backend() -> Url {
        let addr = spawn_http_server(|req| async move {
            match req.uri().path() {
                "/ok" => {
                    let query = req.uri().query().unwrap_or_default().to_string();
                    let language = req
                        .headers()
                        .get("accept-language")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    text_response(HyperStatus::OK, format!("{query}|{language}"))
                }
                "/slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    text_response(HyperStatus::OK, "late")
                }
                _ => text_response(HyperStatus::SERVICE_UNAVAILABLE, ""),
            }
        })
        .await;
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn args<'a>(languages: &'a [String]) -> BackendArgs<'a> {
        BackendArgs {
            query: "rust lang",
            languages,
            country: Some("DE"),
            limit: 3,
        }
    }

    #[tokio::test]
    async fn test_http_backend_success() {
        let base = start_backend().await;
        let backend = HttpBackend::new(base.join("ok").unwrap(), Duration::from_secs(1)).unwrap();
        let languages = vec!["de-DE".to_string(), "en".to_string()];

        let body = backend
            .call(
                &args(&languages),
                Instant::now() + Duration::from_secs(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"q=rust+lang&limit=3&country=DE|de-DE,en"));
    }

    #[tokio::test]
    async fn test_http_backend_status_error() {
        let base = start_backend().await;
        let backend = HttpBackend::new(base.join("down").unwrap(), Duration::from_secs(1)).unwrap();
        let err = backend
            .call(
                &args(&[]),
                Instant::now() + Duration::from_secs(2),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Status(503)));
        assert_eq!(err.failure_kind(), Some(FailureKind::Status));
    }

    #[tokio::test]
    async fn test_http_backend_deadline_and_cancel() {
        let base = start_backend().await;
        let backend = HttpBackend::new(base.join("slow").unwrap(), Duration::from_secs(1)).unwrap();

        let started = Instant::now();
        let err = backend
            .call(
                &args(&[]),
                Instant::now() + Duration::from_millis(50),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(1));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = backend
            .call(&args(&[]), Instant::now() + Duration::from_secs(2), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Cancelled));
        assert_eq!(err.failure_kind(), None);
    }

    #[tokio::test]
    async fn test_cancel_past_deadline_counts_as_timeout() {
        let base = start_backend().await;
        let backend = HttpBackend::new(base.join("slow").unwrap(), Duration::from_secs(1)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = backend
            .call(&args(&[]), Instant::now() - Duration::from_millis(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout));
        assert_eq!(err.failure_kind(), Some(FailureKind::Timeout));
    }
}
