use crate::http::{make_boxed_error_response, make_json_response};
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
}

/// Serves `/health` (liveness) and `/ready` (readiness) on the admin listener.
///
/// Readiness is decided by the `is_ready` callback on every probe, so the
/// service itself holds no state.
pub struct AdminService<F, E> {
    is_ready: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> AdminService<F, E>
where
    F: Fn() -> bool,
{
    pub fn new(is_ready: F) -> Self {
        Self {
            is_ready,
            _error: PhantomData,
        }
    }
}

impl<F, E> Service<Request<Incoming>> for AdminService<F, E>
where
    F: Fn() -> bool + Send + Sync + 'static,
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let response = route(req.method(), req.uri().path(), || (self.is_ready)());
        Box::pin(async move { Ok(response) })
    }
}

fn route<E: 'static>(
    method: &Method,
    path: &str,
    is_ready: impl FnOnce() -> bool,
) -> Response<BoxBody<Bytes, E>> {
    if method != Method::GET {
        return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    match path {
        "/health" => make_json_response(StatusCode::OK, &StatusBody { status: "ok" }),
        "/ready" => match is_ready() {
            true => make_json_response(StatusCode::OK, &StatusBody { status: "ready" }),
            false => make_json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &StatusBody {
                    status: "not_ready",
                },
            ),
        },
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn status(method: Method, path: &str, ready: bool) -> StatusCode {
        route::<Infallible>(&method, path, || ready).status()
    }

    #[test]
    fn test_health_is_always_ok() {
        assert_eq!(status(Method::GET, "/health", false), StatusCode::OK);
        assert_eq!(status(Method::GET, "/health", true), StatusCode::OK);
    }

    #[test]
    fn test_ready_follows_callback() {
        assert_eq!(status(Method::GET, "/ready", true), StatusCode::OK);
        assert_eq!(
            status(Method::GET, "/ready", false),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_unknown_path_and_method() {
        assert_eq!(status(Method::GET, "/metrics", true), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Method::POST, "/health", true),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
