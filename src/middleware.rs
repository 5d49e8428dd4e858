use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use axum::{extract::Request, http::HeaderMap, response::Response};
use opentelemetry::propagation::Extractor;
use std::future::Future;
use tower::{Layer, Service};
use tracing::{Instrument, info, span, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    pub static REQUEST_CONTEXT: RequestContext;
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub endpoint: String,
    pub method: String,
    pub request_id: String,
    /// Tenant addressed by a `/t/{domain}/...` path, empty otherwise.
    pub tenant: String,
}

pub fn with_request_info<F, R>(f: F) -> R
where
    F: Fn(&RequestContext) -> R,
{
    REQUEST_CONTEXT.try_with(|r| f(r)).unwrap_or_else(|_| {
        static DEFAULT_CTX: RequestContext = RequestContext {
            endpoint: String::new(),
            method: String::new(),
            request_id: String::new(),
            tenant: String::new(),
        };
        f(&DEFAULT_CTX)
    })
}

/// Extracts the tenant domain from tenant-qualified paths.
pub fn tenant_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/t/")
        .and_then(|rest| rest.split('/').next())
        .filter(|tenant| !tenant.is_empty())
}

pub struct HeaderExtractor<'a> {
    headers: &'a HeaderMap,
}

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .and_then(|header| header.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(|h| h.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct RequestTraceService<S> {
    inner: S,
}

impl<S> RequestTraceService<S> {
    pub fn new(inner: S) -> Self {
        RequestTraceService { inner }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestTraceService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    // Boxed because `.instrument()` changes the future type.
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let parent_context = opentelemetry::global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor {
                headers: req.headers(),
            })
        });

        let endpoint = req.uri().path().to_string();
        let ctx = RequestContext {
            tenant: tenant_from_path(&endpoint).unwrap_or_default().to_string(),
            method: req.method().to_string(),
            request_id: req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            endpoint,
        };

        let request_span = span!(
            tracing::Level::INFO,
            "request",
            endpoint = %ctx.endpoint,
            tenant = %ctx.tenant,
            request_id = %ctx.request_id,
        );

        if let Err(err) = request_span.set_parent(parent_context) {
            warn!(
                error = debug(err),
                "unable to set otel parent, span will be new instead"
            );
        } else {
            info!(
                traceparent = ?req.headers().get("traceparent"),
                "trace parent set"
            )
        }

        let started = Instant::now();
        let fut = self.inner.call(req);
        Box::pin(async move {
            REQUEST_CONTEXT
                .scope(ctx, async move {
                    let response: Result<Self::Response, Self::Error> =
                        fut.instrument(request_span).await;

                    if let Ok(ref res) = response {
                        let status = res.status();
                        with_request_info(|ctx| {
                            tracing::info!(
                                endpoint = %ctx.endpoint,
                                tenant = %ctx.tenant,
                                requestId = %ctx.request_id,
                                httpMethod = %ctx.method,
                                status = %status.as_u16(),
                                latency_ms = started.elapsed().as_millis() as u64,
                                "request to {} finished",
                                ctx.endpoint
                            );
                        });
                    }

                    response
                })
                .await
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestTraceLayer {}

impl RequestTraceLayer {
    pub fn new() -> Self {
        RequestTraceLayer {}
    }
}

impl<S> Layer<S> for RequestTraceLayer {
    type Service = RequestTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTraceService::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, routing::get};
    use tower::ServiceExt;

    #[test]
    fn test_tenant_from_path() {
        assert_eq!(tenant_from_path("/t/foo.com/oauth2/jwks"), Some("foo.com"));
        assert_eq!(tenant_from_path("/t//oauth2/jwks"), None);
        assert_eq!(tenant_from_path("/oauth2/jwks"), None);
    }

    #[test]
    fn test_request_info_defaults_outside_a_request() {
        let endpoint = with_request_info(|ctx| ctx.endpoint.clone());
        assert!(endpoint.is_empty());
    }

    #[tokio::test]
    async fn test_layer_exposes_request_context_to_handlers() {
        let app = Router::new()
            .route(
                "/t/{tenant}/oauth2/jwks",
                get(|| async {
                    with_request_info(|ctx| format!("{}|{}|{}", ctx.tenant, ctx.request_id, ctx.method))
                }),
            )
            .layer(RequestTraceLayer::new());

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/t/foo.com/oauth2/jwks")
                    .header(REQUEST_ID_HEADER, "req-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"foo.com|req-1|GET");
    }
}
