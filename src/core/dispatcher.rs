//! Per-request pipeline: parse, resolve, transform, forward.
//!
//! ```text
//! Parsing ──malformed─────────────────────────────────────────▶ 400
//!    │
//! Resolving ──NotFound────────────────────────────────────────▶ 404
//!    │      ──Failed / panic──────────────────────────────────▶ 502
//!    │
//! Forwarding ──no upload or response in activity window───────▶ 504
//!            ──transport failure──────────────────────────────▶ 502
//!            ──response───────────────────────────────────────▶ relayed as is
//! ```
//!
//! Each request gets exactly one forward attempt. Error bodies are short fixed
//! strings; the details only go to the log.
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use futures_util::FutureExt;
use hyper::{Request, Response};
use thiserror::Error;
use tokio::time::Instant;
use tracing::Instrument;

use crate::{
    core::{
        resolver::{EndpointResolver, ResolutionOutcome, ResolvedEndpoint},
        route::{ForwardTail, RouteScheme, parse_route},
        transform::transform,
    },
    metrics::{self, ActiveRequestGuard, ForwardTimer},
    ports::http_client::{HttpClient, HttpClientError},
    tracing_setup::{create_backend_span, create_request_span},
    utils::{ActivityBody, ActivityClock, IdleTimeoutBody},
};

/// Default window for the game server to show activity.
pub const DEFAULT_ACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Failure of the single forward attempt
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("No activity between client and game server for {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Failed(#[from] HttpClientError),
}

/// Final state a request ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Forwarded,
    BadRequest,
    NotFound,
    ResolutionFailed,
    ForwardTimeout,
    ForwardFailed,
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Forwarded => "forwarded",
            DispatchOutcome::BadRequest => "bad_request",
            DispatchOutcome::NotFound => "not_found",
            DispatchOutcome::ResolutionFailed => "resolution_failed",
            DispatchOutcome::ForwardTimeout => "forward_timeout",
            DispatchOutcome::ForwardFailed => "forward_failed",
        }
    }

    /// Status the proxy answers with itself; `None` when the game server's
    /// response is relayed.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DispatchOutcome::Forwarded => None,
            DispatchOutcome::BadRequest => Some(StatusCode::BAD_REQUEST),
            DispatchOutcome::NotFound => Some(StatusCode::NOT_FOUND),
            DispatchOutcome::ResolutionFailed | DispatchOutcome::ForwardFailed => {
                Some(StatusCode::BAD_GATEWAY)
            }
            DispatchOutcome::ForwardTimeout => Some(StatusCode::GATEWAY_TIMEOUT),
        }
    }

    fn body(&self) -> &'static str {
        match self {
            DispatchOutcome::Forwarded => "",
            DispatchOutcome::BadRequest => "Malformed route",
            DispatchOutcome::NotFound => "Game server not found",
            DispatchOutcome::ResolutionFailed => "Unable to resolve game server",
            DispatchOutcome::ForwardTimeout => "Game server did not respond in time",
            DispatchOutcome::ForwardFailed => "Game server request failed",
        }
    }

    fn into_response(self) -> Response<AxumBody> {
        let status = self.status().unwrap_or(StatusCode::BAD_GATEWAY);
        (status, self.body()).into_response()
    }
}

/// Drives a request through the proxy pipeline.
#[derive(Clone)]
pub struct ProxyDispatcher {
    resolver: EndpointResolver,
    forwarder: Arc<dyn HttpClient>,
    activity_timeout: Duration,
}

impl ProxyDispatcher {
    pub fn new(
        resolver: EndpointResolver,
        forwarder: Arc<dyn HttpClient>,
        activity_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            forwarder,
            activity_timeout,
        }
    }

    /// Route scheme used to parse inbound paths.
    pub fn scheme(&self) -> RouteScheme {
        self.resolver.scheme()
    }

    pub fn activity_timeout(&self) -> Duration {
        self.activity_timeout
    }

    /// Handle one inbound request. Never fails: every error becomes a response.
    pub async fn dispatch(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let _active = ActiveRequestGuard::new();
        let start = Instant::now();
        let method = req.method().clone();
        let request_id = request_id(req.headers());
        let span = create_request_span(method.as_str(), req.uri().path(), &request_id);

        let (outcome, response) = self.run(req).instrument(span.clone()).await;

        let elapsed = start.elapsed();
        span.record("http.status_code", response.status().as_u16());
        span.record("duration_ms", elapsed.as_millis() as u64);
        metrics::increment_request_total(method.as_str(), outcome.label());
        metrics::record_request_duration(outcome.label(), elapsed);

        response
    }

    async fn run(&self, req: Request<AxumBody>) -> (DispatchOutcome, Response<AxumBody>) {
        let scheme = self.resolver.scheme();
        let parsed = match parse_route(scheme, req.uri()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, %scheme, "Rejecting malformed route");
                return reject(DispatchOutcome::BadRequest);
            }
        };

        let resolution = AssertUnwindSafe(self.resolver.resolve(&parsed.key))
            .catch_unwind()
            .await;

        let endpoint = match resolution {
            Ok(ResolutionOutcome::Found(endpoint)) => {
                metrics::increment_resolution_total(scheme.to_string().as_str(), "found");
                endpoint
            }
            Ok(ResolutionOutcome::NotFound) => {
                metrics::increment_resolution_total(scheme.to_string().as_str(), "not_found");
                tracing::info!(route = %parsed.key, "No game server for route");
                return reject(DispatchOutcome::NotFound);
            }
            Ok(ResolutionOutcome::Failed(e)) => {
                metrics::increment_resolution_total(scheme.to_string().as_str(), "failed");
                tracing::error!(route = %parsed.key, error = %e, "Endpoint resolution failed");
                return reject(DispatchOutcome::ResolutionFailed);
            }
            Err(panic) => {
                metrics::increment_resolution_total(scheme.to_string().as_str(), "panicked");
                tracing::error!(
                    route = %parsed.key,
                    panic = panic_message(&*panic),
                    "Endpoint resolution panicked"
                );
                return reject(DispatchOutcome::ResolutionFailed);
            }
        };

        match self.forward(&endpoint, &parsed.tail, req).await {
            Ok(response) => (DispatchOutcome::Forwarded, response),
            Err(ForwardError::Timeout(window)) => {
                tracing::error!(
                    endpoint = %endpoint,
                    timeout_ms = window.as_millis() as u64,
                    "No request or response activity within the activity window"
                );
                reject(DispatchOutcome::ForwardTimeout)
            }
            Err(ForwardError::Failed(e)) => {
                tracing::error!(endpoint = %endpoint, error = %e, "Forwarding to game server failed");
                reject(DispatchOutcome::ForwardFailed)
            }
        }
    }

    async fn forward(
        &self,
        endpoint: &ResolvedEndpoint,
        tail: &ForwardTail,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, ForwardError> {
        let method = req.method().clone();
        let outbound = transform(endpoint, tail, req)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        let span = create_backend_span(endpoint.as_str(), method.as_str(), outbound.uri().path());
        tracing::debug!(parent: &span, target_uri = %outbound.uri(), "Forwarding request");

        let window = self.activity_timeout;
        let clock = ActivityClock::new();
        let outbound = outbound.map(|body| AxumBody::new(ActivityBody::new(body, clock.clone())));

        let mut timer = ForwardTimer::new();
        let response = async {
            tokio::select! {
                result = self.forwarder.send_request(outbound) => {
                    result.map_err(ForwardError::from)
                }
                () = clock.idle(window) => Err(ForwardError::Timeout(window)),
            }
        }
        .instrument(span.clone())
        .await?;

        timer.set_status(response.status().as_u16());
        span.record("http.status_code", response.status().as_u16());

        Ok(response.map(|body| AxumBody::new(IdleTimeoutBody::new(body, window))))
    }
}

fn reject(outcome: DispatchOutcome) -> (DispatchOutcome, Response<AxumBody>) {
    (outcome, outcome.into_response())
}

fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
