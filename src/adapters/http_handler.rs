use std::sync::Arc;

use axum::{Router, body::Body as AxumBody, extract::State};
use eyre::Result;
use hyper::{Request, Response};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    adapters::{HttpClientAdapter, PlayFabDirectory, StaticMatchDirectory},
    config::models::ProxyConfig,
    core::{
        dispatcher::ProxyDispatcher,
        resolver::{BuildSessionResolver, EndpointResolver, MatchResolver},
        route::RouteScheme,
    },
};

/// Inbound HTTP surface of the proxy: every path and method goes to the dispatcher.
#[derive(Clone)]
pub struct HttpHandler {
    dispatcher: Arc<ProxyDispatcher>,
    cors_enabled: bool,
}

impl HttpHandler {
    pub fn new(dispatcher: ProxyDispatcher, cors_enabled: bool) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            cors_enabled,
        }
    }

    /// Wire the resolver, forwarding client and dispatcher described by `config`.
    pub async fn from_config(config: &ProxyConfig) -> Result<Self> {
        let resolver = match config.route_scheme {
            RouteScheme::BuildSessionRegion => {
                let directory = PlayFabDirectory::new(&config.directory)?;
                EndpointResolver::BuildSession(BuildSessionResolver::new(
                    Arc::new(directory),
                    config.endpoint.scheme.clone(),
                    config.endpoint.port_selection.clone(),
                ))
            }
            RouteScheme::MatchId => {
                let directory =
                    StaticMatchDirectory::from_entries(config.match_servers.clone()).await;
                tracing::info!(matches = directory.len(), "Loaded static match table");
                EndpointResolver::Match(MatchResolver::new(Arc::new(directory)))
            }
        };

        let forwarder = Arc::new(HttpClientAdapter::new(config.forwarding.connect_timeout())?);
        let dispatcher =
            ProxyDispatcher::new(resolver, forwarder, config.forwarding.activity_timeout());

        tracing::info!(
            scheme = %config.route_scheme,
            port_selection = %config.endpoint.port_selection,
            activity_timeout_secs = config.forwarding.activity_timeout_secs,
            cors = config.cors.enabled,
            "Proxy pipeline ready"
        );

        Ok(Self::new(dispatcher, config.cors.enabled))
    }

    pub fn dispatcher(&self) -> &ProxyDispatcher {
        &self.dispatcher
    }

    /// Build the axum router serving all inbound traffic.
    pub fn router(self) -> Router {
        let cors_enabled = self.cors_enabled;
        let router = Router::new()
            .fallback(proxy)
            .with_state(self)
            .layer(TraceLayer::new_for_http());

        if cors_enabled {
            router.layer(CorsLayer::very_permissive())
        } else {
            router
        }
    }
}

async fn proxy(State(handler): State<HttpHandler>, req: Request<AxumBody>) -> Response<AxumBody> {
    handler.dispatcher.dispatch(req).await
}
