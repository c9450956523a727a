use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use hyper::{
    HeaderMap, Request, Response, StatusCode, Version,
    header::{self, HeaderName, HeaderValue},
    upgrade::OnUpgrade,
};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioIo},
};
use rustls_native_certs::load_native_certs;

use crate::{
    metrics,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Forwarding engine built on the hyper-util pooled client with Rustls.
///
/// * Rewrites `Host` to the game server's authority
/// * Strips hop-by-hop headers, except for protocol upgrades
/// * Tunnels upgraded connections (WebSocket) in both directions
/// * Never follows redirects and never decodes response bodies
///
/// Timeouts on the response are the dispatcher's concern; this adapter only
/// bounds how long establishing a TCP connection may take.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
}

impl HttpClientAdapter {
    /// Create a new forwarding client.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(Some(connect_timeout));
        http_connector.set_nodelay(true);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                errors = ?native_certs.errors,
                "Some native certificates failed to load"
            );
        }
        tracing::debug!(roots = root_cert_store.len(), "Loaded native root certificates");

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .build::<_, AxumBody>(https_connector);

        tracing::info!(
            connect_timeout_ms = connect_timeout.as_millis() as u64,
            "Created game server forwarding client"
        );
        Ok(Self { client })
    }

    /// Prepare an outbound request: Host rewrite, hop-by-hop removal, HTTP/1.1.
    fn prepare(req: &mut Request<AxumBody>, upgrading: bool) -> HttpClientResult<()> {
        let host = match (req.uri().host(), req.uri().port_u16()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(HttpClientError::InvalidRequest(format!(
                    "Outgoing URI has no host: {}",
                    req.uri()
                )));
            }
        };
        let host = HeaderValue::from_str(&host)
            .map_err(|e| HttpClientError::InvalidRequest(format!("Invalid host header: {e}")))?;

        let headers = req.headers_mut();
        headers.insert(header::HOST, host);
        strip_hop_by_hop(headers, upgrading);

        *req.version_mut() = Version::HTTP_11;
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        let upgrading = is_upgrade_request(req.headers());
        let client_upgrade = if upgrading {
            req.extensions_mut().remove::<OnUpgrade>()
        } else {
            None
        };

        Self::prepare(&mut req, upgrading)?;

        tracing::debug!(
            method = %req.method(),
            uri = %req.uri(),
            upgrading,
            "Sending request to game server"
        );

        let method = req.method().clone();
        let uri = req.uri().clone();
        let mut response = self.client.request(req).await.map_err(|e| {
            HttpClientError::ConnectionError(format!("Request to {method} {uri} failed: {e}"))
        })?;

        let switching = response.status() == StatusCode::SWITCHING_PROTOCOLS;
        if switching {
            match client_upgrade {
                Some(client_upgrade) => {
                    let upstream_upgrade = hyper::upgrade::on(&mut response);
                    spawn_tunnel(client_upgrade, upstream_upgrade, uri.to_string());
                }
                None => tracing::warn!(
                    %uri,
                    "Game server switched protocols but the inbound connection cannot be upgraded"
                ),
            }
        }

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers, switching);

        Ok(Response::from_parts(parts, AxumBody::new(body)))
    }
}

fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
///
/// When `keep_upgrade` is set, `Connection` and `Upgrade` survive so the
/// handshake can complete end to end.
fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .filter(|name| !(keep_upgrade && name == header::UPGRADE))
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in HOP_BY_HOP {
        if keep_upgrade && (name == header::CONNECTION || name == header::UPGRADE) {
            continue;
        }
        headers.remove(name);
    }
    headers.remove("keep-alive");
}

fn spawn_tunnel(client: OnUpgrade, upstream: OnUpgrade, target: String) {
    tokio::spawn(async move {
        let (client, upstream) = match tokio::try_join!(client, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, %target, "Connection upgrade failed");
                return;
            }
        };
        metrics::increment_upgraded_tunnels();
        tracing::debug!(%target, "Upgraded connection established");

        let mut client = TokioIo::new(client);
        let mut upstream = TokioIo::new(upstream);
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((to_server, to_client)) => {
                tracing::debug!(%target, to_server, to_client, "Upgraded connection closed")
            }
            Err(e) => tracing::debug!(error = %e, %target, "Upgraded connection ended with error"),
        }
    });
}

#[cfg(test)]
mod tests {
    use axum::{Router, routing::any};
    use http_body_util::BodyExt;

    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        assert!(HttpClientAdapter::new(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_prepare_rewrites_host_and_strips_hop_by_hop() {
        let mut req = Request::builder()
            .uri("http://game01.example.com:7777/lobby")
            .header(header::HOST, "proxy.example.com")
            .header(header::CONNECTION, "keep-alive, x-session-hint")
            .header("keep-alive", "timeout=5")
            .header("x-session-hint", "abc")
            .header(header::TE, "trailers")
            .header(header::COOKIE, "session=1")
            .body(AxumBody::empty())
            .unwrap();

        HttpClientAdapter::prepare(&mut req, false).unwrap();

        let headers = req.headers();
        assert_eq!(headers[header::HOST], "game01.example.com:7777");
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("keep-alive"));
        assert!(!headers.contains_key("x-session-hint"));
        assert!(!headers.contains_key(header::TE));
        assert_eq!(headers[header::COOKIE], "session=1");
        assert_eq!(req.version(), Version::HTTP_11);
    }

    #[test]
    fn test_prepare_keeps_upgrade_headers() {
        let mut req = Request::builder()
            .uri("http://game01.example.com:7777/ws")
            .header(header::CONNECTION, "Upgrade")
            .header(header::UPGRADE, "websocket")
            .body(AxumBody::empty())
            .unwrap();

        assert!(is_upgrade_request(req.headers()));
        HttpClientAdapter::prepare(&mut req, true).unwrap();

        assert_eq!(req.headers()[header::CONNECTION], "Upgrade");
        assert_eq!(req.headers()[header::UPGRADE], "websocket");
    }

    #[test]
    fn test_prepare_rejects_relative_uri() {
        let mut req = Request::builder()
            .uri("/lobby")
            .body(AxumBody::empty())
            .unwrap();
        assert!(matches!(
            HttpClientAdapter::prepare(&mut req, false),
            Err(HttpClientError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_forwards_to_local_server() {
        let app = Router::new().fallback(any(|req: Request<AxumBody>| async move {
            let host = req.headers()[header::HOST].to_str().unwrap().to_string();
            let target = req.uri().to_string();
            (StatusCode::ACCEPTED, format!("{host} {target}"))
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = HttpClientAdapter::new(Duration::from_secs(5)).unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/lobby/state?team=red"))
            .body(AxumBody::empty())
            .unwrap();

        let response = client.send_request(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            String::from_utf8(body.to_vec()).unwrap(),
            format!("{addr} /lobby/state?team=red")
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpClientAdapter::new(Duration::from_secs(1)).unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();

        assert!(matches!(
            client.send_request(req).await,
            Err(HttpClientError::ConnectionError(_))
        ));
    }
}
