// Fake directory and game server shared by the integration tests
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    routing::{any, post},
};
use gameserver_proxy::{HttpHandler, config::ProxyConfig};
use serde_json::{Value, json};
use tokio::net::TcpListener;

pub const BUILD: &str = "11111111-1111-1111-1111-111111111111";
pub const SESSION: &str = "22222222-2222-2222-2222-222222222222";
/// Session for which the fake directory answers with an internal error
pub const BROKEN_SESSION: &str = "33333333-3333-3333-3333-333333333333";
pub const SECRET_KEY: &str = "s3cret";
pub const VALID_TOKEN: &str = "valid-token";

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Game server that echoes what it received as JSON. `/slow` stalls for 3s.
pub async fn spawn_game_server() -> SocketAddr {
    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
        if uri.path() == "/slow" {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        let header = |name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        Json(json!({
            "method": method.as_str(),
            "uri": uri.to_string(),
            "host": header(header::HOST),
            "cookie": header(header::COOKIE),
            "body": String::from_utf8_lossy(&body),
        }))
    }

    serve(Router::new().fallback(any(echo))).await
}

/// PlayFab stand-in. Hands out `tokens` in order (repeating the last one) and
/// only accepts [`VALID_TOKEN`] on the details endpoint.
pub struct FakePlayFab {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

struct FakeState {
    game_server: SocketAddr,
    tokens: Vec<&'static str>,
    token_calls: AtomicUsize,
    detail_calls: AtomicUsize,
}

impl FakePlayFab {
    pub async fn spawn(game_server: SocketAddr) -> Self {
        Self::spawn_with_tokens(game_server, vec![VALID_TOKEN]).await
    }

    pub async fn spawn_with_tokens(game_server: SocketAddr, tokens: Vec<&'static str>) -> Self {
        let state = Arc::new(FakeState {
            game_server,
            tokens,
            token_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
        });

        let router = Router::new()
            .route("/Authentication/GetEntityToken", post(entity_token))
            .route(
                "/MultiplayerServer/GetMultiplayerServerDetails",
                post(server_details),
            )
            .with_state(state.clone());

        Self {
            addr: serve(router).await,
            state,
        }
    }

    pub fn token_calls(&self) -> usize {
        self.state.token_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.state.detail_calls.load(Ordering::SeqCst)
    }

    /// Proxy configuration pointing at this directory.
    pub fn proxy_config(&self) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.directory.title_id = "TEST".to_string();
        config.directory.secret_key = SECRET_KEY.to_string();
        config.directory.base_url = Some(format!("http://{}", self.addr));
        config
    }
}

fn error_envelope(status: StatusCode, error: &str, error_code: u32) -> (StatusCode, Json<Value>) {
    (
        status,
        Json(json!({
            "code": status.as_u16(),
            "status": status.canonical_reason().unwrap_or_default(),
            "error": error,
            "errorCode": error_code,
            "errorMessage": error,
        })),
    )
}

async fn entity_token(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if headers.get("x-secretkey").and_then(|v| v.to_str().ok()) != Some(SECRET_KEY) {
        return error_envelope(StatusCode::UNAUTHORIZED, "NotAuthenticated", 1074);
    }

    let call = state.token_calls.fetch_add(1, Ordering::SeqCst);
    // Widen the window in which concurrent callers could race a second refresh.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let token = state
        .tokens
        .get(call)
        .or(state.tokens.last())
        .copied()
        .unwrap_or(VALID_TOKEN);
    let expiration = chrono::Utc::now() + chrono::Duration::hours(1);

    (
        StatusCode::OK,
        Json(json!({
            "code": 200,
            "status": "OK",
            "data": {
                "EntityToken": token,
                "TokenExpiration": expiration.to_rfc3339(),
                "Entity": { "Id": "TEST", "Type": "title" }
            }
        })),
    )
}

async fn server_details(
    State(state): State<Arc<FakeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.detail_calls.fetch_add(1, Ordering::SeqCst);

    if headers.get("x-entitytoken").and_then(|v| v.to_str().ok()) != Some(VALID_TOKEN) {
        return error_envelope(StatusCode::UNAUTHORIZED, "NotAuthenticated", 1074);
    }
    if body["BuildId"] != BUILD || body["Region"].as_str().is_none() {
        return error_envelope(StatusCode::BAD_REQUEST, "InvalidRequest", 1000);
    }

    match body["SessionId"].as_str() {
        Some(SESSION) => (
            StatusCode::OK,
            Json(json!({
                "code": 200,
                "status": "OK",
                "data": {
                    "BuildId": BUILD,
                    "SessionId": SESSION,
                    "FQDN": state.game_server.ip().to_string(),
                    "IPV4Address": state.game_server.ip().to_string(),
                    "Region": body["Region"],
                    "State": "Active",
                    "Ports": [
                        { "Name": "game_port", "Num": state.game_server.port(), "Protocol": "TCP" }
                    ]
                }
            })),
        ),
        Some(BROKEN_SESSION) => {
            error_envelope(StatusCode::INTERNAL_SERVER_ERROR, "InternalServerError", 1110)
        }
        _ => error_envelope(StatusCode::NOT_FOUND, "MultiplayerServerNotFound", 6009),
    }
}

pub async fn start_proxy(config: ProxyConfig) -> SocketAddr {
    let handler = HttpHandler::from_config(&config).await.unwrap();
    serve(handler.router()).await
}
