//! PlayFab multiplayer directory client.
//!
//! Two REST calls are used:
//!
//! ```text
//! POST {base}/Authentication/GetEntityToken                  X-SecretKey: <title secret>
//! POST {base}/MultiplayerServer/GetMultiplayerServerDetails  X-EntityToken: <token>
//! ```
//!
//! Both answer with the same envelope (`code`, `status`, `data`, or on failure
//! `error`, `errorCode`, `errorMessage`). The entity token is cached and shared
//! by all lookups; see [`EntityTokenCache`].
use std::{future::Future, sync::Arc, time::Duration};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use reqwest::{
    StatusCode,
    header::{HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    config::models::{DirectoryConfig, ENTITY_TOKEN_LIFETIME},
    core::route::Region,
    metrics,
    ports::directory::{DirectoryError, DirectoryResult, ServerDetails, ServerDirectory, ServerPort},
};

const SECRET_KEY_HEADER: &str = "x-secretkey";
const ENTITY_TOKEN_HEADER: &str = "x-entitytoken";
const SERVER_NOT_FOUND: &str = "MultiplayerServerNotFound";

/// Lifetime assumed when the directory omits `TokenExpiration`.
const DEFAULT_TOKEN_LIFETIME: Duration = ENTITY_TOKEN_LIFETIME;

/// A title entity token and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl EntityToken {
    /// Whether the token stays valid for longer than `margin`.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        (self.expires_at - Utc::now())
            .to_std()
            .map(|left| left > margin)
            .unwrap_or(false)
    }
}

/// Single-flight cache for the entity token.
///
/// Readers take the fast path through an `ArcSwapOption`. When the token is
/// missing or about to expire, callers queue on a mutex; the first one fetches
/// and stores the new token, the rest find it already fresh once they get the
/// lock. A failed fetch is not cached, so the next caller in line tries again.
pub struct EntityTokenCache {
    current: ArcSwapOption<EntityToken>,
    refresh: Mutex<()>,
    margin: Duration,
}

impl EntityTokenCache {
    pub fn new(margin: Duration) -> Self {
        Self {
            current: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
            margin,
        }
    }

    /// Cached token if it is still fresh.
    pub fn cached(&self) -> Option<Arc<EntityToken>> {
        self.current
            .load_full()
            .filter(|token| token.is_fresh(self.margin))
    }

    /// Return the cached token or run `fetch` to obtain a new one.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> DirectoryResult<Arc<EntityToken>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DirectoryResult<EntityToken>>,
    {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let token = Arc::new(fetch().await?);
        self.current.store(Some(token.clone()));
        Ok(token)
    }

    /// Drop `stale` from the cache unless it has already been replaced.
    pub fn invalidate(&self, stale: &EntityToken) {
        let current = self.current.load_full();
        if current.as_deref() == Some(stale) {
            self.current.store(None);
        }
    }
}

/// Response envelope shared by all PlayFab endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope<T> {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    status: String,
    data: Option<T>,
    error: Option<String>,
    error_code: Option<i64>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EntityTokenData {
    entity_token: String,
    token_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServerDetailsRequest {
    build_id: Uuid,
    session_id: Uuid,
    region: Region,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServerDetailsData {
    #[serde(rename = "FQDN", default)]
    fqdn: Option<String>,
    #[serde(default)]
    ports: Vec<PortData>,
    #[serde(rename = "IPV4Address", default)]
    ipv4_address: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortData {
    name: String,
    num: u16,
    #[serde(default)]
    protocol: String,
}

impl ServerDetailsData {
    fn into_details(self) -> DirectoryResult<ServerDetails> {
        let fqdn = self
            .fqdn
            .filter(|fqdn| !fqdn.is_empty())
            .ok_or_else(|| DirectoryError::MalformedResponse("server has no FQDN".to_string()))?;

        Ok(ServerDetails {
            fqdn,
            ports: self
                .ports
                .into_iter()
                .map(|port| ServerPort {
                    name: port.name,
                    num: port.num,
                    protocol: port.protocol,
                })
                .collect(),
            ipv4_address: self.ipv4_address,
            region: self.region,
            state: self.state,
        })
    }
}

/// Failure reported inside an envelope, or an unparseable answer.
enum CallError {
    Api {
        http_status: StatusCode,
        error: String,
        message: String,
    },
    Other(DirectoryError),
}

impl From<CallError> for DirectoryError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Api {
                http_status,
                error,
                message,
            } => DirectoryError::Api {
                code: http_status.as_u16(),
                error,
                message,
            },
            CallError::Other(e) => e,
        }
    }
}

/// [`ServerDirectory`] backed by the PlayFab REST API.
pub struct PlayFabDirectory {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    tokens: EntityTokenCache,
}

impl PlayFabDirectory {
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("gameserver-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .wrap_err("Failed to build directory HTTP client")?;

        let base_url = config.api_base_url();
        tracing::info!(%base_url, title_id = %config.title_id, "Created PlayFab directory client");

        Ok(Self {
            client,
            base_url,
            secret_key: config.secret_key.clone(),
            tokens: EntityTokenCache::new(config.token_refresh_margin()),
        })
    }

    async fn entity_token(&self) -> DirectoryResult<Arc<EntityToken>> {
        self.tokens.get_or_refresh(|| self.fetch_entity_token()).await
    }

    async fn fetch_entity_token(&self) -> DirectoryResult<EntityToken> {
        let mut headers = HeaderMap::new();
        headers.insert(
            SECRET_KEY_HEADER,
            HeaderValue::from_str(&self.secret_key).map_err(|_| {
                DirectoryError::Authentication("secret key is not a valid header value".into())
            })?,
        );

        let result = self
            .call::<_, EntityTokenData>(
                "/Authentication/GetEntityToken",
                headers,
                &serde_json::json!({}),
            )
            .await;

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                metrics::increment_token_refresh("error");
                return Err(match e {
                    CallError::Api { error, message, .. } => {
                        DirectoryError::Authentication(format!("{error}: {message}"))
                    }
                    CallError::Other(e) => e,
                });
            }
        };

        let expires_at = data.token_expiration.unwrap_or_else(|| {
            Utc::now()
                + chrono::Duration::from_std(DEFAULT_TOKEN_LIFETIME)
                    .unwrap_or(chrono::Duration::zero())
        });
        metrics::increment_token_refresh("ok");
        tracing::info!(%expires_at, "Acquired PlayFab entity token");

        Ok(EntityToken {
            token: data.entity_token,
            expires_at,
        })
    }

    /// POST `body` to `path` and unwrap the envelope's `data`.
    async fn call<Req, Resp>(
        &self,
        path: &str,
        headers: HeaderMap,
        body: &Req,
    ) -> Result<Resp, CallError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| CallError::Other(DirectoryError::Transport(format!("POST {url}: {e}"))))?;

        let http_status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CallError::Other(DirectoryError::Transport(format!("POST {url}: {e}"))))?;

        let envelope: ApiEnvelope<Resp> = serde_json::from_str(&text).map_err(|e| {
            CallError::Other(DirectoryError::MalformedResponse(format!(
                "POST {url} returned {http_status}: {e}"
            )))
        })?;

        if http_status.is_success() {
            if let Some(data) = envelope.data {
                return Ok(data);
            }
            return Err(CallError::Other(DirectoryError::MalformedResponse(format!(
                "POST {url} returned {http_status} without data"
            ))));
        }

        tracing::debug!(
            %url,
            code = envelope.code,
            status = %envelope.status,
            error_code = ?envelope.error_code,
            "Directory returned an error envelope"
        );
        Err(CallError::Api {
            http_status,
            error: envelope.error.unwrap_or_else(|| envelope.status.clone()),
            message: envelope.error_message.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ServerDirectory for PlayFabDirectory {
    async fn server_details(
        &self,
        build_id: Uuid,
        session_id: Uuid,
        region: Region,
    ) -> DirectoryResult<Option<ServerDetails>> {
        let token = self.entity_token().await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            ENTITY_TOKEN_HEADER,
            HeaderValue::from_str(&token.token).map_err(|_| {
                DirectoryError::MalformedResponse("entity token is not a valid header value".into())
            })?,
        );

        let request = ServerDetailsRequest {
            build_id,
            session_id,
            region,
        };

        match self
            .call::<_, ServerDetailsData>(
                "/MultiplayerServer/GetMultiplayerServerDetails",
                headers,
                &request,
            )
            .await
        {
            Ok(data) => data.into_details().map(Some),
            Err(CallError::Api { error, .. }) if error == SERVER_NOT_FOUND => {
                tracing::debug!(%build_id, %session_id, %region, "Directory has no such server");
                Ok(None)
            }
            Err(CallError::Api {
                http_status,
                error,
                message,
            }) if http_status == StatusCode::UNAUTHORIZED => {
                self.tokens.invalidate(&token);
                tracing::warn!(%error, "Entity token rejected; refreshing on next lookup");
                Err(DirectoryError::Authentication(format!("{error}: {message}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
