//! Configuration data structures for the proxy.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! to `GAMESERVER_PROXY__*` environment variables. Every section has defaults,
//! so a minimal file only names the directory credentials.
use std::{collections::HashMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::{resolver::PortSelection, route::RouteScheme};

/// Lifetime of a PlayFab title entity token.
pub const ENTITY_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Root configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Socket address to listen on, e.g. `0.0.0.0:8080`
    pub listen_addr: String,
    /// Which inbound path shape this process serves
    pub route_scheme: RouteScheme,
    pub forwarding: ForwardingConfig,
    pub endpoint: EndpointConfig,
    pub directory: DirectoryConfig,
    /// Match id to server base URL, used by the `match_id` scheme
    pub match_servers: HashMap<String, String>,
    pub cors: CorsConfig,
    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            route_scheme: RouteScheme::default(),
            forwarding: ForwardingConfig::default(),
            endpoint: EndpointConfig::default(),
            directory: DirectoryConfig::default(),
            match_servers: HashMap::new(),
            cors: CorsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Outbound forwarding limits
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ForwardingConfig {
    /// Maximum silence from the game server, both before the response head and between body chunks
    pub activity_timeout_secs: u64,
    /// Maximum time to establish a TCP connection to the game server
    pub connect_timeout_secs: u64,
}

impl ForwardingConfig {
    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            activity_timeout_secs: 5,
            connect_timeout_secs: 5,
        }
    }
}

/// How a directory answer is turned into a base URL
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointConfig {
    /// `http` or `https`
    pub scheme: String,
    pub port_selection: PortSelection,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            port_selection: PortSelection::default(),
        }
    }
}

/// PlayFab multiplayer directory credentials and client settings
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DirectoryConfig {
    pub title_id: String,
    /// Title secret key; prefer `GAMESERVER_PROXY__DIRECTORY__SECRET_KEY` over the file
    pub secret_key: String,
    /// Overrides `https://{title_id}.playfabapi.com`
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    /// Refresh the entity token this long before it expires; must stay below
    /// [`ENTITY_TOKEN_LIFETIME`]
    pub token_refresh_margin_secs: u64,
}

impl DirectoryConfig {
    /// Base URL of the directory API, without a trailing slash.
    pub fn api_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.playfabapi.com", self.title_id),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            title_id: String::new(),
            secret_key: String::new(),
            base_url: None,
            request_timeout_secs: 10,
            token_refresh_margin_secs: 300,
        }
    }
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("title_id", &self.title_id)
            .field(
                "secret_key",
                &if self.secret_key.is_empty() {
                    ""
                } else {
                    "<redacted>"
                },
            )
            .field("base_url", &self.base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("token_refresh_margin_secs", &self.token_refresh_margin_secs)
            .finish()
    }
}

/// Permissive CORS for browser-hosted game clients
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub json: bool,
    /// Include span context in JSON output
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            include_spans: true,
        }
    }
}
