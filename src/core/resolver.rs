//! Endpoint resolution.
//!
//! Turns a validated [`RouteKey`] into the base URL of the game server that
//! should receive the request. The two route schemes are served by the two
//! variants of the closed [`EndpointResolver`] enum; each variant talks to its
//! own directory port.
//!
//! Every resolution attempt produces exactly one [`ResolutionOutcome`]. A
//! directory reporting "no such server" is a normal `NotFound` outcome, never
//! an error.
use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::{
    core::route::{MatchId, Region, RouteKey, RouteScheme},
    ports::directory::{DirectoryError, MatchDirectory, ServerDirectory, ServerPort},
};

/// Reasons a resolution attempt failed. All of them map to a gateway error.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ResolutionError {
    /// The directory lookup itself failed
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// The directory answer has no port matching the selection policy
    #[error("No port matching {policy} among [{available}]")]
    NoMatchingPort {
        /// Description of the active policy
        policy: String,
        /// Names of the ports the directory returned
        available: String,
    },

    /// The directory produced an address that is not a usable base URL
    #[error("Invalid server endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// Offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// The route key belongs to a scheme this resolver does not serve
    #[error("Route scheme {got} is not served by the {expected} resolver")]
    SchemeMismatch {
        expected: RouteScheme,
        got: RouteScheme,
    },
}

/// A type-safe representation of a resolved game-server base URL.
///
/// Always `http` or `https`, always carries a host. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    url: Url,
}

impl ResolvedEndpoint {
    /// Parse and validate a base URL such as `http://game01.example.com:7777`.
    pub fn new(url: &str) -> Result<Self, ResolutionError> {
        let invalid = |reason: String| ResolutionError::InvalidEndpoint {
            url: url.to_string(),
            reason,
        };

        let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!(
                "scheme must be http or https, got {}",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }
        if parsed.port_or_known_default().is_none() {
            return Err(invalid("missing port".to_string()));
        }

        Ok(Self { url: parsed })
    }

    /// Build `scheme://host:port` from directory data.
    pub fn from_parts(scheme: &str, host: &str, port: u16) -> Result<Self, ResolutionError> {
        Self::new(&format!("{scheme}://{host}:{port}"))
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or_default()
    }

    /// Path component of the base URL; `/` when the URL has none.
    pub fn base_path(&self) -> &str {
        self.url.path()
    }

    /// `host:port`, with the port always spelled out.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    /// Check if the endpoint is using HTTPS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl FromStr for ResolvedEndpoint {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResolvedEndpoint::new(s)
    }
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Three-way result of a resolution attempt.
#[derive(Debug, Clone)]
pub enum ResolutionOutcome {
    Found(ResolvedEndpoint),
    NotFound,
    Failed(ResolutionError),
}

impl ResolutionOutcome {
    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionOutcome::Found(_) => "found",
            ResolutionOutcome::NotFound => "not_found",
            ResolutionOutcome::Failed(_) => "failed",
        }
    }
}

/// Policy choosing which of the server's exposed ports receives traffic.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PortSelection {
    /// First port in directory order
    #[default]
    First,
    /// Port whose name matches, e.g. the build's `game_port`
    Named { name: String },
}

impl PortSelection {
    /// Deterministically pick one port, or `None` if the policy matches nothing.
    pub fn select<'a>(&self, ports: &'a [ServerPort]) -> Option<&'a ServerPort> {
        match self {
            PortSelection::First => ports.first(),
            PortSelection::Named { name } => ports.iter().find(|port| &port.name == name),
        }
    }
}

impl fmt::Display for PortSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSelection::First => write!(f, "policy 'first'"),
            PortSelection::Named { name } => write!(f, "name '{name}'"),
        }
    }
}

/// Resolves build/session/region keys through a [`ServerDirectory`].
#[derive(Clone)]
pub struct BuildSessionResolver {
    directory: Arc<dyn ServerDirectory>,
    scheme: String,
    port_selection: PortSelection,
}

impl BuildSessionResolver {
    pub fn new(
        directory: Arc<dyn ServerDirectory>,
        scheme: impl Into<String>,
        port_selection: PortSelection,
    ) -> Self {
        Self {
            directory,
            scheme: scheme.into(),
            port_selection,
        }
    }

    pub async fn resolve(
        &self,
        build_id: Uuid,
        session_id: Uuid,
        region: Region,
    ) -> ResolutionOutcome {
        let details = match self
            .directory
            .server_details(build_id, session_id, region)
            .await
        {
            Ok(Some(details)) => details,
            Ok(None) => return ResolutionOutcome::NotFound,
            Err(e) => return ResolutionOutcome::Failed(e.into()),
        };

        let Some(port) = self.port_selection.select(&details.ports) else {
            return ResolutionOutcome::Failed(ResolutionError::NoMatchingPort {
                policy: self.port_selection.to_string(),
                available: details
                    .ports
                    .iter()
                    .map(|p| format!("{}:{}", p.name, p.num))
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        };

        tracing::debug!(
            fqdn = %details.fqdn,
            port = port.num,
            port_name = %port.name,
            "Selected game server port"
        );

        match ResolvedEndpoint::from_parts(&self.scheme, &details.fqdn, port.num) {
            Ok(endpoint) => ResolutionOutcome::Found(endpoint),
            Err(e) => ResolutionOutcome::Failed(e),
        }
    }
}

/// Resolves match ids through a [`MatchDirectory`] holding pre-formed server URLs.
#[derive(Clone)]
pub struct MatchResolver {
    directory: Arc<dyn MatchDirectory>,
}

impl MatchResolver {
    pub fn new(directory: Arc<dyn MatchDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, match_id: &MatchId) -> ResolutionOutcome {
        match self.directory.server_url(match_id).await {
            Ok(Some(url)) => match ResolvedEndpoint::new(&url) {
                Ok(endpoint) => ResolutionOutcome::Found(endpoint),
                Err(e) => ResolutionOutcome::Failed(e),
            },
            Ok(None) => ResolutionOutcome::NotFound,
            Err(e) => ResolutionOutcome::Failed(e.into()),
        }
    }
}

/// Closed set of resolvers, one per route scheme.
#[derive(Clone)]
pub enum EndpointResolver {
    BuildSession(BuildSessionResolver),
    Match(MatchResolver),
}

impl EndpointResolver {
    /// Route scheme this resolver serves; the parser must use the same one.
    pub fn scheme(&self) -> RouteScheme {
        match self {
            EndpointResolver::BuildSession(_) => RouteScheme::BuildSessionRegion,
            EndpointResolver::Match(_) => RouteScheme::MatchId,
        }
    }

    pub async fn resolve(&self, key: &RouteKey) -> ResolutionOutcome {
        match (self, key) {
            (
                EndpointResolver::BuildSession(resolver),
                RouteKey::BuildSessionRegion {
                    build_id,
                    session_id,
                    region,
                },
            ) => resolver.resolve(*build_id, *session_id, *region).await,
            (EndpointResolver::Match(resolver), RouteKey::MatchId { match_id }) => {
                resolver.resolve(match_id).await
            }
            _ => ResolutionOutcome::Failed(ResolutionError::SchemeMismatch {
                expected: self.scheme(),
                got: key.scheme(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::ports::directory::{DirectoryResult, ServerDetails};

    struct FixedDirectory(DirectoryResult<Option<ServerDetails>>);

    #[async_trait]
    impl ServerDirectory for FixedDirectory {
        async fn server_details(
            &self,
            _build_id: Uuid,
            _session_id: Uuid,
            _region: Region,
        ) -> DirectoryResult<Option<ServerDetails>> {
            self.0.clone()
        }
    }

    struct FixedMatches(Option<String>);

    #[async_trait]
    impl MatchDirectory for FixedMatches {
        async fn server_url(&self, _match_id: &MatchId) -> DirectoryResult<Option<String>> {
            Ok(self.0.clone())
        }
    }

    fn port(name: &str, num: u16) -> ServerPort {
        ServerPort {
            name: name.to_string(),
            num,
            protocol: "TCP".to_string(),
        }
    }

    fn details(ports: Vec<ServerPort>) -> ServerDetails {
        ServerDetails {
            fqdn: "game01.example.com".to_string(),
            ports,
            ..Default::default()
        }
    }

    fn build_session_key() -> RouteKey {
        RouteKey::BuildSessionRegion {
            build_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            region: Region::WestUs,
        }
    }

    fn resolver(result: DirectoryResult<Option<ServerDetails>>, policy: PortSelection) -> EndpointResolver {
        EndpointResolver::BuildSession(BuildSessionResolver::new(
            Arc::new(FixedDirectory(result)),
            "http",
            policy,
        ))
    }

    #[test]
    fn test_resolved_endpoint_parts() {
        let endpoint = ResolvedEndpoint::from_parts("http", "game01.example.com", 7777).unwrap();
        assert_eq!(endpoint.scheme(), "http");
        assert_eq!(endpoint.host(), "game01.example.com");
        assert_eq!(endpoint.port(), 7777);
        assert_eq!(endpoint.base_path(), "/");
        assert_eq!(endpoint.authority(), "game01.example.com:7777");
        assert!(!endpoint.is_secure());

        let endpoint: ResolvedEndpoint = "https://host.example.com/base/".parse().unwrap();
        assert_eq!(endpoint.port(), 443);
        assert_eq!(endpoint.base_path(), "/base/");
        assert!(endpoint.is_secure());
    }

    #[test]
    fn test_resolved_endpoint_invalid() {
        assert!(ResolvedEndpoint::new("game01.example.com:7777").is_err());
        assert!(ResolvedEndpoint::new("ftp://example.com").is_err());
        assert!(ResolvedEndpoint::new("not a url").is_err());
    }

    #[test]
    fn test_port_selection() {
        let ports = vec![port("query", 27015), port("game_port", 7777)];
        assert_eq!(PortSelection::First.select(&ports).unwrap().num, 27015);
        assert_eq!(
            PortSelection::Named {
                name: "game_port".into()
            }
            .select(&ports)
            .unwrap()
            .num,
            7777
        );
        assert!(
            PortSelection::Named {
                name: "missing".into()
            }
            .select(&ports)
            .is_none()
        );
        assert!(PortSelection::First.select(&[]).is_none());
    }

    #[tokio::test]
    async fn test_found_uses_selected_port() {
        let resolver = resolver(
            Ok(Some(details(vec![port("query", 27015), port("game_port", 7777)]))),
            PortSelection::Named {
                name: "game_port".into(),
            },
        );

        match resolver.resolve(&build_session_key()).await {
            ResolutionOutcome::Found(endpoint) => {
                assert_eq!(endpoint.as_str(), "http://game01.example.com:7777/")
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_not_failure() {
        let resolver = resolver(Ok(None), PortSelection::First);
        assert!(matches!(
            resolver.resolve(&build_session_key()).await,
            ResolutionOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn test_directory_error_is_failure() {
        let resolver = resolver(
            Err(DirectoryError::Api {
                code: 500,
                error: "InternalServerError".into(),
                message: "boom".into(),
            }),
            PortSelection::First,
        );
        assert!(matches!(
            resolver.resolve(&build_session_key()).await,
            ResolutionOutcome::Failed(ResolutionError::Directory(_))
        ));
    }

    #[tokio::test]
    async fn test_no_ports_is_failure() {
        let resolver = resolver(Ok(Some(details(vec![]))), PortSelection::First);
        assert!(matches!(
            resolver.resolve(&build_session_key()).await,
            ResolutionOutcome::Failed(ResolutionError::NoMatchingPort { .. })
        ));
    }

    #[tokio::test]
    async fn test_match_resolver() {
        let key = RouteKey::MatchId {
            match_id: MatchId::new("m1").unwrap(),
        };

        let found = EndpointResolver::Match(MatchResolver::new(Arc::new(FixedMatches(Some(
            "http://10.0.0.5:30201".into(),
        )))));
        assert!(matches!(found.resolve(&key).await, ResolutionOutcome::Found(_)));

        let missing = EndpointResolver::Match(MatchResolver::new(Arc::new(FixedMatches(None))));
        assert!(matches!(missing.resolve(&key).await, ResolutionOutcome::NotFound));

        let broken = EndpointResolver::Match(MatchResolver::new(Arc::new(FixedMatches(Some(
            "10.0.0.5".into(),
        )))));
        assert!(matches!(
            broken.resolve(&key).await,
            ResolutionOutcome::Failed(ResolutionError::InvalidEndpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_scheme_mismatch_is_failure() {
        let resolver = EndpointResolver::Match(MatchResolver::new(Arc::new(FixedMatches(None))));
        assert!(matches!(
            resolver.resolve(&build_session_key()).await,
            ResolutionOutcome::Failed(ResolutionError::SchemeMismatch { .. })
        ));
    }
}
