//! Route descriptor parsing.
//!
//! Extracts the routing tokens from an inbound request path. Two route
//! schemes exist and exactly one of them is active per process:
//!
//! ```text
//! build_session_region:  /{buildId:uuid}/{sessionId:uuid}/{region}/{**rest}?query
//! match_id:              /{matchId}/{**rest}?query
//! ```
//!
//! Region names are matched **case-sensitively** against [`Region`]. The
//! remaining path (`rest`) and the query string are carried verbatim in a
//! [`ForwardTail`]. Parsing is a pure function of the URI.
use std::{fmt, str::FromStr};

use http::Uri;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors produced while parsing an inbound route. All of them map to `400 Bad Request`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteError {
    /// A required path segment is absent or empty
    #[error("Missing route segment: {0}")]
    MissingSegment(&'static str),

    /// A segment that must hold a UUID does not parse as one
    #[error("Invalid {field} '{value}': not a UUID")]
    InvalidUuid {
        /// Name of the route parameter
        field: &'static str,
        /// Raw segment value
        value: String,
    },

    /// Region segment is not one of the known region names
    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    /// Match identifier is empty or contains a path separator
    #[error("Invalid match id: {0:?}")]
    InvalidMatchId(String),
}

/// Result type for route parsing
pub type RouteResult<T> = Result<T, RouteError>;

/// Shape of the inbound path used to identify routing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteScheme {
    /// `/{buildId}/{sessionId}/{region}/{**rest}`
    #[default]
    BuildSessionRegion,
    /// `/{matchId}/{**rest}`
    MatchId,
}

impl fmt::Display for RouteScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteScheme::BuildSessionRegion => write!(f, "build_session_region"),
            RouteScheme::MatchId => write!(f, "match_id"),
        }
    }
}

macro_rules! regions {
    ($($variant:ident),+ $(,)?) => {
        /// Azure regions a multiplayer server can be allocated in.
        ///
        /// Serialized with the exact variant name, which is also the form the
        /// directory service expects.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Region {
            $($variant),+
        }

        impl Region {
            /// Every known region, in declaration order.
            pub const ALL: &'static [Region] = &[$(Region::$variant),+];

            /// Canonical region name.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Region::$variant => stringify!($variant)),+
                }
            }
        }
    };
}

regions!(
    AustraliaEast,
    AustraliaSoutheast,
    BrazilSouth,
    CentralUs,
    EastAsia,
    EastUs,
    EastUs2,
    JapanEast,
    JapanWest,
    NorthCentralUs,
    NorthEurope,
    SouthCentralUs,
    SoutheastAsia,
    WestEurope,
    WestUs,
    SouthAfricaNorth,
    WestCentralUs,
    KoreaCentral,
    FranceCentral,
    WestUs2,
    CentralIndia,
    UaeNorth,
    UkSouth,
    SwedenCentral,
    CanadaCentral,
    MexicoCentral,
);

impl FromStr for Region {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .iter()
            .copied()
            .find(|region| region.as_str() == s)
            .ok_or_else(|| RouteError::UnknownRegion(s.to_string()))
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque, non-empty match identifier taken from a single path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchId(String);

impl MatchId {
    pub fn new(value: impl Into<String>) -> RouteResult<Self> {
        let value = value.into();
        if value.is_empty() || value.contains('/') {
            return Err(RouteError::InvalidMatchId(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifying tokens extracted from the path. Only built from validated input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKey {
    BuildSessionRegion {
        build_id: Uuid,
        session_id: Uuid,
        region: Region,
    },
    MatchId {
        match_id: MatchId,
    },
}

impl RouteKey {
    /// Scheme this key belongs to.
    pub fn scheme(&self) -> RouteScheme {
        match self {
            RouteKey::BuildSessionRegion { .. } => RouteScheme::BuildSessionRegion,
            RouteKey::MatchId { .. } => RouteScheme::MatchId,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::BuildSessionRegion {
                build_id,
                session_id,
                region,
            } => write!(f, "{build_id}/{session_id}/{region}"),
            RouteKey::MatchId { match_id } => write!(f, "{match_id}"),
        }
    }
}

/// Remaining path after the routing prefix plus the original query string.
///
/// `path` never carries the separator that followed the routing prefix:
/// `/b/s/r/lobby/state` yields `lobby/state`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ForwardTail {
    pub path: String,
    pub query: Option<String>,
}

/// Successful parse result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRoute {
    pub key: RouteKey,
    pub tail: ForwardTail,
}

/// Parse the inbound URI according to `scheme`.
pub fn parse_route(scheme: RouteScheme, uri: &Uri) -> RouteResult<ParsedRoute> {
    let path = uri.path();
    let path = path.strip_prefix('/').unwrap_or(path);
    let query = uri.query().map(str::to_owned);

    let (key, rest) = match scheme {
        RouteScheme::BuildSessionRegion => {
            let mut segments = path.splitn(4, '/');
            let build_id = parse_uuid(next_segment(&mut segments, "buildId")?, "buildId")?;
            let session_id =
                parse_uuid(next_segment(&mut segments, "sessionId")?, "sessionId")?;
            let region = next_segment(&mut segments, "region")?.parse::<Region>()?;
            let key = RouteKey::BuildSessionRegion {
                build_id,
                session_id,
                region,
            };
            (key, segments.next())
        }
        RouteScheme::MatchId => {
            let mut segments = path.splitn(2, '/');
            let match_id = MatchId::new(next_segment(&mut segments, "matchId")?)?;
            (RouteKey::MatchId { match_id }, segments.next())
        }
    };

    Ok(ParsedRoute {
        key,
        tail: ForwardTail {
            path: rest.unwrap_or_default().to_string(),
            query,
        },
    })
}

/// Render a route key and tail back into a path and query.
///
/// `parse_route(key.scheme(), &format_route(key, tail).parse()?)` reproduces
/// the same key and tail.
pub fn format_route(key: &RouteKey, tail: &ForwardTail) -> String {
    let mut out = format!("/{key}");
    if !tail.path.is_empty() {
        out.push('/');
        out.push_str(&tail.path);
    }
    if let Some(query) = &tail.query {
        out.push('?');
        out.push_str(query);
    }
    out
}

fn next_segment<'a>(
    segments: &mut impl Iterator<Item = &'a str>,
    name: &'static str,
) -> RouteResult<&'a str> {
    segments
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or(RouteError::MissingSegment(name))
}

fn parse_uuid(value: &str, field: &'static str) -> RouteResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| RouteError::InvalidUuid {
        field,
        value: value.to_string(),
    })
}
