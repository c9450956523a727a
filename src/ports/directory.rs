use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::core::route::{MatchId, Region};

/// Error type for directory lookups.
///
/// "Server not found" is not an error: directories report it as `Ok(None)`.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum DirectoryError {
    /// Network level failure talking to the directory
    #[error("Directory transport error: {0}")]
    Transport(String),

    /// Credentials were rejected or a token could not be obtained
    #[error("Directory authentication failed: {0}")]
    Authentication(String),

    /// The directory answered with an error report
    #[error("Directory returned {code} {error}: {message}")]
    Api {
        /// HTTP status code reported by the directory
        code: u16,
        /// Symbolic error name
        error: String,
        /// Human readable error report
        message: String,
    },

    /// The response could not be understood
    #[error("Malformed directory response: {0}")]
    MalformedResponse(String),
}

/// Result type alias for directory lookups
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// A network port exposed by a game server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPort {
    pub name: String,
    pub num: u16,
    pub protocol: String,
}

/// Directory answer for a single allocated game server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerDetails {
    /// Fully-qualified domain name of the host VM
    pub fqdn: String,
    /// Exposed ports, in the order the directory lists them
    pub ports: Vec<ServerPort>,
    pub ipv4_address: Option<String>,
    pub region: Option<String>,
    pub state: Option<String>,
}

/// ServerDirectory defines the port for looking up a server by build, session and region.
#[async_trait]
pub trait ServerDirectory: Send + Sync + 'static {
    /// Fetch the details of the server hosting `session_id`.
    ///
    /// # Returns
    /// * `Ok(Some(details))` when the server exists
    /// * `Ok(None)` when the directory reports that no such server exists
    /// * `Err(_)` for every other failure
    async fn server_details(
        &self,
        build_id: Uuid,
        session_id: Uuid,
        region: Region,
    ) -> DirectoryResult<Option<ServerDetails>>;
}

/// MatchDirectory defines the port for looking up a pre-formed server URL by match id.
#[async_trait]
pub trait MatchDirectory: Send + Sync + 'static {
    /// Return the server URL stored for `match_id`, or `Ok(None)` if there is none.
    async fn server_url(&self, match_id: &MatchId) -> DirectoryResult<Option<String>>;
}
