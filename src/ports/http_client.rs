use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for forwarding operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the game server fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) of the forwarding engine.
///
/// Implementations own connection pooling, header hygiene and body streaming.
/// They must not follow redirects or decode compressed responses.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an already transformed request to a game server
    ///
    /// # Arguments
    /// * `req` - Request whose URI is absolute (`scheme://host:port/path?query`)
    ///
    /// # Returns
    /// A future that resolves to the game server's response or an error
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
