//! Outbound request construction.
//!
//! Maps `/{routing prefix}/some/path?test=true` onto
//! `{resolved endpoint}/some/path?test=true`. Only the URI is rewritten; the
//! method, headers, extensions and body move across untouched. Header hygiene
//! (Host, hop-by-hop headers) belongs to the forwarding engine.
use http::{Request, Uri};
use thiserror::Error;

use crate::core::{resolver::ResolvedEndpoint, route::ForwardTail};

/// Error produced when the outbound URI cannot be built
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TransformError {
    #[error("Invalid outbound URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },
}

/// Join a base path and a forward path with exactly one separator between them.
///
/// An empty tail keeps the base path as is (or `/` when it is empty).
pub fn join_path(base: &str, tail: &str) -> String {
    let tail = tail.trim_start_matches('/');
    if tail.is_empty() {
        return if base.is_empty() {
            "/".to_string()
        } else {
            base.to_string()
        };
    }

    let base = base.trim_end_matches('/');
    let mut joined = String::with_capacity(base.len() + tail.len() + 2);
    if !base.is_empty() {
        if !base.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(base);
    }
    joined.push('/');
    joined.push_str(tail);
    joined
}

/// Absolute target URI: endpoint scheme and authority, joined path, verbatim query.
pub fn outbound_uri(endpoint: &ResolvedEndpoint, tail: &ForwardTail) -> String {
    let mut uri = format!(
        "{}://{}{}",
        endpoint.scheme(),
        endpoint.authority(),
        join_path(endpoint.base_path(), &tail.path)
    );
    if let Some(query) = &tail.query {
        uri.push('?');
        uri.push_str(query);
    }
    uri
}

/// Point `req` at the resolved game server.
pub fn transform<B>(
    endpoint: &ResolvedEndpoint,
    tail: &ForwardTail,
    mut req: Request<B>,
) -> Result<Request<B>, TransformError> {
    let target = outbound_uri(endpoint, tail);
    let uri = target
        .parse::<Uri>()
        .map_err(|e| TransformError::InvalidUri {
            uri: target.clone(),
            reason: e.to_string(),
        })?;
    *req.uri_mut() = uri;
    Ok(req)
}
