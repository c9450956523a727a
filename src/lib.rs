//! gameserver-proxy - a reverse proxy that finds its upstream per request.
//!
//! Game clients address a server through the proxy with the routing tokens in
//! the path. The proxy looks the tokens up in a multiplayer server directory,
//! rewrites the request onto the server's address and streams the answer back.
//!
//! ```text
//! GET /{buildId}/{sessionId}/{region}/lobby/state?team=red
//!   -> directory lookup (PlayFab GetMultiplayerServerDetails)
//!   -> GET http://{fqdn}:{port}/lobby/state?team=red
//! ```
//!
//! A second route scheme, `/{matchId}/...`, resolves through a match table
//! instead. One scheme is active per process.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the request pipeline inside `core`:
//! - `core::route` parses the inbound path into a route key and forward tail
//! - `core::resolver` turns the route key into a game-server endpoint
//! - `core::transform` builds the outbound request
//! - `core::dispatcher` drives the pipeline and maps failures to 400/404/502/504
//!
//! # Error Handling
//! Library code returns typed `thiserror` errors; startup and wiring use
//! `eyre::Result` with context attached through `WrapErr`.
//!
//! # Concurrency & Data Structures
//! The entity token lives in an `arc_swap::ArcSwapOption` with a single-flight refresh,
//! and the match table uses `scc::HashMap` for lock-free concurrent reads.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler, PlayFabDirectory, StaticMatchDirectory},
    core::ProxyDispatcher,
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
