pub mod http_client;
pub mod http_handler;
pub mod match_store;
pub mod playfab;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use match_store::StaticMatchDirectory;
pub use playfab::{EntityToken, EntityTokenCache, PlayFabDirectory};
