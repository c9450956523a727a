pub mod directory;
pub mod http_client;

pub use directory::{
    DirectoryError, DirectoryResult, MatchDirectory, ServerDetails, ServerDirectory, ServerPort,
};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
