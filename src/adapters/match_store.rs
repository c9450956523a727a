use async_trait::async_trait;
use scc::{HashMap, hash_map::Entry};

use crate::{
    core::route::MatchId,
    ports::directory::{DirectoryResult, MatchDirectory},
};

/// In-memory [`MatchDirectory`] mapping match ids to server base URLs.
///
/// Seeded from configuration and updatable at runtime by whatever allocates
/// matches. URLs are validated when resolved, not when stored.
#[derive(Default)]
pub struct StaticMatchDirectory {
    servers: HashMap<String, String>,
}

impl StaticMatchDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let directory = Self::new();
        for (match_id, url) in entries {
            upsert(&directory.servers, match_id, url).await;
        }
        directory
    }

    /// Insert or replace the server URL for `match_id`.
    pub async fn register(&self, match_id: &MatchId, url: impl Into<String>) {
        upsert(&self.servers, match_id.as_str().to_string(), url.into()).await;
    }

    /// Forget `match_id`, returning the URL it pointed to.
    pub async fn remove(&self, match_id: &MatchId) -> Option<String> {
        self.servers
            .remove_async(match_id.as_str())
            .await
            .map(|(_, url)| url)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

async fn upsert(servers: &HashMap<String, String>, key: String, value: String) {
    match servers.entry_async(key).await {
        Entry::Occupied(mut occupied) => *occupied.get_mut() = value,
        Entry::Vacant(vacant) => {
            vacant.insert_entry(value);
        }
    }
}

#[async_trait]
impl MatchDirectory for StaticMatchDirectory {
    async fn server_url(&self, match_id: &MatchId) -> DirectoryResult<Option<String>> {
        Ok(self
            .servers
            .get_async(match_id.as_str())
            .await
            .map(|entry| entry.get().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> MatchId {
        MatchId::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_from_entries() {
        let directory = StaticMatchDirectory::from_entries([(
            "m-42".to_string(),
            "http://10.0.0.5:30201".to_string(),
        )])
        .await;

        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.server_url(&id("m-42")).await.unwrap().as_deref(),
            Some("http://10.0.0.5:30201")
        );
        assert_eq!(directory.server_url(&id("m-43")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_register_replaces_and_remove_forgets() {
        let directory = StaticMatchDirectory::new();
        assert!(directory.is_empty());

        directory.register(&id("m-1"), "http://10.0.0.1:7777").await;
        directory.register(&id("m-1"), "http://10.0.0.2:7777").await;
        assert_eq!(directory.len(), 1);
        assert_eq!(
            directory.server_url(&id("m-1")).await.unwrap().as_deref(),
            Some("http://10.0.0.2:7777")
        );

        assert_eq!(
            directory.remove(&id("m-1")).await.as_deref(),
            Some("http://10.0.0.2:7777")
        );
        assert_eq!(directory.server_url(&id("m-1")).await.unwrap(), None);
    }
}
