//! Directory cache - resolves user ids to profiles at most once per session.
//!
//! Lookups go through the `DirectoryBackend` seam; production uses the HTTP
//! directory service, tests inject a counting fake. Concurrent resolves for
//! the same unresolved id coalesce onto one in-flight fetch. A failed fetch
//! leaves the id unresolved and retriable. Cached profiles never expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::DirectoryError;
use crate::protocol::{UserId, UserProfile};

/// Read-only profile lookup boundary.
#[async_trait]
pub trait DirectoryBackend: Send + Sync {
    async fn fetch_user(&self, id: UserId) -> Result<UserProfile, DirectoryError>;
}

/// HTTP directory service client.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl DirectoryBackend for HttpDirectory {
    async fn fetch_user(&self, id: UserId) -> Result<UserProfile, DirectoryError> {
        let url = format!("{}/users/{}", self.base_url, id);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status {
                id,
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

/// Memoized id-to-profile mapping with request coalescing.
pub struct DirectoryCache {
    backend: Arc<dyn DirectoryBackend>,
    entries: DashMap<UserId, Arc<OnceCell<UserProfile>>>,
}

impl DirectoryCache {
    pub fn new(backend: Arc<dyn DirectoryBackend>) -> Self {
        Self {
            backend,
            entries: DashMap::new(),
        }
    }

    /// Resolve a profile, fetching at most once per id. While a fetch for an
    /// id is in flight, further callers wait on it instead of issuing their
    /// own.
    pub async fn resolve(&self, id: UserId) -> Result<UserProfile, DirectoryError> {
        let cell = self.entries.entry(id).or_default().clone();
        let profile = cell
            .get_or_try_init(|| async {
                debug!(user_id = id, "fetching profile");
                self.backend.fetch_user(id).await
            })
            .await?;
        Ok(profile.clone())
    }

    /// The cached profile, if any, without triggering a fetch. Callers
    /// render a placeholder until `resolve` settles.
    pub fn peek(&self, id: UserId) -> Option<UserProfile> {
        self.entries
            .get(&id)
            .and_then(|cell| cell.get().cloned())
    }
}
