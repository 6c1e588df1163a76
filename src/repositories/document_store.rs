// src/repositories/document_store.rs
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const POSTS_PATH: &str = "posts";
pub const USERS_PATH: &str = "users";

pub fn post_path(id: &str) -> String {
    format!("{}/{}", POSTS_PATH, id)
}

pub fn user_path(uid: &str) -> String {
    format!("{}/{}", USERS_PATH, uid)
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("request timed out")]
    Timeout,
    #[error("subscription closed")]
    Closed,
}

/// Full value under a subscribed path after a change; `None` when the path is empty.
pub type SnapshotEvent = Result<Option<Value>, RepoError>;

/// Live stream of snapshots. Dropping it (or calling `unsubscribe`) stops the
/// upstream reader.
pub struct Subscription {
    pub events: mpsc::Receiver<SnapshotEvent>,
    reader: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<SnapshotEvent>, reader: Option<JoinHandle<()>>) -> Self {
        Self { events, reader }
    }

    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        self.events.recv().await
    }

    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.events.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Real-time key/value store holding `posts/<id>` and `users/<uid>`.
///
/// `auth` is the signed-in user's id token when the call is made on their
/// behalf; the backend enforces its own rules with it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &str, auth: Option<&str>) -> Result<Option<Value>, RepoError>;

    /// Appends `value` under `path` and returns the generated child id.
    async fn push(&self, path: &str, value: Value, auth: Option<&str>) -> Result<String, RepoError>;

    /// Merges the fields of `partial` into the object at `path`.
    async fn update(&self, path: &str, partial: Value, auth: Option<&str>) -> Result<(), RepoError>;

    async fn set(&self, path: &str, value: Value, auth: Option<&str>) -> Result<(), RepoError>;

    async fn remove(&self, path: &str, auth: Option<&str>) -> Result<(), RepoError>;

    async fn subscribe(&self, path: &str, auth: Option<&str>) -> Result<Subscription, RepoError>;
}

/// Timeout and retry budget applied to remote calls. The default keeps calls
/// unbounded and unretried.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallPolicy {
    pub timeout: Option<Duration>,
    pub max_retries: u32,
}

impl CallPolicy {
    /// Runs a call once under the timeout, without retries.
    pub async fn once<T, Fut>(&self, fut: Fut) -> Result<T, RepoError>
    where
        Fut: Future<Output = Result<T, RepoError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| RepoError::Timeout)?,
            None => fut.await,
        }
    }

    /// Runs an idempotent call, retrying failures up to `max_retries` times.
    pub async fn idempotent<T, F, Fut>(&self, mut call: F) -> Result<T, RepoError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RepoError>>,
    {
        let mut attempt = 0;
        loop {
            match self.once(call()).await {
                Ok(v) => return Ok(v),
                Err(RepoError::PermissionDenied(msg)) => {
                    return Err(RepoError::PermissionDenied(msg));
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!("remote call failed (attempt {}): {}", attempt, e);
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
