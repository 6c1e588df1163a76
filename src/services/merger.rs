// src/services/merger.rs
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult};
use crate::models::post::{Post, PostId, PostRecord};
use crate::repositories::document_store::{DocumentStore, POSTS_PATH, RepoError, Subscription};
use crate::services::notifier::Notifier;
use crate::store::SharedPostStore;

/// How far apart (ms) a local post and a stored post may be created and
/// still be treated as the same submission.
pub const DEFAULT_MATCH_WINDOW_MS: i64 = 60_000;

pub const MSG_LOAD_FAILED: &str = "Failed to load posts";

const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

pub fn decode_post(id: &str, value: Value) -> Option<Post> {
    match serde_json::from_value::<PostRecord>(value) {
        Ok(record) => Some(Post::confirmed(PostId::new(id), record)),
        Err(e) => {
            log::warn!("skipping undecodable post {}: {}", id, e);
            None
        }
    }
}

/// Turns a `posts` snapshot into confirmed posts. Entries that do not decode
/// are skipped.
pub fn decode_posts(snapshot: Option<Value>) -> Vec<Post> {
    match snapshot {
        Some(Value::Object(entries)) => entries
            .into_iter()
            .filter_map(|(id, value)| decode_post(&id, value))
            .collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            log::warn!("posts snapshot is not an object: {}", other);
            Vec::new()
        }
    }
}

/// Merges an authoritative snapshot with the local-only entries of the
/// current feed.
///
/// Stored entries always win. A pending or failed local entry survives unless
/// a stored entry with the same id exists, or a stored entry matches its
/// content within `window_ms`; every stored entry supersedes at most one
/// local entry.
pub fn reconcile(current: &[Post], incoming: Vec<Post>, window_ms: i64) -> Vec<Post> {
    let mut claimed = vec![false; incoming.len()];
    let mut kept = Vec::new();

    for local in current.iter().filter(|p| p.status.is_local()) {
        if incoming.iter().any(|p| p.id == local.id) {
            continue;
        }
        let hit = incoming
            .iter()
            .enumerate()
            .find(|(i, stored)| !claimed[*i] && stored.same_content(local, window_ms))
            .map(|(i, _)| i);
        match hit {
            Some(i) => claimed[i] = true,
            None => kept.push(local.clone()),
        }
    }

    let mut merged = incoming;
    merged.extend(kept);
    merged
}

/// Keeps the post store in step with the `posts` subscription.
#[derive(Clone)]
pub struct SubscriptionMerger {
    store: SharedPostStore,
    docs: Arc<dyn DocumentStore>,
    notifier: Notifier,
    match_window_ms: i64,
    reconnect_delay: Duration,
}

impl SubscriptionMerger {
    pub fn new(store: SharedPostStore, docs: Arc<dyn DocumentStore>, notifier: Notifier) -> Self {
        Self {
            store,
            docs,
            notifier,
            match_window_ms: DEFAULT_MATCH_WINDOW_MS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// First wait before resubscribing after the stream is lost; doubles on
    /// every failed attempt up to 30s.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_match_window(mut self, window_ms: i64) -> Self {
        self.match_window_ms = window_ms;
        self
    }

    /// Applies one full snapshot; returns the resulting feed length.
    pub fn apply_snapshot(&self, snapshot: Option<Value>) -> usize {
        let incoming = decode_posts(snapshot);
        let mut store = self.store.lock();
        let merged = reconcile(store.posts(), incoming, self.match_window_ms);
        store.replace_all(merged);
        store.set_loading(false);
        log::debug!("feed now holds {} posts", store.len());
        store.len()
    }

    pub fn apply_error(&self, err: &RepoError) {
        log::error!("posts subscription error: {}", err);
        self.store.lock().set_loading(false);
        self.notifier.error(MSG_LOAD_FAILED);
    }

    /// One-shot read of `posts` merged like a pushed snapshot.
    pub async fn refresh(&self) -> AppResult<usize> {
        self.store.lock().set_loading(true);
        match self.docs.get(POSTS_PATH, None).await {
            Ok(snapshot) => Ok(self.apply_snapshot(snapshot)),
            Err(e) => {
                self.apply_error(&e);
                Err(AppError::StoreRead(e))
            }
        }
    }

    /// Starts following `posts`. The returned handle must be kept for as long
    /// as the feed is shown.
    pub async fn mount(&self) -> AppResult<FeedSubscription> {
        self.store.lock().set_loading(true);
        let mut subscription = match self.docs.subscribe(POSTS_PATH, None).await {
            Ok(s) => s,
            Err(e) => {
                self.apply_error(&e);
                return Err(AppError::StoreRead(e));
            }
        };

        let merger = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let mut reported = false;
                while let Some(event) = subscription.next().await {
                    match event {
                        Ok(snapshot) => {
                            merger.apply_snapshot(snapshot);
                            reported = false;
                        }
                        Err(RepoError::Closed) => break,
                        Err(e) => {
                            merger.apply_error(&e);
                            reported = true;
                        }
                    }
                }
                log::warn!("posts subscription lost");
                if !reported {
                    merger.notifier.error(MSG_LOAD_FAILED);
                }
                subscription = merger.resubscribe().await;
            }
        });
        log::info!("feed mounted");
        Ok(FeedSubscription { task: Some(task) })
    }

    /// Keeps trying until the store accepts a new subscription. Its first
    /// event is a full snapshot, so nothing missed while away is lost.
    async fn resubscribe(&self) -> Subscription {
        let mut delay = self.reconnect_delay;
        loop {
            tokio::time::sleep(delay).await;
            match self.docs.subscribe(POSTS_PATH, None).await {
                Ok(subscription) => {
                    log::info!("posts subscription restored");
                    return subscription;
                }
                Err(e) => {
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY);
                    log::warn!("resubscribe to posts failed, retrying in {:?}: {}", delay, e);
                }
            }
        }
    }
}

/// Live feed subscription. Dropping it stops snapshot delivery.
pub struct FeedSubscription {
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn unsubscribe(mut self) {
        self.stop();
        log::info!("feed unmounted");
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}
