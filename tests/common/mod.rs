#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc};

use smalltalk::models::post::Post;
use smalltalk::models::user::CurrentUser;
use smalltalk::repositories::document_store::{DocumentStore, RepoError, Subscription};
use smalltalk::repositories::memory_store::MemoryStore;
use smalltalk::services::coordinator::MutationCoordinator;
use smalltalk::services::merger::SubscriptionMerger;
use smalltalk::services::notifier::Notifier;
use smalltalk::store::SharedPostStore;

/// Memory store whose writes can be made to fail or to wait for a go-ahead.
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_push: AtomicBool,
    fail_remove: AtomicBool,
    fail_update: AtomicBool,
    gated: AtomicBool,
    gate: Semaphore,
    broken_streams: AtomicUsize,
    refused_subscribes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_push: AtomicBool::new(false),
            fail_remove: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            broken_streams: AtomicUsize::new(0),
            refused_subscribes: AtomicUsize::new(0),
        }
    }

    pub fn fail_push(&self, on: bool) {
        self.fail_push.store(on, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, on: bool) {
        self.fail_remove.store(on, Ordering::SeqCst);
    }

    pub fn fail_update(&self, on: bool) {
        self.fail_update.store(on, Ordering::SeqCst);
    }

    /// Makes pushes and removes wait until `release` is called.
    pub fn hold_writes(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// The next `n` subscriptions deliver an empty snapshot, then close.
    pub fn break_streams(&self, n: usize) {
        self.broken_streams.store(n, Ordering::SeqCst);
    }

    /// The next `n` subscribe calls fail outright.
    pub fn refuse_subscribes(&self, n: usize) {
        self.refused_subscribes.store(n, Ordering::SeqCst);
    }

    async fn pass_gate(&self) -> Result<(), RepoError> {
        if self.gated.load(Ordering::SeqCst) {
            let permit = self.gate.acquire().await.map_err(|_| RepoError::Closed)?;
            permit.forget();
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn injected() -> RepoError {
    RepoError::Store("injected failure".into())
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, path: &str, auth: Option<&str>) -> Result<Option<Value>, RepoError> {
        self.inner.get(path, auth).await
    }

    async fn push(&self, path: &str, value: Value, auth: Option<&str>) -> Result<String, RepoError> {
        self.pass_gate().await?;
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.push(path, value, auth).await
    }

    async fn update(&self, path: &str, partial: Value, auth: Option<&str>) -> Result<(), RepoError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.update(path, partial, auth).await
    }

    async fn set(&self, path: &str, value: Value, auth: Option<&str>) -> Result<(), RepoError> {
        self.inner.set(path, value, auth).await
    }

    async fn remove(&self, path: &str, auth: Option<&str>) -> Result<(), RepoError> {
        self.pass_gate().await?;
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(injected());
        }
        self.inner.remove(path, auth).await
    }

    async fn subscribe(&self, path: &str, auth: Option<&str>) -> Result<Subscription, RepoError> {
        if take_one(&self.refused_subscribes) {
            return Err(injected());
        }
        if take_one(&self.broken_streams) {
            let (tx, rx) = mpsc::channel(2);
            tx.try_send(Ok(None)).map_err(|_| RepoError::Closed)?;
            tx.try_send(Err(RepoError::Closed)).map_err(|_| RepoError::Closed)?;
            return Ok(Subscription::new(rx, None));
        }
        self.inner.subscribe(path, auth).await
    }
}

pub fn user(name: &str) -> CurrentUser {
    CurrentUser {
        uid: format!("uid-{}", name),
        email: format!("{}@example.com", name),
        display_name: name.to_string(),
        id_token: format!("token-{}", name),
        refresh_token: None,
        expires_at: None,
    }
}

pub fn record(title: &str, author: &str, created_at: i64) -> Value {
    json!({
        "title": title,
        "description": format!("{} description", title),
        "image_url": "https://i.ibb.co/abc/pic.png",
        "author": author,
        "createdAt": created_at,
    })
}

/// Stores p1..pN written by `author`, p1 the oldest.
pub async fn seed_posts(docs: &dyn DocumentStore, n: usize, author: &str) {
    for i in 1..=n {
        docs.set(&format!("posts/p{}", i), record(&format!("post {}", i), author, i as i64 * 1_000), None)
            .await
            .unwrap();
    }
}

pub struct Harness {
    pub docs: Arc<FlakyStore>,
    pub store: SharedPostStore,
    pub notifier: Notifier,
    pub coordinator: MutationCoordinator,
    pub merger: SubscriptionMerger,
}

impl Harness {
    pub fn new() -> Self {
        let docs = Arc::new(FlakyStore::new());
        let store = SharedPostStore::new();
        let notifier = Notifier::new();
        let coordinator = MutationCoordinator::new(store.clone(), docs.clone(), notifier.clone());
        let merger = SubscriptionMerger::new(store.clone(), docs.clone(), notifier.clone());
        Self {
            docs,
            store,
            notifier,
            coordinator,
            merger,
        }
    }

    /// Seeds `n` posts by `author` and loads them into the feed.
    pub async fn seeded(n: usize, author: &str) -> Self {
        let h = Self::new();
        seed_posts(h.docs.as_ref(), n, author).await;
        h.merger.refresh().await.unwrap();
        h
    }

    pub fn ids(&self) -> Vec<String> {
        self.store
            .lock()
            .posts()
            .iter()
            .map(|p| p.id.to_string())
            .collect()
    }

    pub fn posts(&self) -> Vec<Post> {
        self.store.lock().snapshot()
    }
}

/// Polls `check` until it holds or a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Newest first, ties broken by id, no id twice.
pub fn assert_feed_invariants(posts: &[Post]) {
    for pair in posts.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(
            a.created_at > b.created_at || (a.created_at == b.created_at && a.id > b.id),
            "{} must come before {}",
            a.id,
            b.id
        );
    }
    let mut ids: Vec<_> = posts.iter().map(|p| p.id.clone()).collect();
    ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    ids.dedup();
    assert_eq!(ids.len(), posts.len(), "duplicate ids in feed");
}
