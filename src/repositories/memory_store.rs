// src/repositories/memory_store.rs
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::repositories::document_store::{DocumentStore, RepoError, SnapshotEvent, Subscription};

const SUBSCRIBER_BUFFER: usize = 64;

struct Watcher {
    path: Vec<String>,
    tx: mpsc::Sender<SnapshotEvent>,
}

/// Process-local document store. Backs `STORE_BACKEND=memory` and the tests.
#[derive(Default)]
pub struct MemoryStore {
    root: Mutex<Value>,
    watchers: Mutex<Vec<Watcher>>,
    seq: AtomicU64,
}

pub(crate) fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for seg in path {
        node = node.as_object()?.get(seg)?;
    }
    let empty = node.is_null() || node.as_object().is_some_and(|o| o.is_empty());
    if empty { None } else { Some(node) }
}

pub(crate) fn write(root: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for seg in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(obj) = node else {
            return;
        };
        node = obj.entry(seg.clone()).or_insert(Value::Null);
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Some(obj) = node.as_object_mut() {
        if value.is_null() {
            obj.remove(last);
        } else {
            obj.insert(last.clone(), value);
        }
    }
}

fn related(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Firebase-style push id: time ordered, unique within the process.
    fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let millis = chrono::Utc::now().timestamp_millis();
        format!("-M{:012x}{:06x}", millis, seq)
    }

    fn snapshot_at(&self, path: &[String]) -> Option<Value> {
        let root = self.root.lock().unwrap_or_else(|e| e.into_inner());
        lookup(&root, path).cloned()
    }

    fn mutate(&self, path: &[String], f: impl FnOnce(&mut Value)) {
        {
            let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut root);
        }
        self.notify(path);
    }

    fn notify(&self, changed: &[String]) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        watchers.retain(|w| {
            if !related(&w.path, changed) {
                return !w.tx.is_closed();
            }
            let snapshot = self.snapshot_at(&w.path);
            match w.tx.try_send(Ok(snapshot)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log::warn!("memory store subscriber lagging on /{}", w.path.join("/"));
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str, _auth: Option<&str>) -> Result<Option<Value>, RepoError> {
        Ok(self.snapshot_at(&segments(path)))
    }

    async fn push(&self, path: &str, value: Value, _auth: Option<&str>) -> Result<String, RepoError> {
        let id = self.next_id();
        let mut target = segments(path);
        target.push(id.clone());
        self.mutate(&target, |root| write(root, &target, value));
        Ok(id)
    }

    async fn update(&self, path: &str, partial: Value, _auth: Option<&str>) -> Result<(), RepoError> {
        let Value::Object(fields) = partial else {
            return Err(RepoError::Store("update expects an object".into()));
        };
        let base = segments(path);
        self.mutate(&base, |root| {
            for (key, value) in fields {
                let mut target = base.clone();
                target.extend(segments(&key));
                write(root, &target, value);
            }
        });
        Ok(())
    }

    async fn set(&self, path: &str, value: Value, _auth: Option<&str>) -> Result<(), RepoError> {
        let target = segments(path);
        self.mutate(&target, |root| write(root, &target, value));
        Ok(())
    }

    async fn remove(&self, path: &str, _auth: Option<&str>) -> Result<(), RepoError> {
        let target = segments(path);
        self.mutate(&target, |root| write(root, &target, Value::Null));
        Ok(())
    }

    async fn subscribe(&self, path: &str, _auth: Option<&str>) -> Result<Subscription, RepoError> {
        let path = segments(path);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        // The first event carries the current value, as the real backend does.
        tx.try_send(Ok(self.snapshot_at(&path)))
            .map_err(|_| RepoError::Closed)?;
        watchers.push(Watcher { path, tx });
        Ok(Subscription::new(rx, None))
    }
}
