// src/repositories/firebase_store.rs
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use urlencoding::encode;

use crate::repositories::document_store::{DocumentStore, RepoError, SnapshotEvent, Subscription};
use crate::repositories::memory_store::{lookup, segments, write};

const STREAM_BUFFER: usize = 16;

/// Firebase Realtime Database over its REST API.
#[derive(Clone)]
pub struct FirebaseStore {
    client: Client,
    database_url: String,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

#[derive(Deserialize)]
struct StreamPayload {
    path: String,
    data: Value,
}

impl FirebaseStore {
    pub fn new(client: Client, database_url: &str) -> Self {
        Self {
            client,
            database_url: database_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        let encoded: Vec<String> = segments(path)
            .iter()
            .map(|s| encode(s).into_owned())
            .collect();
        format!("{}/{}.json", self.database_url, encoded.join("/"))
    }

    fn with_auth(req: RequestBuilder, auth: Option<&str>) -> RequestBuilder {
        match auth {
            Some(token) => req.query(&[("auth", token)]),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> Result<String, RepoError> {
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.is_success() {
            log::debug!("firebase {} -> {}", what, status);
            return Ok(text);
        }
        log::warn!("firebase {} failed: {} {}", what, status, text);
        Err(error_for(status, &text))
    }
}

fn error_for(status: StatusCode, body: &str) -> RepoError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepoError::PermissionDenied(message),
        _ => RepoError::Store(format!("{} - {}", status.as_u16(), message)),
    }
}

#[async_trait::async_trait]
impl DocumentStore for FirebaseStore {
    async fn get(&self, path: &str, auth: Option<&str>) -> Result<Option<Value>, RepoError> {
        let req = Self::with_auth(self.client.get(self.url(path)), auth);
        let text = self.send(req, &format!("GET /{}", path)).await?;
        let value: Value = serde_json::from_str(&text)?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn push(&self, path: &str, value: Value, auth: Option<&str>) -> Result<String, RepoError> {
        let req = Self::with_auth(self.client.post(self.url(path)), auth).json(&value);
        let text = self.send(req, &format!("POST /{}", path)).await?;
        let pushed: PushResponse = serde_json::from_str(&text)?;
        Ok(pushed.name)
    }

    async fn update(&self, path: &str, partial: Value, auth: Option<&str>) -> Result<(), RepoError> {
        let req = Self::with_auth(self.client.patch(self.url(path)), auth).json(&partial);
        self.send(req, &format!("PATCH /{}", path)).await.map(|_| ())
    }

    async fn set(&self, path: &str, value: Value, auth: Option<&str>) -> Result<(), RepoError> {
        let req = Self::with_auth(self.client.put(self.url(path)), auth).json(&value);
        self.send(req, &format!("PUT /{}", path)).await.map(|_| ())
    }

    async fn remove(&self, path: &str, auth: Option<&str>) -> Result<(), RepoError> {
        let req = Self::with_auth(self.client.delete(self.url(path)), auth);
        self.send(req, &format!("DELETE /{}", path)).await.map(|_| ())
    }

    async fn subscribe(&self, path: &str, auth: Option<&str>) -> Result<Subscription, RepoError> {
        let req = Self::with_auth(self.client.get(self.url(path)), auth)
            .header("Accept", "text/event-stream");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(error_for(status, &text));
        }
        log::info!("subscribed to /{}", path);

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let label = path.to_string();
        let reader = tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut parser = SseParser::default();
            let mut mirror = StreamMirror::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(RepoError::Http(e))).await;
                        return;
                    }
                };
                for event in parser.feed(&chunk) {
                    let Some(outcome) = mirror.apply(&event) else {
                        continue;
                    };
                    let stop = matches!(outcome, Err(RepoError::PermissionDenied(_)));
                    if tx.send(outcome).await.is_err() || stop {
                        return;
                    }
                }
            }
            log::info!("stream for /{} ended", label);
            let _ = tx.send(Err(RepoError::Closed)).await;
        });
        Ok(Subscription::new(rx, Some(reader)))
    }
}

/// One Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
#[derive(Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();
        while let Some(end) = self.buf.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buf.drain(..end + 2).collect();
            let block = String::from_utf8_lossy(&raw);
            let mut event = String::from("message");
            let mut data: Vec<&str> = Vec::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    event = v.trim().to_string();
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push(v.strip_prefix(' ').unwrap_or(v));
                }
            }
            if !data.is_empty() || event != "message" {
                events.push(SseEvent {
                    event,
                    data: data.join("\n"),
                });
            }
        }
        events
    }
}

/// Local copy of the subscribed subtree, rebuilt from `put`/`patch` events so
/// every change can be forwarded as a full snapshot.
#[derive(Default)]
pub struct StreamMirror {
    tree: Value,
}

impl StreamMirror {
    /// Applies one event; returns the snapshot to forward, if any.
    pub fn apply(&mut self, event: &SseEvent) -> Option<SnapshotEvent> {
        match event.event.as_str() {
            "put" | "patch" => {
                let payload: StreamPayload = match serde_json::from_str(&event.data) {
                    Ok(p) => p,
                    Err(e) => return Some(Err(RepoError::Serde(e))),
                };
                let base = segments(&payload.path);
                if event.event == "put" {
                    write(&mut self.tree, &base, payload.data);
                } else if let Value::Object(fields) = payload.data {
                    for (key, value) in fields {
                        let mut target = base.clone();
                        target.extend(segments(&key));
                        write(&mut self.tree, &target, value);
                    }
                }
                Some(Ok(lookup(&self.tree, &[]).cloned()))
            }
            "keep-alive" => None,
            "cancel" => Some(Err(RepoError::PermissionDenied(
                "read permission revoked".into(),
            ))),
            "auth_revoked" => Some(Err(RepoError::PermissionDenied("auth revoked".into()))),
            other => {
                log::debug!("ignoring stream event {}", other);
                None
            }
        }
    }
}
