// src/services/notifier.rs
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

const MAX_NOTICES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Transient, non-blocking message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Bounded queue of notices the view drains and displays. Oldest notices
/// fall off once the queue is full.
#[derive(Clone, Default)]
pub struct Notifier {
    queue: Arc<Mutex<VecDeque<Notice>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Success, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(NoticeLevel::Error, message.into());
    }

    /// Drops every notice not yet shown.
    pub fn dismiss_all(&self) {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn drain(&self) -> Vec<Notice> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn pending(&self) -> Vec<Notice> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn push(&self, level: NoticeLevel, message: String) {
        match level {
            NoticeLevel::Success => log::info!("notice: {}", message),
            NoticeLevel::Error => log::warn!("notice: {}", message),
        }
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() == MAX_NOTICES {
            queue.pop_front();
        }
        queue.push_back(Notice { level, message });
    }
}
