// src/models/post.rs
use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationErrors;

/// Prefix reserved for ids minted locally before the store assigns a real one.
pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn temporary() -> Self {
        Self(format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Where a post sits in its lifecycle relative to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Confirmed,
    Pending,
    Failed,
}

impl PostStatus {
    /// Local-only entries are the ones a snapshot may supersede.
    pub fn is_local(self) -> bool {
        matches!(self, PostStatus::Pending | PostStatus::Failed)
    }
}

/// Row stored under `posts/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub title: String,
    pub description: String,
    #[serde(rename = "image_url", default)]
    pub image_url: String,
    #[serde(default)]
    pub author: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub author: String,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub status: PostStatus,
}

impl Post {
    pub fn confirmed(id: PostId, record: PostRecord) -> Self {
        Self {
            id,
            title: record.title,
            description: record.description,
            image_url: record.image_url,
            author: record.author,
            created_at: record.created_at,
            updated_at: record.updated_at,
            status: PostStatus::Confirmed,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == PostStatus::Pending
    }

    pub fn to_record(&self) -> PostRecord {
        PostRecord {
            title: self.title.clone(),
            description: self.description.clone(),
            image_url: self.image_url.clone(),
            author: self.author.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// True when `other` looks like the same logical post written by the same
    /// author within `window_ms` of this one.
    pub fn same_content(&self, other: &Post, window_ms: i64) -> bool {
        self.title == other.title
            && self.description == other.description
            && self.author == other.author
            && (self.created_at - other.created_at).abs() <= window_ms
    }
}

pub const TITLE_MIN: usize = 5;
pub const TITLE_MAX: usize = 50;
pub const DESCRIPTION_MIN: usize = 10;
pub const DESCRIPTION_MAX: usize = 700;

static IMAGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(https?://[^\s$.?#].[^\s]*)$").expect("image url pattern compiles")
});

/// What the user submits when creating or editing a post, with the image
/// already resolved to a hosted URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub description: String,
    pub image_url: String,
}

impl PostDraft {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();

        let title_len = self.title.chars().count();
        if self.title.trim().is_empty() {
            errs.add("title", "Title is required");
        } else if title_len < TITLE_MIN {
            errs.add("title", format!("Title must be {} chars or more", TITLE_MIN));
        } else if title_len > TITLE_MAX {
            errs.add("title", format!("Title must be {} chars or less", TITLE_MAX));
        }

        let description_len = self.description.chars().count();
        if self.description.trim().is_empty() {
            errs.add("description", "Description is required");
        } else if description_len < DESCRIPTION_MIN {
            errs.add(
                "description",
                format!("Description must be {} chars or more", DESCRIPTION_MIN),
            );
        } else if description_len > DESCRIPTION_MAX {
            errs.add(
                "description",
                format!("Description must be {} chars or less", DESCRIPTION_MAX),
            );
        }

        if self.image_url.trim().is_empty() {
            errs.add("image_url", "Image URL is required");
        } else if !IMAGE_URL_RE.is_match(&self.image_url) {
            errs.add("image_url", "Invalid URL format");
        }

        errs.into_result()
    }
}

/// Feed order: newest `created_at` first, ties broken by id descending.
pub fn feed_order(a: &Post, b: &Post) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}
