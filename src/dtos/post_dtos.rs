// src/dtos/post_dtos.rs
use serde::{Deserialize, Serialize};

use crate::dtos::image_dtos::UploadImageRequest;
use crate::models::post::{Post, PostDraft, PostStatus};
use crate::store::Page;

/// Body of `POST /api/posts` and `PUT /api/posts/{id}`. Either an already
/// hosted `image_url` or an inline `image` to upload first.
#[derive(Debug, Deserialize)]
pub struct CreatePostDTO {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub image_url: Option<String>,
    pub image: Option<UploadImageRequest>,
}

impl CreatePostDTO {
    pub fn into_draft(self, uploaded_url: Option<String>) -> PostDraft {
        PostDraft {
            title: self.title,
            description: self.description,
            image_url: uploaded_url.or(self.image_url).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostOut {
    pub id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub author: String,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    pub status: PostStatus,
    pub is_pending: bool,
    pub is_own_post: bool,
}

impl PostOut {
    pub fn from_post(post: Post, viewer: Option<&str>) -> Self {
        let is_own_post = viewer.is_some_and(|name| name == post.author);
        Self {
            id: post.id.to_string(),
            is_pending: post.is_pending(),
            title: post.title,
            description: post.description,
            image_url: post.image_url,
            author: post.author,
            created_at: post.created_at,
            updated_at: post.updated_at,
            status: post.status,
            is_own_post,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPageOut {
    #[serde(flatten)]
    pub page: Page<PostOut>,
    pub loading: bool,
    pub is_empty: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedOut {
    pub id: String,
    pub status: PostStatus,
}
