// src/services/coordinator.rs
//! Optimistic post mutations.
//!
//! Each mutation is split into a synchronous `stage_*` step that applies the
//! local effect immediately and an async `commit_*` step that talks to the
//! document store and reconciles (or rolls back) the local state.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::post::{Post, PostDraft, PostId, PostStatus};
use crate::models::user::CurrentUser;
use crate::repositories::document_store::{CallPolicy, DocumentStore, POSTS_PATH, post_path};
use crate::services::merger::decode_post;
use crate::services::notifier::Notifier;
use crate::store::SharedPostStore;

pub const MSG_CREATED: &str = "Post added successfully!";
pub const MSG_CREATE_FAILED: &str = "Error happened while adding post";
pub const MSG_DELETED: &str = "Post deleted successfully";
pub const MSG_DELETE_FAILED: &str = "Failed to delete post";
pub const MSG_UPDATED: &str = "Post updated successfully!";
pub const MSG_UPDATE_FAILED: &str = "Error happened while updating post";

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// State captured when a delete is staged, used to undo it.
#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub post: Post,
    previous: Vec<Post>,
    revision: u64,
}

#[derive(Clone)]
pub struct MutationCoordinator {
    store: SharedPostStore,
    docs: Arc<dyn DocumentStore>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    policy: CallPolicy,
    last_stamp: Arc<AtomicI64>,
}

impl MutationCoordinator {
    pub fn new(store: SharedPostStore, docs: Arc<dyn DocumentStore>, notifier: Notifier) -> Self {
        Self {
            store,
            docs,
            notifier,
            clock: Arc::new(SystemClock),
            policy: CallPolicy::default(),
            last_stamp: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current time in millis, strictly greater than any stamp handed out before.
    fn stamp(&self) -> i64 {
        let now = self.clock.now_millis();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(prev + 1)
    }

    pub fn stage_create(&self, draft: PostDraft, user: &CurrentUser) -> AppResult<Post> {
        draft.validate()?;
        let post = Post {
            id: PostId::temporary(),
            title: draft.title,
            description: draft.description,
            image_url: draft.image_url,
            author: user.display_name.clone(),
            created_at: self.stamp(),
            updated_at: None,
            status: PostStatus::Pending,
        };
        if !self.store.lock().insert_optimistic(post.clone()) {
            return Err(AppError::Conflict(format!("post {} already exists", post.id)));
        }
        self.notifier.success(MSG_CREATED);
        Ok(post)
    }

    /// Pushes a staged post. On success the temporary entry becomes the
    /// confirmed post; on failure it stays in the feed marked as failed.
    pub async fn commit_create(&self, pending: &Post, user: &CurrentUser) -> AppResult<PostId> {
        let record = serde_json::to_value(pending.to_record())
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let pushed = self
            .policy
            .once(self.docs.push(POSTS_PATH, record, Some(&user.id_token)))
            .await;

        match pushed {
            Ok(real) => {
                let real_id = PostId::new(real);
                let mut confirmed = pending.clone();
                confirmed.id = real_id.clone();
                confirmed.status = PostStatus::Confirmed;
                let inserted = self.store.lock().confirm(&pending.id, confirmed);
                log::info!(
                    "post {} confirmed as {} (replaced locally: {})",
                    pending.id, real_id, inserted
                );
                Ok(real_id)
            }
            Err(e) => {
                log::error!("failed to create post {}: {}", pending.id, e);
                self.store.lock().set_status(&pending.id, PostStatus::Failed);
                self.notifier.error(MSG_CREATE_FAILED);
                Err(AppError::StoreWrite(e))
            }
        }
    }

    pub async fn create(&self, draft: PostDraft, user: &CurrentUser) -> AppResult<PostId> {
        let pending = self.stage_create(draft, user)?;
        self.commit_create(&pending, user).await
    }

    /// Flips a failed post back to pending so it can be pushed again.
    pub fn stage_retry(&self, id: &PostId) -> AppResult<Post> {
        let mut store = self.store.lock();
        let post = store.get(id).cloned().ok_or(AppError::NotFound)?;
        if post.status != PostStatus::Failed {
            return Err(AppError::Conflict(format!("post {} has not failed", id)));
        }
        store.set_status(id, PostStatus::Pending);
        Ok(Post {
            status: PostStatus::Pending,
            ..post
        })
    }

    pub async fn retry(&self, id: &PostId, user: &CurrentUser) -> AppResult<PostId> {
        let pending = self.stage_retry(id)?;
        self.commit_create(&pending, user).await
    }

    /// Drops a post whose push failed. Only such posts exist nowhere but here.
    pub fn discard(&self, id: &PostId) -> AppResult<Post> {
        if !id.is_temporary() {
            return Err(AppError::Conflict(format!("post {} is already saved", id)));
        }
        let mut store = self.store.lock();
        let post = store.get(id).ok_or(AppError::NotFound)?;
        ensure_not_in_flight(post)?;
        store.remove_by_id(id).ok_or(AppError::NotFound)
    }

    /// Removes the post from the feed right away. Returns `None` when the post
    /// failed to save, in which case nothing is left to commit. A post whose
    /// push is still in flight cannot be deleted yet.
    pub fn stage_delete(&self, id: &PostId, user: &CurrentUser) -> AppResult<Option<PendingDelete>> {
        let mut store = self.store.lock();
        let post = store.get(id).ok_or(AppError::NotFound)?;
        ensure_author(post, user)?;
        if id.is_temporary() {
            ensure_not_in_flight(post)?;
            store.remove_by_id(id);
            return Ok(None);
        }

        let previous = store.snapshot();
        let post = store.remove_by_id(id).ok_or(AppError::NotFound)?;
        store.hide(id);
        let revision = store.revision();
        drop(store);

        self.notifier.success(MSG_DELETED);
        Ok(Some(PendingDelete {
            post,
            previous,
            revision,
        }))
    }

    pub async fn commit_delete(&self, pending: PendingDelete, user: &CurrentUser) -> AppResult<()> {
        let id = pending.post.id.clone();
        let path = post_path(id.as_str());
        let removed = self
            .policy
            .idempotent(|| self.docs.remove(&path, Some(&user.id_token)))
            .await;

        let mut store = self.store.lock();
        store.unhide(&id);
        match removed {
            Ok(()) => {
                log::info!("post {} deleted", id);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to delete post {}: {}", id, e);
                if store.revision() == pending.revision {
                    store.restore(pending.previous);
                } else {
                    // Something else changed the feed meanwhile; only undo our removal.
                    store.reinsert(pending.post);
                }
                drop(store);
                self.notifier.dismiss_all();
                self.notifier.error(MSG_DELETE_FAILED);
                Err(AppError::StoreWrite(e))
            }
        }
    }

    pub async fn delete(&self, id: &PostId, user: &CurrentUser) -> AppResult<()> {
        match self.stage_delete(id, user)? {
            Some(pending) => self.commit_delete(pending, user).await,
            None => Ok(()),
        }
    }

    /// Sends the edited fields. The feed itself only changes once the store
    /// pushes the new version back.
    pub async fn update(&self, id: &PostId, draft: PostDraft, user: &CurrentUser) -> AppResult<()> {
        draft.validate()?;
        if id.is_temporary() {
            return Err(AppError::Conflict(format!("post {} is not saved yet", id)));
        }
        let known = self.store.lock().get(id).cloned();
        let current = match known {
            Some(post) => post,
            None => self.load(id).await?.ok_or(AppError::NotFound)?,
        };
        ensure_author(&current, user)?;

        let path = post_path(id.as_str());
        let partial = json!({
            "title": draft.title,
            "description": draft.description,
            "image_url": draft.image_url,
            "updatedAt": self.stamp(),
        });
        let updated = self
            .policy
            .idempotent(|| self.docs.update(&path, partial.clone(), Some(&user.id_token)))
            .await;

        match updated {
            Ok(()) => {
                log::info!("post {} updated", id);
                self.notifier.success(MSG_UPDATED);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to update post {}: {}", id, e);
                self.notifier.error(MSG_UPDATE_FAILED);
                Err(AppError::StoreWrite(e))
            }
        }
    }

    /// Reads one post straight from the store, for the edit form.
    pub async fn load(&self, id: &PostId) -> AppResult<Option<Post>> {
        if id.is_temporary() {
            return Ok(self.store.lock().get(id).cloned());
        }
        let path = post_path(id.as_str());
        let value = self
            .policy
            .idempotent(|| self.docs.get(&path, None))
            .await
            .map_err(|e| {
                log::error!("failed to load post {}: {}", id, e);
                AppError::StoreRead(e)
            })?;
        Ok(value.and_then(|v| decode_post(id.as_str(), v)))
    }
}

fn ensure_not_in_flight(post: &Post) -> AppResult<()> {
    if post.status == PostStatus::Pending {
        return Err(AppError::Conflict(format!("post {} is still being saved", post.id)));
    }
    Ok(())
}

fn ensure_author(post: &Post, user: &CurrentUser) -> AppResult<()> {
    if post.author == user.display_name {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "post {} belongs to another author",
            post.id
        )))
    }
}
