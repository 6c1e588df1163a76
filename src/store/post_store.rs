// src/store/post_store.rs
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::post::{Post, PostId, PostStatus, feed_order};

/// Handle shared by the coordinator, the merger and the views. The lock is
/// only ever held for one synchronous store operation.
#[derive(Clone, Default)]
pub struct SharedPostStore(Arc<Mutex<PostStore>>);

impl SharedPostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, PostStore> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Ordered feed of posts: newest first, unique ids.
#[derive(Debug, Default)]
pub struct PostStore {
    posts: Vec<Post>,
    /// Posts with a delete in flight; snapshots must not bring them back.
    hidden: HashSet<PostId>,
    revision: u64,
    loading: bool,
}

impl PostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &PostId) -> bool {
        self.get(id).is_some()
    }

    /// Bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    pub fn snapshot(&self) -> Vec<Post> {
        self.posts.clone()
    }

    /// Swaps in a whole new collection.
    pub fn replace_all(&mut self, posts: Vec<Post>) {
        self.posts = self.normalize(posts);
        self.touch();
    }

    /// Adds a local-only post at its ordered position (the head for a fresh
    /// submission). Returns false if the id is already present.
    pub fn insert_optimistic(&mut self, post: Post) -> bool {
        if self.contains(&post.id) {
            return false;
        }
        self.insert_ordered(post);
        true
    }

    pub fn remove_by_id(&mut self, id: &PostId) -> Option<Post> {
        let idx = self.posts.iter().position(|p| &p.id == id)?;
        let removed = self.posts.remove(idx);
        self.touch();
        Some(removed)
    }

    /// Rolls back to a collection saved earlier with `snapshot`.
    pub fn restore(&mut self, previous: Vec<Post>) {
        self.replace_all(previous);
    }

    /// Puts a single post back where the ordering says it belongs.
    pub fn reinsert(&mut self, post: Post) -> bool {
        if self.contains(&post.id) || self.hidden.contains(&post.id) {
            return false;
        }
        self.insert_ordered(post);
        true
    }

    /// Replaces a temporary entry with its acknowledged counterpart. Nothing
    /// happens when the temporary entry is already gone; if the real id is
    /// already present only the temporary entry is dropped. Returns whether
    /// the confirmed post was inserted.
    pub fn confirm(&mut self, temp_id: &PostId, confirmed: Post) -> bool {
        if !self.contains(temp_id) {
            return false;
        }
        self.remove_by_id(temp_id);
        if self.contains(&confirmed.id) {
            return false;
        }
        self.insert_ordered(confirmed);
        true
    }

    pub fn set_status(&mut self, id: &PostId, status: PostStatus) -> bool {
        match self.posts.iter_mut().find(|p| &p.id == id) {
            Some(post) => {
                post.status = status;
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn hide(&mut self, id: &PostId) {
        self.hidden.insert(id.clone());
    }

    pub fn unhide(&mut self, id: &PostId) {
        self.hidden.remove(id);
    }

    pub fn is_hidden(&self, id: &PostId) -> bool {
        self.hidden.contains(id)
    }

    fn insert_ordered(&mut self, post: Post) {
        let idx = self
            .posts
            .partition_point(|p| feed_order(p, &post) == Ordering::Less);
        self.posts.insert(idx, post);
        self.touch();
    }

    fn normalize(&self, posts: Vec<Post>) -> Vec<Post> {
        let mut seen = HashSet::new();
        // Walk backwards so the last occurrence of an id wins.
        let mut out: Vec<Post> = posts
            .into_iter()
            .rev()
            .filter(|p| !self.hidden.contains(&p.id) && seen.insert(p.id.clone()))
            .collect();
        out.sort_by(feed_order);
        out
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}
