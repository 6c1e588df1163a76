// src/store/mod.rs
pub mod pagination;
pub mod post_store;

pub use pagination::{Page, Pagination};
pub use post_store::{PostStore, SharedPostStore};
