// src/repositories/mod.rs
pub mod document_store;
pub mod firebase_store;
pub mod image_host;
pub mod memory_store;
