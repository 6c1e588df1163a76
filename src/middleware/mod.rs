// src/middleware/mod.rs
pub mod auth_extractor;
