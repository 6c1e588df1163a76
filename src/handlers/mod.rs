// src/handlers/mod.rs
pub mod auth_handlers;
pub mod image_handlers;
pub mod post_handlers;
pub mod prefs_handlers;
