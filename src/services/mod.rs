// src/services/mod.rs
pub mod auth_services;
pub mod coordinator;
pub mod merger;
pub mod notifier;
pub mod session;
