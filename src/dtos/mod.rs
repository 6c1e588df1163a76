// src/dtos/mod.rs
pub mod auth_dtos;
pub mod image_dtos;
pub mod post_dtos;

use serde::Serialize;

/// Envelope every route answers with.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}
