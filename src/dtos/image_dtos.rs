// src/dtos/image_dtos.rs
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct UploadImageRequest {
    pub image_data: String, // base64, data-URL prefix allowed
    #[serde(default)]
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Serialize)]
pub struct ImageOut {
    pub url: String,
}
