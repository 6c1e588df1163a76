// src/handlers/image_handlers.rs
use actix_web::{HttpResponse, post, web};

use crate::AppState;
use crate::dtos::ApiResponse;
use crate::dtos::image_dtos::{ImageOut, UploadImageRequest};
use crate::error::{AppError, AppResult};
use crate::middleware::auth_extractor::SignedIn;
use crate::repositories::image_host::{ImageError, ImageUpload};

pub const MSG_UPLOAD_FAILED: &str = "Failed to upload image";

/// Decodes and uploads an inline image; returns the hosted URL.
pub async fn upload_inline(state: &AppState, req: &UploadImageRequest) -> AppResult<String> {
    let upload = ImageUpload::from_base64(&req.image_data, &req.file_name, &req.content_type)?;
    let host = state
        .image_host
        .as_ref()
        .ok_or_else(|| ImageError::Host("image hosting is not configured".into()))?;

    log::info!(
        "uploading {} ({}, {} bytes)",
        upload.file_name,
        upload.content_type,
        upload.bytes.len()
    );
    host.upload(upload).await.map_err(|e| {
        log::error!("image upload failed: {}", e);
        state.notifier.error(MSG_UPLOAD_FAILED);
        AppError::ImageUpload(e)
    })
}

/// POST /api/images
#[post("/images")]
pub async fn upload_image(
    state: web::Data<AppState>,
    _user: SignedIn,
    body: web::Json<UploadImageRequest>,
) -> AppResult<HttpResponse> {
    let url = upload_inline(&state, &body).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Image uploaded", ImageOut { url })))
}
