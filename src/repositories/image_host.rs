// src/repositories/image_host.rs
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use mime::Mime;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unsupported image type: {0}")]
    UnsupportedType(String),
    #[error("invalid image data: {0}")]
    InvalidData(String),
    #[error("image host error: {0}")]
    Host(String),
}

/// Decoded image ready to be sent to the host.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: Mime,
}

impl ImageUpload {
    /// Builds an upload from a base64 payload, with or without a
    /// `data:image/...;base64,` prefix.
    pub fn from_base64(image_data: &str, file_name: &str, content_type: &str) -> Result<Self, ImageError> {
        let content_type = parse_image_type(content_type)?;
        let encoded = match image_data.split_once(',') {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => image_data,
        };
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| ImageError::InvalidData(e.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageError::InvalidData("empty image".into()));
        }
        let file_name = if file_name.trim().is_empty() {
            format!("upload.{}", extension_for(&content_type))
        } else {
            file_name.trim().to_string()
        };
        Ok(Self {
            bytes,
            file_name,
            content_type,
        })
    }
}

fn parse_image_type(content_type: &str) -> Result<Mime, ImageError> {
    // "image/jpg" is not registered but browsers still send it.
    let normalized = match content_type.trim() {
        "image/jpg" => "image/jpeg",
        other => other,
    };
    let mime: Mime = normalized
        .parse()
        .map_err(|_| ImageError::UnsupportedType(content_type.to_string()))?;
    let allowed = mime == mime::IMAGE_JPEG
        || mime == mime::IMAGE_PNG
        || mime == mime::IMAGE_GIF
        || mime.essence_str() == "image/webp";
    if allowed {
        Ok(mime)
    } else {
        Err(ImageError::UnsupportedType(content_type.to_string()))
    }
}

fn extension_for(mime: &Mime) -> &'static str {
    match mime.subtype().as_str() {
        "png" => "png",
        "gif" => "gif",
        "webp" => "webp",
        _ => "jpg",
    }
}

/// External service that stores an image and hands back a public URL.
#[async_trait]
pub trait ImageHost: Send + Sync {
    async fn upload(&self, image: ImageUpload) -> Result<String, ImageError>;
}

/// imgbb upload API.
#[derive(Clone)]
pub struct ImgbbHost {
    client: Client,
    api_key: String,
    endpoint: String,
}

#[derive(Deserialize)]
struct ImgbbResponse {
    data: Option<ImgbbData>,
    error: Option<ImgbbErrorBody>,
}

#[derive(Deserialize)]
struct ImgbbData {
    url: String,
}

#[derive(Deserialize)]
struct ImgbbErrorBody {
    message: Option<String>,
}

impl ImgbbHost {
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.imgbb.com/1/upload";

    pub fn new(client: Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl ImageHost for ImgbbHost {
    async fn upload(&self, image: ImageUpload) -> Result<String, ImageError> {
        let size = image.bytes.len();
        let part = Part::bytes(image.bytes)
            .file_name(image.file_name.clone())
            .mime_str(image.content_type.as_ref())?;
        let form = Form::new().part("image", part);

        log::info!("uploading image {} ({} bytes)", image.file_name, size);
        let resp = self
            .client
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let parsed: Option<ImgbbResponse> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.error)
                .and_then(|e| e.message)
                .unwrap_or(text);
            log::warn!("image upload failed: {} {}", status, message);
            return Err(ImageError::Host(format!("{} - {}", status.as_u16(), message)));
        }

        parsed
            .and_then(|p| p.data)
            .map(|d| d.url)
            .ok_or_else(|| ImageError::Host(format!("no url in response: {}", text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_data_url_prefix() {
        let encoded = general_purpose::STANDARD.encode(b"\x89PNG fake");
        let upload =
            ImageUpload::from_base64(&format!("data:image/png;base64,{}", encoded), "a.png", "image/png")
                .unwrap();
        assert_eq!(upload.bytes, b"\x89PNG fake");
        assert_eq!(upload.content_type, mime::IMAGE_PNG);
    }

    #[test]
    fn jpg_alias_is_normalised() {
        let encoded = general_purpose::STANDARD.encode(b"jpeg bytes");
        let upload = ImageUpload::from_base64(&encoded, "", "image/jpg").unwrap();
        assert_eq!(upload.content_type, mime::IMAGE_JPEG);
        assert_eq!(upload.file_name, "upload.jpg");
    }

    #[test]
    fn rejects_non_images_and_bad_base64() {
        assert!(matches!(
            ImageUpload::from_base64("aGVsbG8=", "a.txt", "text/plain"),
            Err(ImageError::UnsupportedType(_))
        ));
        assert!(matches!(
            ImageUpload::from_base64("not base64!!", "a.png", "image/png"),
            Err(ImageError::InvalidData(_))
        ));
        assert!(matches!(
            ImageUpload::from_base64("", "a.png", "image/png"),
            Err(ImageError::InvalidData(_))
        ));
    }
}
