// src/error.rs
use std::fmt;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use crate::repositories::document_store::RepoError;
use crate::repositories::image_host::ImageError;
use crate::services::auth_services::AuthError;

/// One failed form constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every constraint a submitted form violated. Checked before any remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errs = Self::new();
        errs.add(field, message);
        errs
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("store write failed: {0}")]
    StoreWrite(RepoError),
    #[error("store read failed: {0}")]
    StoreRead(RepoError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("image upload failed: {0}")]
    ImageUpload(#[from] ImageError),
    #[error("not found")]
    NotFound,
    #[error("sign in required")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a ValidationErrors>,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(AuthError::InvalidCredentials)
            | AppError::Auth(AuthError::EmailExists)
            | AppError::Auth(AuthError::Rejected(_)) => StatusCode::BAD_REQUEST,
            AppError::Auth(AuthError::InvalidToken) | AppError::Unauthorized => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Auth(_) => StatusCode::BAD_GATEWAY,
            AppError::StoreWrite(_) | AppError::StoreRead(_) => StatusCode::BAD_GATEWAY,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ImageUpload(ImageError::UnsupportedType(_))
            | AppError::ImageUpload(ImageError::InvalidData(_)) => StatusCode::BAD_REQUEST,
            AppError::ImageUpload(_) => StatusCode::BAD_GATEWAY,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        } else {
            log::warn!("{}", self);
        }
        let data = match self {
            AppError::Validation(errs) => Some(errs),
            _ => None,
        };
        HttpResponse::build(status).json(ErrorBody {
            status: "error",
            message: self.to_string(),
            data,
        })
    }
}
