// src/handlers/auth_handlers.rs
use actix_web::{HttpResponse, get, post, web};

use crate::AppState;
use crate::dtos::ApiResponse;
use crate::dtos::auth_dtos::SessionOut;
use crate::error::AppResult;
use crate::models::user::{Credentials, Registration};
use crate::services::session::MSG_REGISTERED;

/// POST /auth/register
#[post("/register")]
pub async fn register(
    state: web::Data<AppState>,
    body: web::Json<Registration>,
) -> AppResult<HttpResponse> {
    let user = state.session.register(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(MSG_REGISTERED, SessionOut::of(Some(&user)))))
}

/// POST /auth/login
#[post("/login")]
pub async fn login(
    state: web::Data<AppState>,
    body: web::Json<Credentials>,
) -> AppResult<HttpResponse> {
    let user = state.session.login(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Signed in", SessionOut::of(Some(&user)))))
}

/// POST /auth/logout
#[post("/logout")]
pub async fn logout(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    state.session.logout().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Signed out", SessionOut::of(None))))
}

/// GET /auth/me
#[get("/me")]
pub async fn me(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let user = state.session.fresh_user().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Session", SessionOut::of(user.as_ref()))))
}
