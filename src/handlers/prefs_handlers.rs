// src/handlers/prefs_handlers.rs
use actix_web::{HttpResponse, get, put, web};

use crate::AppState;
use crate::dtos::ApiResponse;
use crate::dtos::auth_dtos::{ThemeIn, ThemeOut};
use crate::error::AppResult;

/// GET /api/notices
///
/// Hands out every queued notice once.
#[get("/notices")]
pub async fn list_notices(state: web::Data<AppState>) -> HttpResponse {
    let notices = state.notifier.drain();
    HttpResponse::Ok().json(ApiResponse::success("Notices", notices))
}

#[get("/theme")]
pub async fn get_theme(state: web::Data<AppState>) -> HttpResponse {
    let theme = state.session.theme();
    HttpResponse::Ok().json(ApiResponse::success("Theme", ThemeOut { theme }))
}

/// PUT /api/theme. An empty body toggles.
#[put("/theme")]
pub async fn put_theme(
    state: web::Data<AppState>,
    body: Option<web::Json<ThemeIn>>,
) -> AppResult<HttpResponse> {
    let requested = body.and_then(|b| b.into_inner().theme);
    let theme = match requested {
        Some(theme) => state.session.set_theme(theme)?,
        None => state.session.toggle_theme()?,
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success("Theme saved", ThemeOut { theme })))
}
