// src/handlers/post_handlers.rs
use actix_web::{HttpResponse, delete, get, post, put, web};

use crate::AppState;
use crate::dtos::ApiResponse;
use crate::dtos::post_dtos::{AcceptedOut, CreatePostDTO, FeedPageOut, PageQuery, PostOut};
use crate::error::{AppError, AppResult};
use crate::handlers::image_handlers::upload_inline;
use crate::middleware::auth_extractor::SignedIn;
use crate::models::post::PostId;
use crate::store::{Page, Pagination};

/// GET /api/posts?page=N
#[get("/posts")]
pub async fn list_posts(
    state: web::Data<AppState>,
    viewer: Option<SignedIn>,
    query: web::Query<PageQuery>,
) -> AppResult<HttpResponse> {
    let pagination = Pagination::new(state.page_size, query.page.unwrap_or(1))?;
    let (page, loading) = {
        let store = state.store.lock();
        (Page::of(store.posts(), pagination), store.is_loading())
    };
    let viewer_name = viewer.map(|SignedIn(u)| u.display_name);
    let is_empty = page.total == 0;
    let page = page.map(|p| PostOut::from_post(p, viewer_name.as_deref()));

    Ok(HttpResponse::Ok().json(ApiResponse::success(
        "Posts fetched",
        FeedPageOut {
            page,
            loading,
            is_empty,
        },
    )))
}

/// POST /api/posts
///
/// The post shows up in the feed as pending right away; the push to the
/// store finishes in the background.
#[post("/posts")]
pub async fn create_post(
    state: web::Data<AppState>,
    SignedIn(user): SignedIn,
    body: web::Json<CreatePostDTO>,
) -> AppResult<HttpResponse> {
    let body = body.into_inner();
    let uploaded = match &body.image {
        Some(image) => Some(upload_inline(&state, image).await?),
        None => None,
    };
    let pending = state.coordinator.stage_create(body.into_draft(uploaded), &user)?;

    let coordinator = state.coordinator.clone();
    let staged = pending.clone();
    actix_web::rt::spawn(async move {
        // Outcome is reflected in the feed and the notices.
        let _ = coordinator.commit_create(&staged, &user).await;
    });

    Ok(HttpResponse::Accepted().json(ApiResponse::success(
        "Post added",
        PostOut::from_post(pending, None),
    )))
}

/// GET /api/posts/{id}
#[get("/posts/{id}")]
pub async fn get_post(
    state: web::Data<AppState>,
    viewer: Option<SignedIn>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = PostId::new(path.into_inner());
    let post = state.coordinator.load(&id).await?.ok_or(AppError::NotFound)?;
    let viewer_name = viewer.map(|SignedIn(u)| u.display_name);
    Ok(HttpResponse::Ok().json(ApiResponse::success(
        "Post fetched",
        PostOut::from_post(post, viewer_name.as_deref()),
    )))
}

/// PUT /api/posts/{id}
#[put("/posts/{id}")]
pub async fn update_post(
    state: web::Data<AppState>,
    SignedIn(user): SignedIn,
    path: web::Path<String>,
    body: web::Json<CreatePostDTO>,
) -> AppResult<HttpResponse> {
    let id = PostId::new(path.into_inner());
    let body = body.into_inner();
    let uploaded = match &body.image {
        Some(image) => Some(upload_inline(&state, image).await?),
        None => None,
    };
    state
        .coordinator
        .update(&id, body.into_draft(uploaded), &user)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Post updated", id.to_string())))
}

/// DELETE /api/posts/{id}
#[delete("/posts/{id}")]
pub async fn delete_post(
    state: web::Data<AppState>,
    SignedIn(user): SignedIn,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = PostId::new(path.into_inner());
    if let Some(pending) = state.coordinator.stage_delete(&id, &user)? {
        let coordinator = state.coordinator.clone();
        actix_web::rt::spawn(async move {
            let _ = coordinator.commit_delete(pending, &user).await;
        });
    }
    Ok(HttpResponse::Accepted().json(ApiResponse::success("Post deleted", id.to_string())))
}

/// POST /api/posts/{id}/retry
#[post("/posts/{id}/retry")]
pub async fn retry_post(
    state: web::Data<AppState>,
    SignedIn(user): SignedIn,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = PostId::new(path.into_inner());
    let pending = state.coordinator.stage_retry(&id)?;

    let coordinator = state.coordinator.clone();
    let staged = pending.clone();
    actix_web::rt::spawn(async move {
        let _ = coordinator.commit_create(&staged, &user).await;
    });

    Ok(HttpResponse::Accepted().json(ApiResponse::success(
        "Retrying post",
        AcceptedOut {
            id: pending.id.to_string(),
            status: pending.status,
        },
    )))
}

/// DELETE /api/posts/{id}/local
#[delete("/posts/{id}/local")]
pub async fn discard_post(
    state: web::Data<AppState>,
    _user: SignedIn,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let id = PostId::new(path.into_inner());
    let removed = state.coordinator.discard(&id)?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(
        "Post discarded",
        PostOut::from_post(removed, None),
    )))
}

/// POST /api/posts/refresh
#[post("/posts/refresh")]
pub async fn refresh_posts(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let count = state.merger.refresh().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success("Posts refreshed", count)))
}
