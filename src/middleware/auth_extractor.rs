// src/middleware/auth_extractor.rs
use actix_web::{FromRequest, HttpRequest, dev::Payload, web};
use futures::future::LocalBoxFuture;

use crate::AppState;
use crate::error::AppError;
use crate::models::user::CurrentUser;

/// The signed-in user, with a token refreshed if it was about to expire.
/// Rejects the request with 401 when nobody is signed in.
pub struct SignedIn(pub CurrentUser);

impl FromRequest for SignedIn {
    type Error = AppError;
    type Future = LocalBoxFuture<'static, Result<SignedIn, AppError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let state = req.app_data::<web::Data<AppState>>().cloned();
        Box::pin(async move {
            let state = state.ok_or_else(|| AppError::Internal("app state missing".into()))?;
            match state.session.fresh_user().await? {
                Some(user) => Ok(SignedIn(user)),
                None => {
                    log::debug!("request rejected: not signed in");
                    Err(AppError::Unauthorized)
                }
            }
        })
    }
}
