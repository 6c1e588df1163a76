// src/dtos/auth_dtos.rs
use serde::{Deserialize, Serialize};

use crate::models::user::{CurrentUser, Theme};

/// What the views get to see of the signed-in user. Tokens stay server side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOut {
    pub uid: String,
    pub email: String,
    pub display_name: String,
}

impl From<&CurrentUser> for UserOut {
    fn from(u: &CurrentUser) -> Self {
        Self {
            uid: u.uid.clone(),
            email: u.email.clone(),
            display_name: u.display_name.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub signed_in: bool,
    pub user: Option<UserOut>,
    pub expires_at: Option<i64>,
}

impl SessionOut {
    pub fn of(user: Option<&CurrentUser>) -> Self {
        Self {
            signed_in: user.is_some(),
            user: user.map(UserOut::from),
            expires_at: user.and_then(|u| u.expires_at),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ThemeIn {
    pub theme: Option<Theme>,
}

#[derive(Debug, Serialize)]
pub struct ThemeOut {
    pub theme: Theme,
}
