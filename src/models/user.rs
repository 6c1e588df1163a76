// src/models/user.rs
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationErrors;

pub const NAME_MIN: usize = 3;
pub const NAME_MAX: usize = 10;
pub const PASSWORD_MIN: usize = 8;
pub const PASSWORD_MAX: usize = 20;
const PASSWORD_SPECIALS: &str = "@$!%*?&";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles")
});

/// Signed-in user handed explicitly to anything that acts on their behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub id_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds at which `id_token` stops being accepted.
    pub expires_at: Option<i64>,
}

impl CurrentUser {
    pub fn expires_within(&self, now_secs: i64, margin_secs: i64) -> bool {
        match self.expires_at {
            Some(exp) => exp - now_secs <= margin_secs,
            None => false,
        }
    }
}

/// Row stored under `users/<uid>` at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub name: String,
    pub email: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// Sign-up form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();

        let name = self.name.trim();
        let name_len = name.chars().count();
        if name.is_empty() {
            errs.add("name", "Name is required");
        } else if name_len < NAME_MIN {
            errs.add("name", format!("Name must be {} chars or more", NAME_MIN));
        } else if name_len > NAME_MAX {
            errs.add("name", format!("Name must be {} chars or less", NAME_MAX));
        }

        check_email(&self.email, &mut errs);

        let password = &self.password;
        let password_len = password.chars().count();
        if password.is_empty() {
            errs.add("password", "Password is required");
        } else if password_len < PASSWORD_MIN {
            errs.add("password", format!("Password must be {} chars or more", PASSWORD_MIN));
        } else if password_len > PASSWORD_MAX {
            errs.add("password", format!("Password must be {} chars or less", PASSWORD_MAX));
        } else if !password_is_strong(password) {
            errs.add(
                "password",
                "Password must contain an uppercase letter, a number and one of @$!%*?&",
            );
        }

        if self.confirm_password.is_empty() {
            errs.add("confirmPassword", "Please confirm your password");
        } else if self.confirm_password != self.password {
            errs.add("confirmPassword", "Passwords must match");
        }

        errs.into_result()
    }
}

fn password_is_strong(password: &str) -> bool {
    let allowed = password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c));
    allowed
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c))
}

fn check_email(email: &str, errs: &mut ValidationErrors) {
    let email = email.trim();
    if email.is_empty() {
        errs.add("email", "Email is required");
    } else if !EMAIL_RE.is_match(email) {
        errs.add("email", "Invalid email address");
    }
}

/// Sign-in form.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_email(&self.email, &mut errs);
        if self.password.is_empty() {
            errs.add("password", "Password is required");
        }
        errs.into_result()
    }
}
