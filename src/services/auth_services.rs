// src/services/auth_services.rs
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("email already registered")]
    EmailExists,
    #[error("invalid token")]
    InvalidToken,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("auth provider error: {0}")]
    Provider(String),
}

/// Tokens and identity returned by the provider after sign-in, sign-up,
/// profile update or refresh. Refresh responses carry no email or name.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    async fn update_profile(&self, id_token: &str, display_name: &str) -> Result<AuthSession, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError>;

    /// Id tokens are bearer tokens; signing out only forgets them locally.
    async fn sign_out(&self, _id_token: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Claims read from an id token payload. The signature is not checked here:
/// the token is only forwarded to the backend, which verifies it.
#[derive(Debug, Default, Deserialize)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub exp: Option<i64>,
}

pub fn token_claims(token: &str) -> Result<TokenClaims, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidToken);
    }
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|_| AuthError::InvalidToken)?;
    serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken)
}

/// Firebase Authentication REST API.
#[derive(Clone)]
pub struct FirebaseAuth {
    client: reqwest::Client,
    api_key: String,
    identity_url: String,
    token_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityResponse {
    local_id: Option<String>,
    email: Option<String>,
    display_name: Option<String>,
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    user_id: String,
    id_token: String,
    refresh_token: Option<String>,
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl FirebaseAuth {
    pub fn new(client: reqwest::Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.trim().to_string(),
            identity_url: "https://identitytoolkit.googleapis.com/v1".to_string(),
            token_url: "https://securetoken.googleapis.com/v1/token".to_string(),
        }
    }

    async fn identity_call<B: Serialize + Sync>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<IdentityResponse, AuthError> {
        let url = format!("{}/accounts:{}", self.identity_url, method);
        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            log::warn!("auth {} failed: {} {}", method, status, text);
            return Err(provider_error(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| AuthError::Provider(format!("invalid json in {} response: {}", method, e)))
    }
}

fn provider_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    let code = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());
    // Codes may carry a detail suffix, e.g. "WEAK_PASSWORD : Password should be ..."
    let key = code.split(':').next().unwrap_or("").trim();
    match key {
        "EMAIL_EXISTS" => AuthError::EmailExists,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            AuthError::InvalidCredentials
        }
        "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "INVALID_REFRESH_TOKEN" | "USER_NOT_FOUND" => {
            AuthError::InvalidToken
        }
        _ if status.is_client_error() => AuthError::Rejected(code),
        _ => AuthError::Provider(format!("{} {}", status, code)),
    }
}

fn parse_expiry(raw: Option<String>) -> Option<i64> {
    raw.and_then(|s| s.parse().ok())
}

impl IdentityResponse {
    fn into_session(self, fallback_token: Option<&str>) -> Result<AuthSession, AuthError> {
        let id_token = self
            .id_token
            .or_else(|| fallback_token.map(|t| t.to_string()))
            .ok_or_else(|| AuthError::Provider("response carried no id token".into()))?;
        let uid = match self.local_id {
            Some(uid) => uid,
            None => {
                let claims = token_claims(&id_token)?;
                claims.user_id.or(claims.sub).ok_or(AuthError::InvalidToken)?
            }
        };
        Ok(AuthSession {
            uid,
            email: self.email,
            display_name: self.display_name.filter(|n| !n.is_empty()),
            id_token,
            refresh_token: self.refresh_token,
            expires_in: parse_expiry(self.expires_in),
        })
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            email: &'a str,
            password: &'a str,
            return_secure_token: bool,
        }
        let resp = self
            .identity_call(
                "signInWithPassword",
                &Body {
                    email: email.trim(),
                    password,
                    return_secure_token: true,
                },
            )
            .await?;
        resp.into_session(None)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            email: &'a str,
            password: &'a str,
            return_secure_token: bool,
        }
        let resp = self
            .identity_call(
                "signUp",
                &Body {
                    email: email.trim(),
                    password,
                    return_secure_token: true,
                },
            )
            .await?;
        resp.into_session(None)
    }

    async fn update_profile(&self, id_token: &str, display_name: &str) -> Result<AuthSession, AuthError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            id_token: &'a str,
            display_name: &'a str,
            return_secure_token: bool,
        }
        let resp = self
            .identity_call(
                "update",
                &Body {
                    id_token,
                    display_name,
                    return_secure_token: true,
                },
            )
            .await?;
        resp.into_session(Some(id_token))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let resp = self
            .client
            .post(&self.token_url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            log::warn!("token refresh failed: {} {}", status, text);
            return Err(provider_error(status, &text));
        }
        let body: RefreshResponse = serde_json::from_str(&text)
            .map_err(|e| AuthError::Provider(format!("invalid json in refresh response: {}", e)))?;
        Ok(AuthSession {
            uid: body.user_id,
            email: None,
            display_name: None,
            id_token: body.id_token,
            refresh_token: body.refresh_token,
            expires_in: parse_expiry(body.expires_in),
        })
    }
}

/// Accounts kept in process memory, for the `memory` backend and tests.
/// Tokens are opaque strings of the form `local.<uid>.<n>`.
#[derive(Default)]
pub struct InMemoryAuth {
    accounts: Mutex<HashMap<String, LocalAccount>>,
    issued: AtomicU64,
}

struct LocalAccount {
    uid: String,
    password: String,
    display_name: Option<String>,
}

impl InMemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&self, uid: &str, email: &str, display_name: Option<String>) -> AuthSession {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        AuthSession {
            uid: uid.to_string(),
            email: Some(email.to_string()),
            display_name,
            id_token: format!("local.{}.{}", uid, n),
            refresh_token: Some(format!("refresh.{}", uid)),
            expires_in: Some(3600),
        }
    }

    fn accounts(&self) -> std::sync::MutexGuard<'_, HashMap<String, LocalAccount>> {
        self.accounts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn uid_of(token: &str, prefix: &str) -> Option<String> {
        let rest = token.strip_prefix(prefix)?;
        Some(rest.split('.').next().unwrap_or(rest).to_string())
    }
}

#[async_trait]
impl AuthProvider for InMemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = email.trim().to_lowercase();
        let (uid, name) = {
            let accounts = self.accounts();
            let account = accounts.get(&email).ok_or(AuthError::InvalidCredentials)?;
            if account.password != password {
                return Err(AuthError::InvalidCredentials);
            }
            (account.uid.clone(), account.display_name.clone())
        };
        Ok(self.issue(&uid, &email, name))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = email.trim().to_lowercase();
        let uid = {
            let mut accounts = self.accounts();
            if accounts.contains_key(&email) {
                return Err(AuthError::EmailExists);
            }
            let uid = uuid::Uuid::new_v4().simple().to_string();
            accounts.insert(
                email.clone(),
                LocalAccount {
                    uid: uid.clone(),
                    password: password.to_string(),
                    display_name: None,
                },
            );
            uid
        };
        Ok(self.issue(&uid, &email, None))
    }

    async fn update_profile(&self, id_token: &str, display_name: &str) -> Result<AuthSession, AuthError> {
        let uid = Self::uid_of(id_token, "local.").ok_or(AuthError::InvalidToken)?;
        let email = {
            let mut accounts = self.accounts();
            let (email, account) = accounts
                .iter_mut()
                .find(|(_, a)| a.uid == uid)
                .ok_or(AuthError::InvalidToken)?;
            account.display_name = Some(display_name.to_string());
            email.clone()
        };
        Ok(AuthSession {
            id_token: id_token.to_string(),
            ..self.issue(&uid, &email, Some(display_name.to_string()))
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        let uid = Self::uid_of(refresh_token, "refresh.").ok_or(AuthError::InvalidToken)?;
        let found = self
            .accounts()
            .iter()
            .find(|(_, a)| a.uid == uid)
            .map(|(email, a)| (email.clone(), a.display_name.clone()));
        let (email, name) = found.ok_or(AuthError::InvalidToken)?;
        Ok(self.issue(&uid, &email, name))
    }
}
