// src/services/session.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::error::{AppError, AppResult};
use crate::models::user::{Credentials, CurrentUser, Registration, Theme, UserRecord};
use crate::repositories::document_store::{DocumentStore, user_path};
use crate::services::auth_services::{AuthError, AuthProvider, AuthSession, token_claims};
use crate::services::notifier::Notifier;

pub const STATE_FILE: &str = "local_state.json";
/// Tokens closer than this to expiry are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;

pub const MSG_REGISTERED: &str = "Account created successfully!";
pub const MSG_REGISTER_FAILED: &str = "Registration failed";
pub const MSG_LOGIN_FAILED: &str = "Invalid email or password";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredState {
    #[serde(default)]
    user: Option<CurrentUser>,
    #[serde(default)]
    theme: Theme,
}

/// Small JSON file that survives restarts: the signed-in user and the theme.
#[derive(Clone)]
pub struct LocalState {
    path: PathBuf,
    state: Arc<Mutex<StoredState>>,
}

impl LocalState {
    /// Opens `<dir>/local_state.json`. A missing or unreadable file starts
    /// from defaults.
    pub fn open(dir: &Path) -> Result<Self, StateError> {
        fs::create_dir_all(dir).map_err(|source| StateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(STATE_FILE);
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("ignoring corrupt {}: {}", path.display(), e);
                StoredState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredState::default(),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn user(&self) -> Option<CurrentUser> {
        self.lock().user.clone()
    }

    pub fn theme(&self) -> Theme {
        self.lock().theme
    }

    pub fn set_user(&self, user: Option<CurrentUser>) -> Result<(), StateError> {
        self.modify(|s| s.user = user)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), StateError> {
        self.modify(|s| s.theme = theme)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoredState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Memory only changes once the file write went through.
    fn modify(&self, f: impl FnOnce(&mut StoredState)) -> Result<(), StateError> {
        let mut state = self.lock();
        let mut next = state.clone();
        f(&mut next);
        let text = serde_json::to_string_pretty(&next)?;
        fs::write(&self.path, text).map_err(|source| StateError::Io {
            path: self.path.clone(),
            source,
        })?;
        *state = next;
        Ok(())
    }
}

/// Who is signed in. Publishes every change on a watch channel.
#[derive(Clone)]
pub struct Session {
    auth: Arc<dyn AuthProvider>,
    docs: Arc<dyn DocumentStore>,
    local: LocalState,
    notifier: Notifier,
    user_tx: Arc<watch::Sender<Option<CurrentUser>>>,
}

impl Session {
    /// Restores a previously persisted user, if any.
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        docs: Arc<dyn DocumentStore>,
        local: LocalState,
        notifier: Notifier,
    ) -> Self {
        let restored = local.user();
        if let Some(u) = &restored {
            log::info!("restored session for {}", u.display_name);
        }
        let (user_tx, _) = watch::channel(restored);
        Self {
            auth,
            docs,
            local,
            notifier,
            user_tx: Arc::new(user_tx),
        }
    }

    pub fn current(&self) -> Option<CurrentUser> {
        self.user_tx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<CurrentUser>> {
        self.user_tx.subscribe()
    }

    pub async fn register(&self, form: Registration) -> AppResult<CurrentUser> {
        form.validate()?;
        let name = form.name.trim().to_string();
        let email = form.email.trim().to_string();

        let created = self
            .auth
            .sign_up(&email, &form.password)
            .await
            .map_err(|e| self.auth_failed(MSG_REGISTER_FAILED, e))?;
        let named = self
            .auth
            .update_profile(&created.id_token, &name)
            .await
            .map_err(|e| self.auth_failed(MSG_REGISTER_FAILED, e))?;

        let user = to_current_user(named, Some(&email), Some(&name))?;
        let record = UserRecord {
            name: name.clone(),
            email: email.clone(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let value = serde_json::to_value(&record).map_err(|e| AppError::Internal(e.to_string()))?;
        if let Err(e) = self
            .docs
            .set(&user_path(&user.uid), value, Some(&user.id_token))
            .await
        {
            // The account exists either way; the profile row is best effort.
            log::error!("failed to write user record for {}: {}", user.uid, e);
        }

        self.publish(Some(user.clone()))?;
        self.notifier.success(MSG_REGISTERED);
        log::info!("registered {} ({})", name, user.uid);
        Ok(user)
    }

    pub async fn login(&self, creds: Credentials) -> AppResult<CurrentUser> {
        creds.validate()?;
        let email = creds.email.trim().to_string();
        let session = self
            .auth
            .sign_in(&email, &creds.password)
            .await
            .map_err(|e| self.auth_failed(MSG_LOGIN_FAILED, e))?;
        let user = to_current_user(session, Some(&email), None)?;
        self.publish(Some(user.clone()))?;
        log::info!("signed in {} ({})", user.display_name, user.uid);
        Ok(user)
    }

    pub async fn logout(&self) -> AppResult<()> {
        if let Some(user) = self.current() {
            if let Err(e) = self.auth.sign_out(&user.id_token).await {
                log::warn!("sign out for {} failed: {}", user.uid, e);
            }
            log::info!("signed out {}", user.uid);
        }
        self.publish(None)
    }

    /// The current user with a token that is good for at least another
    /// minute. A failed refresh signs the user out.
    pub async fn fresh_user(&self) -> AppResult<Option<CurrentUser>> {
        let Some(user) = self.current() else {
            return Ok(None);
        };
        let now = chrono::Utc::now().timestamp();
        if !user.expires_within(now, REFRESH_MARGIN_SECS) {
            return Ok(Some(user));
        }
        let Some(refresh_token) = user.refresh_token.clone() else {
            return Ok(Some(user));
        };

        match self.auth.refresh(&refresh_token).await {
            Ok(session) => {
                let refreshed = CurrentUser {
                    id_token: session.id_token,
                    refresh_token: session.refresh_token.or(Some(refresh_token)),
                    expires_at: session.expires_in.map(|s| now + s),
                    ..user
                };
                self.publish(Some(refreshed.clone()))?;
                log::debug!("refreshed token for {}", refreshed.uid);
                Ok(Some(refreshed))
            }
            Err(AuthError::InvalidToken) => {
                log::warn!("refresh token for {} rejected, signing out", user.uid);
                self.publish(None)?;
                Ok(None)
            }
            Err(e) => Err(AppError::Auth(e)),
        }
    }

    pub fn theme(&self) -> Theme {
        self.local.theme()
    }

    pub fn set_theme(&self, theme: Theme) -> AppResult<Theme> {
        self.local.set_theme(theme).map_err(state_failed)?;
        Ok(theme)
    }

    pub fn toggle_theme(&self) -> AppResult<Theme> {
        self.set_theme(self.theme().toggled())
    }

    fn publish(&self, user: Option<CurrentUser>) -> AppResult<()> {
        self.local.set_user(user.clone()).map_err(state_failed)?;
        self.user_tx.send_replace(user);
        Ok(())
    }

    fn auth_failed(&self, notice: &str, err: AuthError) -> AppError {
        log::warn!("{}: {}", notice, err);
        let message = match &err {
            AuthError::EmailExists => "Email is already registered".to_string(),
            AuthError::Rejected(code) => format!("{}: {}", notice, code),
            _ => notice.to_string(),
        };
        self.notifier.error(message);
        AppError::Auth(err)
    }
}

fn state_failed(e: StateError) -> AppError {
    log::error!("failed to persist local state: {}", e);
    AppError::Internal(e.to_string())
}

fn to_current_user(
    session: AuthSession,
    email: Option<&str>,
    name: Option<&str>,
) -> AppResult<CurrentUser> {
    let claims = token_claims(&session.id_token).unwrap_or_default();
    let display_name = session
        .display_name
        .or_else(|| name.map(str::to_string))
        .or(claims.name)
        .unwrap_or_default();
    let email = session
        .email
        .or_else(|| email.map(str::to_string))
        .or(claims.email)
        .unwrap_or_default();
    let expires_at = session
        .expires_in
        .map(|s| chrono::Utc::now().timestamp() + s)
        .or(claims.exp);
    if session.uid.is_empty() {
        return Err(AppError::Auth(AuthError::InvalidToken));
    }
    Ok(CurrentUser {
        uid: session.uid,
        email,
        display_name,
        id_token: session.id_token,
        refresh_token: session.refresh_token,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory_store::MemoryStore;
    use crate::services::auth_services::InMemoryAuth;

    fn session_in(dir: &Path) -> (Session, Arc<MemoryStore>) {
        let docs = Arc::new(MemoryStore::new());
        let session = Session::new(
            Arc::new(InMemoryAuth::new()),
            docs.clone(),
            LocalState::open(dir).unwrap(),
            Notifier::new(),
        );
        (session, docs)
    }

    fn alice() -> Registration {
        Registration {
            name: "alice".into(),
            email: "alice@example.com".into(),
            password: "Secret1!".into(),
            confirm_password: "Secret1!".into(),
        }
    }

    #[test]
    fn missing_state_file_defaults_to_dark_and_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalState::open(dir.path()).unwrap();
        assert_eq!(local.theme(), Theme::Dark);
        assert!(local.user().is_none());
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalState::open(dir.path()).unwrap();
        // A directory where the file should be makes every write fail.
        fs::create_dir(dir.path().join(STATE_FILE)).unwrap();

        let err = local.set_theme(Theme::Light).unwrap_err();
        assert!(matches!(err, StateError::Io { .. }));
        assert_eq!(local.theme(), Theme::Dark);
    }

    #[test]
    fn theme_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = session_in(dir.path());
        assert_eq!(session.toggle_theme().unwrap(), Theme::Light);

        let reopened = LocalState::open(dir.path()).unwrap();
        assert_eq!(reopened.theme(), Theme::Light);
    }

    #[tokio::test]
    async fn register_writes_profile_and_publishes_user() {
        let dir = tempfile::tempdir().unwrap();
        let (session, docs) = session_in(dir.path());
        let mut rx = session.watch();

        let user = session.register(alice()).await.unwrap();
        assert_eq!(user.display_name, "alice");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref(), Some(&user));

        let row = docs.get(&user_path(&user.uid), None).await.unwrap().unwrap();
        assert_eq!(row["name"], "alice");
        assert_eq!(row["email"], "alice@example.com");

        let reopened = LocalState::open(dir.path()).unwrap();
        assert_eq!(reopened.user(), Some(user));
    }

    #[tokio::test]
    async fn login_and_logout_round() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = session_in(dir.path());
        session.register(alice()).await.unwrap();
        session.logout().await.unwrap();
        assert!(session.current().is_none());

        let bad = Credentials {
            email: "alice@example.com".into(),
            password: "Wrong1!!".into(),
        };
        assert!(matches!(
            session.login(bad).await,
            Err(AppError::Auth(AuthError::InvalidCredentials))
        ));

        let good = Credentials {
            email: "alice@example.com".into(),
            password: "Secret1!".into(),
        };
        let user = session.login(good).await.unwrap();
        assert_eq!(user.display_name, "alice");
        assert_eq!(session.current(), Some(user));
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = session_in(dir.path());
        let user = session.register(alice()).await.unwrap();

        let stale = CurrentUser {
            expires_at: Some(chrono::Utc::now().timestamp() + 10),
            ..user.clone()
        };
        session.publish(Some(stale)).unwrap();

        let fresh = session.fresh_user().await.unwrap().unwrap();
        assert_ne!(fresh.id_token, user.id_token);
        assert!(!fresh.expires_within(chrono::Utc::now().timestamp(), REFRESH_MARGIN_SECS));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _) = session_in(dir.path());
        session.register(alice()).await.unwrap();
        let err = session.register(alice()).await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::EmailExists)));
    }
}
