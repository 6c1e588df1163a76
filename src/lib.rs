// src/lib.rs
pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod services;
pub mod store;

use std::sync::Arc;

use actix_web::web;
use anyhow::{Context, Result};
use reqwest::Client;

use crate::config::{AppConfig, StoreBackend};
use crate::handlers::{auth_handlers, image_handlers, post_handlers, prefs_handlers};
use crate::repositories::document_store::DocumentStore;
use crate::repositories::firebase_store::FirebaseStore;
use crate::repositories::image_host::{ImageHost, ImgbbHost};
use crate::repositories::memory_store::MemoryStore;
use crate::services::auth_services::{AuthProvider, FirebaseAuth, InMemoryAuth};
use crate::services::coordinator::MutationCoordinator;
use crate::services::merger::SubscriptionMerger;
use crate::services::notifier::Notifier;
use crate::services::session::{LocalState, Session};
use crate::store::SharedPostStore;

const MAX_JSON_BODY: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedPostStore,
    pub coordinator: MutationCoordinator,
    pub merger: SubscriptionMerger,
    pub session: Session,
    pub notifier: Notifier,
    pub image_host: Option<Arc<dyn ImageHost>>,
    pub page_size: usize,
}

impl AppState {
    /// Wires every service around one post store and one notifier.
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        auth: Arc<dyn AuthProvider>,
        image_host: Option<Arc<dyn ImageHost>>,
        local: LocalState,
        config: &AppConfig,
    ) -> Self {
        let store = SharedPostStore::new();
        let notifier = Notifier::new();
        let coordinator = MutationCoordinator::new(store.clone(), docs.clone(), notifier.clone())
            .with_policy(config.policy);
        let merger = SubscriptionMerger::new(store.clone(), docs.clone(), notifier.clone())
            .with_match_window(config.match_window_ms);
        let session = Session::new(auth, docs, local, notifier.clone());
        Self {
            store,
            coordinator,
            merger,
            session,
            notifier,
            image_host,
            page_size: config.page_size,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("smalltalk/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;

        let (docs, auth): (Arc<dyn DocumentStore>, Arc<dyn AuthProvider>) = match config.backend {
            StoreBackend::Firebase => {
                let fb = config
                    .firebase
                    .as_ref()
                    .context("firebase backend selected without firebase settings")?;
                (
                    Arc::new(FirebaseStore::new(client.clone(), &fb.database_url)) as Arc<dyn DocumentStore>,
                    Arc::new(FirebaseAuth::new(client.clone(), &fb.api_key)) as Arc<dyn AuthProvider>,
                )
            }
            StoreBackend::Memory => (
                Arc::new(MemoryStore::new()) as Arc<dyn DocumentStore>,
                Arc::new(InMemoryAuth::new()) as Arc<dyn AuthProvider>,
            ),
        };

        let image_host = config
            .imgbb_api_key
            .as_deref()
            .map(|key| Arc::new(ImgbbHost::new(client.clone(), key)) as Arc<dyn ImageHost>);
        if image_host.is_none() {
            log::warn!("IMGBB_API_KEY not set, image uploads are disabled");
        }

        let local = LocalState::open(&config.data_dir)
            .with_context(|| format!("failed to open local state in {}", config.data_dir.display()))?;

        Ok(Self::new(docs, auth, image_host, local, config))
    }
}

/// Registers every route. Shared by the binary and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    // Inline images arrive base64 encoded.
    cfg.app_data(web::JsonConfig::default().limit(MAX_JSON_BODY))
        .service(
        web::scope("/auth")
            .service(auth_handlers::register) // POST /auth/register
            .service(auth_handlers::login) // POST /auth/login
            .service(auth_handlers::logout) // POST /auth/logout
            .service(auth_handlers::me), // GET /auth/me
    )
    .service(
        web::scope("/api")
            .service(post_handlers::refresh_posts) // POST /api/posts/refresh
            .service(post_handlers::list_posts) // GET /api/posts
            .service(post_handlers::create_post) // POST /api/posts
            .service(post_handlers::get_post) // GET /api/posts/{id}
            .service(post_handlers::update_post) // PUT /api/posts/{id}
            .service(post_handlers::delete_post) // DELETE /api/posts/{id}
            .service(post_handlers::retry_post) // POST /api/posts/{id}/retry
            .service(post_handlers::discard_post) // DELETE /api/posts/{id}/local
            .service(image_handlers::upload_image) // POST /api/images
            .service(prefs_handlers::list_notices) // GET /api/notices
            .service(prefs_handlers::get_theme) // GET /api/theme
            .service(prefs_handlers::put_theme), // PUT /api/theme
    );
}
