// src/main.rs
use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware::Logger, web};
use log::{error, info};

use smalltalk::config::{self, AppConfig, StoreBackend};
use smalltalk::{AppState, configure};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    match (&config.backend, &config.firebase) {
        (StoreBackend::Firebase, Some(fb)) => {
            info!("Firebase database: {}", fb.database_url);
            info!("Firebase key: {}", config::mask_key(&fb.api_key));
        }
        _ => info!("Using in-memory store; nothing is persisted remotely"),
    }
    if let Some(key) = &config.imgbb_api_key {
        info!("imgbb key: {}", config::mask_key(key));
    }

    let state = match AppState::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start: {:#}", e);
            std::process::exit(1);
        }
    };

    // A failed mount is reported as a notice; the feed can still be refreshed.
    let feed = state.merger.mount().await.ok();

    let state = web::Data::new(state);
    let allowed_origins = config.allowed_origins.clone();
    let bind_address = config.bind_address();
    info!("Starting server on {}", bind_address);

    let result = HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec!["authorization", "content-type", "accept", "x-requested-with"])
            .supports_credentials()
            .max_age(3600);

        for origin in &allowed_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind(&bind_address)?
    .run()
    .await;

    if let Some(feed) = feed {
        feed.unsubscribe();
    }
    result
}
