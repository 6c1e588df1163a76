// src/config.rs
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};

use crate::repositories::document_store::CallPolicy;
use crate::services::merger::DEFAULT_MATCH_WINDOW_MS;

pub const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Firebase,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firebase" => Ok(StoreBackend::Firebase),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(anyhow!("unknown STORE_BACKEND {:?} (expected firebase or memory)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub database_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: StoreBackend,
    pub firebase: Option<FirebaseConfig>,
    pub imgbb_api_key: Option<String>,
    pub bind_addr: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
    pub data_dir: PathBuf,
    pub page_size: usize,
    pub policy: CallPolicy,
    pub match_window_ms: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let backend: StoreBackend = optional("STORE_BACKEND")
            .unwrap_or_else(|| "firebase".into())
            .parse()?;

        let firebase = match backend {
            StoreBackend::Firebase => Some(FirebaseConfig {
                api_key: env::var("FIREBASE_API_KEY").context("FIREBASE_API_KEY not set")?,
                database_url: env::var("FIREBASE_DATABASE_URL")
                    .context("FIREBASE_DATABASE_URL not set")?
                    .trim_end_matches('/')
                    .to_string(),
            }),
            StoreBackend::Memory => None,
        };

        let port = parse_or("PORT", 8080u16)?;
        let page_size = parse_or("FEED_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            bail!("FEED_PAGE_SIZE must be at least 1");
        }

        let timeout_secs: u64 = parse_or("REMOTE_TIMEOUT_SECS", 0)?;
        let policy = CallPolicy {
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            max_retries: parse_or("REMOTE_MAX_RETRIES", 0)?,
        };

        let allowed_origins = optional("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000,http://127.0.0.1:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            backend,
            firebase,
            imgbb_api_key: optional("IMGBB_API_KEY"),
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".into()),
            port,
            allowed_origins,
            data_dir: PathBuf::from(optional("DATA_DIR").unwrap_or_else(|| ".smalltalk".into())),
            page_size,
            policy,
            match_window_ms: parse_or("PENDING_MATCH_WINDOW_MS", DEFAULT_MATCH_WINDOW_MS)?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has invalid value {:?}", key, raw)),
        None => Ok(default),
    }
}

pub fn mask_key(k: &str) -> String {
    if k.len() <= 8 {
        "[REDACTED]".to_string()
    } else {
        format!("{}***{}", &k[..4], &k[k.len() - 4..])
    }
}
