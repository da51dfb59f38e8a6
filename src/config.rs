// src/config.rs

use std::collections::HashMap;
use std::env;

use dotenvy::dotenv;

use crate::threading::ThreadPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Shared secret: verifies host-issued identity tokens and signs
    /// confirmation/mute keys (with distinct purpose salts).
    pub secret_key: String,
    /// Absolute base URL of this service, used to build the links embedded
    /// in confirmation and follow-up emails.
    pub site_url: String,
    pub port: u16,
    pub rust_log: String,
    pub allowed_origins: Vec<String>,
    /// Default reply-depth ceiling. 0 means threading is disabled and only
    /// root comments are accepted.
    pub max_thread_level: i64,
    /// Per-"app_label.model" overrides of the depth ceiling.
    pub max_thread_level_by_app_model: HashMap<String, i64>,
    /// How long a guest confirmation link stays valid.
    pub confirmation_ttl_hours: i64,
    /// SMTP transport settings; when absent, emails are logged instead.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let secret_key = env::var("SECRET_KEY").expect("SECRET_KEY must be set");

        let site_url = env::var("SITE_URL")
            .expect("SITE_URL must be set")
            .trim_end_matches('/')
            .to_string();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        let max_thread_level = env::var("COMMENTS_MAX_THREAD_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let max_thread_level_by_app_model = env::var("COMMENTS_MAX_THREAD_LEVEL_BY_APP_MODEL")
            .map(|v| parse_overrides(&v))
            .unwrap_or_default();

        let confirmation_ttl_hours = env::var("COMMENT_CONFIRMATION_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(72);

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.is_empty() => Some(SmtpConfig {
                host,
                port: env::var("SMTP_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(587),
                username: env::var("SMTP_USERNAME").unwrap_or_default(),
                password: env::var("SMTP_PASSWORD").unwrap_or_default(),
                from: env::var("SMTP_FROM").expect("SMTP_FROM must be set when SMTP_HOST is"),
            }),
            _ => None,
        };

        Self {
            database_url,
            secret_key,
            site_url,
            port,
            rust_log,
            allowed_origins,
            max_thread_level,
            max_thread_level_by_app_model,
            confirmation_ttl_hours,
            smtp,
        }
    }

    /// The depth-ceiling configuration handed to the placement engine.
    pub fn thread_policy(&self) -> ThreadPolicy {
        ThreadPolicy::new(
            self.max_thread_level,
            self.max_thread_level_by_app_model.clone(),
        )
    }
}

/// Parses `"blog.article=2,gallery.picture=1"` into an override map.
/// Malformed entries are skipped with a warning rather than aborting boot.
fn parse_overrides(raw: &str) -> HashMap<String, i64> {
    let mut map = HashMap::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        match entry.split_once('=') {
            Some((app_model, level)) => match level.trim().parse::<i64>() {
                Ok(level) => {
                    map.insert(app_model.trim().to_string(), level);
                }
                Err(_) => tracing::warn!("Ignoring bad thread level override: {}", entry),
            },
            None => tracing::warn!("Ignoring bad thread level override: {}", entry),
        }
    }
    map
}
