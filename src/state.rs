use std::sync::Arc;

use axum::extract::FromRef;
use dashmap::DashMap;
use sqlx::SqlitePool;

use crate::cache::LikeCache;
use crate::config::Config;
use crate::email::{LogMailer, Mailer, SmtpMailer};
use crate::notify::ConfirmationObserver;
use crate::threading::{ThreadLocks, ThreadPolicy};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub policy: ThreadPolicy,
    pub thread_locks: ThreadLocks,
    pub like_cache: Arc<LikeCache>,
    pub mailer: Arc<dyn Mailer>,
    pub observers: Arc<Vec<Arc<dyn ConfirmationObserver>>>,
}

impl AppState {
    /// Builds the state for production use: SMTP mail when configured,
    /// logged mail otherwise, no confirmation observers.
    pub fn new(pool: SqlitePool, config: Config) -> Self {
        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(smtp) => match SmtpMailer::from_config(smtp) {
                Ok(m) => Arc::new(m),
                Err(e) => {
                    tracing::error!("SMTP misconfigured, falling back to log mailer: {}", e);
                    Arc::new(LogMailer)
                }
            },
            None => Arc::new(LogMailer),
        };
        Self::with_mailer(pool, config, mailer)
    }

    pub fn with_mailer(pool: SqlitePool, config: Config, mailer: Arc<dyn Mailer>) -> Self {
        let policy = config.thread_policy();
        Self {
            pool,
            config,
            policy,
            thread_locks: Arc::new(DashMap::new()),
            like_cache: Arc::new(LikeCache::default()),
            mailer,
            observers: Arc::new(Vec::new()),
        }
    }

    /// Registers a confirmation observer; any observer returning `false`
    /// discards the guest comment instead of publishing it. Consumes the
    /// state: observers must be attached before the router is built, or
    /// the running handlers would keep seeing the older observer list.
    pub fn with_observer(mut self, observer: Arc<dyn ConfirmationObserver>) -> Self {
        Arc::make_mut(&mut self.observers).push(observer);
        self
    }
}

impl FromRef<AppState> for SqlitePool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
