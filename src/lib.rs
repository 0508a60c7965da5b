pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod notifications;

pub use db::DbPool;

use config::Config;
use notifications::Notifier;
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let notifier = Arc::new(Notifier::from_config(&config.smtp));
        Self {
            config,
            db,
            notifier,
        }
    }
}
