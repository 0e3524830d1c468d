pub mod api;
pub mod auth;
pub mod browser;
pub mod config;
pub mod error;
pub mod scraper;

use std::sync::Arc;
use browser::BrowserLauncher;
use config::Config;

/// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub launcher: Arc<dyn BrowserLauncher>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let launcher = browser::launcher_for(config.engine);
        Self {
            config: Arc::new(config),
            launcher,
        }
    }
}
