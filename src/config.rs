use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use crate::error::{AppError, Result};

/// Which browser capability drives the scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeEngine {
    /// Headless Chromium via the DevTools protocol.
    Chrome,
    /// Plain HTTP fetch with static HTML parsing, no JavaScript.
    Http,
}

impl ScrapeEngine {
    pub fn default_settle(self) -> Duration {
        match self {
            ScrapeEngine::Chrome => Duration::from_secs(15),
            ScrapeEngine::Http => Duration::ZERO,
        }
    }
}

impl FromStr for ScrapeEngine {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(ScrapeEngine::Chrome),
            "http" => Ok(ScrapeEngine::Http),
            other => Err(AppError::Configuration(format!("Unknown scrape engine: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    /// Bearer secret. `None` is tolerated at startup and rejected per request.
    pub api_secret: Option<String>,
    pub engine: ScrapeEngine,
    pub settle: Duration,
    pub navigation_timeout: Duration,
    pub stats_base_url: String,
    pub chrome_executable: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_secret = lookup("SCRAPER_API_SECRET").filter(|s| !s.is_empty());

        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("PORT").unwrap_or_else(|| "3000".to_string());
        let port = port.parse::<u16>().map_err(|e| AppError::Configuration(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host).map_err(|e| AppError::Configuration(format!("Invalid host address: {}", e)))?;

        let engine = match lookup("SCRAPE_ENGINE") {
            Some(raw) => raw.parse()?,
            None => ScrapeEngine::Chrome,
        };

        let settle = match lookup("SETTLE_SECS") {
            Some(raw) => Duration::from_secs(parse_secs("SETTLE_SECS", &raw)?),
            None => engine.default_settle(),
        };

        let navigation_timeout = match lookup("NAVIGATION_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_secs("NAVIGATION_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(30),
        };

        let stats_base_url = lookup("STATS_BASE_URL")
            .unwrap_or_else(|| "https://socialblade.com".to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            api_secret,
            engine,
            settle,
            navigation_timeout,
            stats_base_url,
            chrome_executable: lookup("CHROME_EXECUTABLE").map(PathBuf::from),
        })
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| AppError::Configuration(format!("Invalid {}: {}", key, e)))
}
