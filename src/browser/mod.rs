//! Browser capability used by the scrape pipeline.
//!
//! The pipeline only needs a handful of operations: launch, open a page,
//! navigate, find the first table, and read cell text/attributes. They sit
//! behind the traits below so the headless Chromium engine and the plain
//! HTTP engine are interchangeable, and so tests can swap in doubles.

pub mod chrome;
pub mod http;
pub mod snapshot;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::config::{Config, ScrapeEngine};
use crate::error::{AppError, Result};

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub navigation_timeout: Duration,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user_agent: DESKTOP_USER_AGENT.to_string(),
            viewport: (1920, 1080),
            navigation_timeout: Duration::from_secs(30),
            chrome_executable: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            navigation_timeout: config.navigation_timeout,
            chrome_executable: config.chrome_executable.clone(),
            ..Self::default()
        }
    }
}

/// Starts a fresh browser instance. Called once per request.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>>;
}

/// A running browser instance.
#[async_trait]
pub trait BrowserSession: Send {
    /// Opens a page in an isolated browsing context.
    async fn open_page(&mut self, options: &SessionOptions) -> Result<Box<dyn Page>>;

    /// Releases the instance. Must be a no-op once already closed.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Page: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// First `table` element in document order, if any.
    async fn first_table(&self) -> Result<Option<Box<dyn Table>>>;
}

#[async_trait]
pub trait Table: Send + Sync {
    /// Number of rows in the table body.
    async fn row_count(&self) -> Result<usize>;

    /// Data cells of the body row at `index`.
    async fn cells(&self, index: usize) -> Result<Vec<Box<dyn Cell>>>;
}

#[async_trait]
pub trait Cell: Send + Sync {
    async fn text(&self) -> Result<String>;
    async fn attribute(&self, name: &str) -> Result<Option<String>>;
}

pub fn launcher_for(engine: ScrapeEngine) -> Arc<dyn BrowserLauncher> {
    match engine {
        ScrapeEngine::Chrome => Arc::new(chrome::ChromeLauncher),
        ScrapeEngine::Http => Arc::new(http::HttpLauncher),
    }
}

/// Launches a browser, hands a fresh page to `work`, and closes the browser
/// on every way out of `work`: success, error, or panic.
///
/// A failing close is logged and never replaces the outcome of `work`.
pub async fn with_session<T, F>(
    launcher: &dyn BrowserLauncher,
    options: &SessionOptions,
    work: F,
) -> Result<T>
where
    T: Send,
    F: for<'p> FnOnce(&'p dyn Page) -> BoxFuture<'p, Result<T>> + Send,
{
    let mut session = launcher.launch(options).await?;
    debug!("browser session acquired");

    let outcome = run_in_session(session.as_mut(), options, work).await;

    if let Err(err) = session.close().await {
        warn!(error = %err, "failed to release browser session");
    } else {
        debug!("browser session released");
    }

    outcome
}

async fn run_in_session<T, F>(
    session: &mut dyn BrowserSession,
    options: &SessionOptions,
    work: F,
) -> Result<T>
where
    T: Send,
    F: for<'p> FnOnce(&'p dyn Page) -> BoxFuture<'p, Result<T>> + Send,
{
    let page = session.open_page(options).await?;

    match AssertUnwindSafe(work(page.as_ref())).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(AppError::Extraction(format!(
            "scrape task panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Calls {
        launched: AtomicUsize,
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    struct RecordingLauncher {
        calls: Arc<Calls>,
        fail_launch: bool,
        fail_close: bool,
    }

    impl RecordingLauncher {
        fn new() -> Self {
            Self { calls: Arc::new(Calls::default()), fail_launch: false, fail_close: false }
        }
    }

    struct RecordingSession {
        calls: Arc<Calls>,
        open: bool,
        fail_close: bool,
    }

    struct EmptyPage;

    #[async_trait]
    impl BrowserLauncher for RecordingLauncher {
        async fn launch(&self, _options: &SessionOptions) -> Result<Box<dyn BrowserSession>> {
            if self.fail_launch {
                return Err(AppError::Environment("chrome not found".into()));
            }
            self.calls.launched.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingSession {
                calls: Arc::clone(&self.calls),
                open: true,
                fail_close: self.fail_close,
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for RecordingSession {
        async fn open_page(&mut self, _options: &SessionOptions) -> Result<Box<dyn Page>> {
            self.calls.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EmptyPage))
        }

        async fn close(&mut self) -> Result<()> {
            if !self.open {
                return Ok(());
            }
            self.open = false;
            self.calls.closed.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                return Err(AppError::Environment("connection reset".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Page for EmptyPage {
        async fn goto(&self, _url: &str) -> Result<()> {
            Ok(())
        }

        async fn first_table(&self) -> Result<Option<Box<dyn Table>>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn releases_once_on_success() {
        let launcher = RecordingLauncher::new();
        let result = with_session(&launcher, &SessionOptions::default(), |_page| {
            Box::pin(async { Ok(7) })
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(launcher.calls.launched.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.calls.opened.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn releases_once_on_not_found() {
        let launcher = RecordingLauncher::new();
        let result: Result<()> = with_session(&launcher, &SessionOptions::default(), |page| {
            Box::pin(async move {
                page.first_table()
                    .await?
                    .ok_or_else(|| AppError::NotFound("no data table for this channel".into()))?;
                Ok(())
            })
        })
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(launcher.calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn releases_once_on_other_fault() {
        let launcher = RecordingLauncher::new();
        let result: Result<()> = with_session(&launcher, &SessionOptions::default(), |_page| {
            Box::pin(async { Err(AppError::Environment("navigation timed out".into())) })
        })
        .await;

        assert!(matches!(result, Err(AppError::Environment(_))));
        assert_eq!(launcher.calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn releases_once_when_work_panics() {
        let launcher = RecordingLauncher::new();
        let result: Result<()> = with_session(&launcher, &SessionOptions::default(), |_page| {
            Box::pin(async {
                if true {
                    panic!("row index out of bounds");
                }
                Ok(())
            })
        })
        .await;

        match result {
            Err(AppError::Extraction(msg)) => assert!(msg.contains("row index out of bounds")),
            other => panic!("unexpected outcome: {:?}", other.err()),
        }
        assert_eq!(launcher.calls.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_failure_does_not_mask_the_outcome() {
        let launcher = RecordingLauncher { fail_close: true, ..RecordingLauncher::new() };
        let ok = with_session(&launcher, &SessionOptions::default(), |_page| {
            Box::pin(async { Ok("stats") })
        })
        .await;
        assert_eq!(ok.unwrap(), "stats");

        let err: Result<()> = with_session(&launcher, &SessionOptions::default(), |_page| {
            Box::pin(async { Err(AppError::NotFound("gone".into())) })
        })
        .await;
        assert!(matches!(err, Err(AppError::NotFound(_))));
        assert_eq!(launcher.calls.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn launch_failure_runs_no_work() {
        let launcher = RecordingLauncher { fail_launch: true, ..RecordingLauncher::new() };
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let result: Result<()> = with_session(&launcher, &SessionOptions::default(), move |_page| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .await;

        assert!(matches!(result, Err(AppError::Environment(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(launcher.calls.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_close_is_idempotent() {
        let launcher = RecordingLauncher::new();
        let mut session = launcher.launch(&SessionOptions::default()).await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(launcher.calls.closed.load(Ordering::SeqCst), 1);
    }
}
