//! Headless Chromium driven over the DevTools protocol.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EventDomContentEventFired, NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Element, Page as CdpPage};
use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{BrowserLauncher, BrowserSession, Cell, Page, SessionOptions, Table};
use crate::error::{AppError, Result};

// --no-sandbox is added by the config builder.
const LAUNCH_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
];

const HIDE_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', { get: () => undefined });";

pub struct ChromeLauncher;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>> {
        let config = browser_config(options)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::Environment(format!("failed to launch browser: {}", e)))?;

        // The handler must be polled for any CDP command to make progress.
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "browser handler event error");
                }
            }
        });

        Ok(Box::new(ChromeSession {
            browser: Some(browser),
            events: Some(events),
        }))
    }
}

fn browser_config(options: &SessionOptions) -> Result<BrowserConfig> {
    let (width, height) = options.viewport;
    let mut builder = BrowserConfig::builder()
        .no_sandbox()
        .request_timeout(options.navigation_timeout)
        .window_size(width, height)
        .viewport(Viewport {
            width,
            height,
            ..Viewport::default()
        })
        .args(LAUNCH_ARGS.iter().copied());

    if let Some(path) = &options.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(AppError::Environment)
}

struct ChromeSession {
    browser: Option<Browser>,
    events: Option<JoinHandle<()>>,
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn open_page(&mut self, options: &SessionOptions) -> Result<Box<dyn Page>> {
        let browser = self
            .browser
            .as_mut()
            .ok_or_else(|| AppError::Environment("browser already closed".to_string()))?;

        let context = browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await?;
        let mut target = CreateTargetParams::new("about:blank");
        target.browser_context_id = Some(context);

        let page = browser.new_page(target).await?;
        page.set_user_agent(SetUserAgentOverrideParams::new(options.user_agent.clone()))
            .await?;
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(HIDE_WEBDRIVER))
            .await?;

        Ok(Box::new(ChromePage {
            page,
            navigation_timeout: options.navigation_timeout,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };

        let closed = browser.close().await;
        if let Err(err) = &closed {
            warn!(error = %err, "graceful browser close failed, killing process");
            let _ = browser.kill().await;
        }
        if let Err(err) = browser.wait().await {
            warn!(error = %err, "failed to reap browser process");
        }
        if let Some(events) = self.events.take() {
            events.abort();
        }

        closed.map(|_| ()).map_err(AppError::from)
    }
}

struct ChromePage {
    page: CdpPage,
    navigation_timeout: Duration,
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str) -> Result<()> {
        // Subscribe first so the event cannot slip past us.
        let dom_ready = self.page.event_listener::<EventDomContentEventFired>().await?;

        let navigate = async {
            // chromiumoxide only resolves this after the load event.
            let navigation = self.page.execute(NavigateParams::new(url)).await?;
            if let Some(reason) = &navigation.result.error_text {
                return Err(AppError::Environment(format!(
                    "navigation to {} failed: {}",
                    url, reason
                )));
            }
            Ok(())
        };

        until_dom_content(navigate, dom_ready, self.navigation_timeout).await
    }

    async fn first_table(&self) -> Result<Option<Box<dyn Table>>> {
        let Some(table) = self.page.find_elements("table").await?.into_iter().next() else {
            return Ok(None);
        };
        let rows = table.find_elements("tbody tr").await?;
        Ok(Some(Box::new(ChromeTable { rows })))
    }
}

/// Resolves on the first DOMContentLoaded event or when `navigate` finishes,
/// whichever comes first. A still-pending `navigate` is dropped, so slow
/// subresources never fail the request.
async fn until_dom_content<N, E>(navigate: N, dom_ready: E, timeout: Duration) -> Result<()>
where
    N: Future<Output = Result<()>>,
    E: Stream,
{
    tokio::pin!(navigate);
    tokio::pin!(dom_ready);

    let wait = async {
        tokio::select! {
            result = &mut navigate => result,
            event = dom_ready.next() => match event {
                Some(_) => Ok(()),
                None => Err(AppError::Environment(
                    "page closed before DOMContentLoaded".to_string(),
                )),
            },
        }
    };

    tokio::time::timeout(timeout, wait).await.map_err(|_| {
        AppError::Environment(format!(
            "DOMContentLoaded not reached within {:?}",
            timeout
        ))
    })?
}

struct ChromeTable {
    rows: Vec<Element>,
}

#[async_trait]
impl Table for ChromeTable {
    async fn row_count(&self) -> Result<usize> {
        Ok(self.rows.len())
    }

    async fn cells(&self, index: usize) -> Result<Vec<Box<dyn Cell>>> {
        let row = self
            .rows
            .get(index)
            .ok_or_else(|| AppError::Extraction(format!("row {} out of range", index)))?;
        let cells = row.find_elements("td").await?;
        Ok(cells
            .into_iter()
            .map(|element| Box::new(ChromeCell { element }) as Box<dyn Cell>)
            .collect())
    }
}

struct ChromeCell {
    element: Element,
}

#[async_trait]
impl Cell for ChromeCell {
    async fn text(&self) -> Result<String> {
        Ok(self.element.inner_text().await?.unwrap_or_default())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self.element.attribute(name).await?)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn dom_content_wins_over_a_pending_load() {
        let result = until_dom_content(
            futures::future::pending::<Result<()>>(),
            stream::iter(vec![()]),
            WAIT,
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn navigation_that_finishes_first_is_enough() {
        let result = until_dom_content(async { Ok(()) }, stream::pending::<()>(), WAIT).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn navigation_failure_before_dom_content_propagates() {
        let result = until_dom_content(
            async { Err(AppError::Environment("net::ERR_NAME_NOT_RESOLVED".into())) },
            stream::pending::<()>(),
            WAIT,
        )
        .await;
        match result {
            Err(AppError::Environment(msg)) => assert!(msg.contains("ERR_NAME_NOT_RESOLVED")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn pending_navigation_is_dropped_after_dom_content() {
        let dropped = Arc::new(AtomicBool::new(false));

        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let guard = SetOnDrop(Arc::clone(&dropped));
        let navigate = async move {
            let _guard = guard;
            futures::future::pending::<Result<()>>().await
        };

        until_dom_content(navigate, stream::iter(vec![()]), WAIT).await.unwrap();
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn times_out_when_neither_happens() {
        let result = until_dom_content(
            futures::future::pending::<Result<()>>(),
            stream::pending::<()>(),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(AppError::Environment(_))));
    }

    #[tokio::test]
    async fn closed_event_stream_is_an_error() {
        let result = until_dom_content(
            futures::future::pending::<Result<()>>(),
            stream::empty::<()>(),
            WAIT,
        )
        .await;
        assert!(matches!(result, Err(AppError::Environment(_))));
    }

    #[test]
    fn launch_args_hide_automation() {
        assert!(LAUNCH_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
        assert!(LAUNCH_ARGS.contains(&"--disable-gpu"));
        assert!(HIDE_WEBDRIVER.contains("navigator, 'webdriver'"));
    }

    #[test]
    fn config_builds_with_an_explicit_executable() {
        let options = SessionOptions {
            chrome_executable: Some("/usr/bin/chromium".into()),
            ..SessionOptions::default()
        };
        assert!(browser_config(&options).is_ok());
    }
}
