//! Lightweight engine: one HTTP GET and static HTML parsing.
//!
//! Runs no JavaScript, so it only sees tables the server renders up front.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder};
use tracing::{debug, warn};

use super::snapshot::StaticTable;
use super::{BrowserLauncher, BrowserSession, Page, SessionOptions, Table};
use crate::error::{AppError, Result};

pub struct HttpLauncher;

#[async_trait]
impl BrowserLauncher for HttpLauncher {
    async fn launch(&self, options: &SessionOptions) -> Result<Box<dyn BrowserSession>> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = ClientBuilder::new()
            .user_agent(options.user_agent.clone())
            .default_headers(headers)
            .timeout(options.navigation_timeout)
            .build()
            .map_err(|e| AppError::Environment(format!("failed to build HTTP client: {}", e)))?;

        Ok(Box::new(HttpSession { client: Some(client) }))
    }
}

struct HttpSession {
    client: Option<Client>,
}

#[async_trait]
impl BrowserSession for HttpSession {
    async fn open_page(&mut self, _options: &SessionOptions) -> Result<Box<dyn Page>> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| AppError::Environment("session already closed".to_string()))?;
        Ok(Box::new(HttpPage {
            client,
            html: Mutex::new(None),
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }
}

struct HttpPage {
    client: Client,
    html: Mutex<Option<String>>,
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&self, url: &str) -> Result<()> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        // Error pages are still parsed; a page without the table reports
        // "not found" the same way the chrome engine does.
        if !status.is_success() {
            warn!(%status, url, "upstream returned an error status");
        }

        let html = response.text().await?;
        debug!(%status, bytes = html.len(), "fetched page HTML");
        *self
            .html
            .lock()
            .map_err(|_| AppError::Extraction("page state poisoned".to_string()))? = Some(html);
        Ok(())
    }

    async fn first_table(&self) -> Result<Option<Box<dyn Table>>> {
        let html = self
            .html
            .lock()
            .map_err(|_| AppError::Extraction("page state poisoned".to_string()))?
            .clone()
            .ok_or_else(|| AppError::Extraction("no page loaded".to_string()))?;

        Ok(StaticTable::first_in(&html).map(|table| Box::new(table) as Box<dyn Table>))
    }
}
