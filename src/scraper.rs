use std::time::Duration;

use tracing::{debug, info};

use crate::api::models::{DailyStat, ScrapeResponse};
use crate::browser::{with_session, BrowserLauncher, Page, SessionOptions, Table};
use crate::config::Config;
use crate::error::{AppError, Result};

/// Two weeks of daily rows, most recent first.
pub const MAX_DAYS: usize = 14;
pub const MIN_CELLS: usize = 6;
/// Days at or below this many views are dropped.
pub const VIEWS_THRESHOLD: u64 = 100;

const VIEWS_COLUMN: usize = 3;
const VIDEOS_COLUMN: usize = 5;
const NO_DATA: &str = "--";
const INCREASE_CLASS: &str = "positive";

pub fn channel_url(base_url: &str, channel_id: &str) -> String {
    format!("{}/youtube/channel/{}", base_url.trim_end_matches('/'), channel_id)
}

/// Runs the whole pipeline for one channel inside a single browser session.
pub async fn scrape_channel(
    launcher: &dyn BrowserLauncher,
    config: &Config,
    channel_id: &str,
) -> Result<ScrapeResponse> {
    let options = SessionOptions::from_config(config);
    let url = channel_url(&config.stats_base_url, channel_id);
    let settle = config.settle;

    let daily_stats = with_session(launcher, &options, move |page| {
        Box::pin(async move {
            load_channel_page(page, &url, settle).await?;
            extract_daily_stats(page).await
        })
    })
    .await?;

    Ok(ScrapeResponse::new(channel_id.to_string(), daily_stats))
}

/// Navigates, then sleeps for `settle` so client-side rendering can finish.
pub async fn load_channel_page(page: &dyn Page, url: &str, settle: Duration) -> Result<()> {
    info!(url, "Navigating to channel page");
    page.goto(url).await?;

    if !settle.is_zero() {
        debug!(?settle, "Waiting for page to settle");
        tokio::time::sleep(settle).await;
    }
    Ok(())
}

pub async fn extract_daily_stats(page: &dyn Page) -> Result<Vec<DailyStat>> {
    let table = page
        .first_table()
        .await?
        .ok_or_else(|| AppError::NotFound("no data table for this channel".to_string()))?;

    collect_daily_stats(table.as_ref()).await
}

/// Reads at most [`MAX_DAYS`] body rows in order, keeping the ones that
/// pass the per-row rules.
pub async fn collect_daily_stats(table: &dyn Table) -> Result<Vec<DailyStat>> {
    let total = table.row_count().await?;
    let days = total.min(MAX_DAYS);
    info!(total, days, "Found statistics table");

    let mut stats = Vec::with_capacity(days);
    for index in 0..days {
        let Some(raw) = read_row(table, index).await? else {
            debug!(index, "Row has too few cells, skipping");
            continue;
        };
        match raw.into_stat()? {
            Some(stat) => stats.push(stat),
            None => debug!(index, "Row has no usable views, skipping"),
        }
    }

    info!(days = stats.len(), "Extracted daily statistics");
    Ok(stats)
}

struct RawRow {
    views_text: String,
    videos_text: String,
    videos_class: Option<String>,
}

async fn read_row(table: &dyn Table, index: usize) -> Result<Option<RawRow>> {
    let cells = table.cells(index).await?;
    if cells.len() < MIN_CELLS {
        return Ok(None);
    }

    let videos = &cells[VIDEOS_COLUMN];
    Ok(Some(RawRow {
        views_text: cells[VIEWS_COLUMN].text().await?,
        videos_text: videos.text().await?,
        videos_class: videos.attribute("class").await?,
    }))
}

impl RawRow {
    fn into_stat(self) -> Result<Option<DailyStat>> {
        let Some(views) = parse_count(&self.views_text)? else {
            return Ok(None);
        };
        if views <= VIEWS_THRESHOLD {
            return Ok(None);
        }

        Ok(Some(DailyStat {
            views,
            videos_posted: parse_count(&self.videos_text)?.unwrap_or(0),
            has_new_video: self
                .videos_class
                .as_deref()
                .is_some_and(|class| class.contains(INCREASE_CLASS)),
        }))
    }
}

/// Keeps only the ASCII digits of `text`. `None` for the `--` sentinel or
/// when no digit is left.
pub fn parse_count(text: &str) -> Result<Option<u64>> {
    let text = text.trim();
    if text == NO_DATA {
        return Ok(None);
    }

    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Ok(None);
    }

    digits
        .parse::<u64>()
        .map(Some)
        .map_err(|e| AppError::Extraction(format!("count {:?} out of range: {}", text, e)))
}
