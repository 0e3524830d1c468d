use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRequest {
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// One calendar day as shown in the analytics table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStat {
    pub views: u64,
    pub videos_posted: u64,
    pub has_new_video: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeResponse {
    pub channel_id: String,
    pub daily_stats: Vec<DailyStat>,
    pub scraped_at: DateTime<Utc>,
}

impl ScrapeResponse {
    pub fn new(channel_id: String, daily_stats: Vec<DailyStat>) -> Self {
        Self {
            channel_id,
            daily_stats,
            scraped_at: Utc::now(),
        }
    }
}
