use crate::error::{AppError, Result};

/// Platform channel IDs are never shorter than this.
pub const MIN_CHANNEL_ID_LEN: usize = 10;

/// Checks the `Authorization` header against the configured secret.
///
/// An unset secret is an operator fault and wins over any header value.
pub fn authorize(secret: Option<&str>, header: Option<&str>) -> Result<()> {
    let secret = secret.ok_or_else(|| {
        AppError::Configuration("SCRAPER_API_SECRET is not configured".to_string())
    })?;

    let expected = format!("Bearer {}", secret);
    match header {
        Some(value) if value == expected => Ok(()),
        Some(_) => Err(AppError::Authentication("invalid bearer token".to_string())),
        None => Err(AppError::Authentication("missing Authorization header".to_string())),
    }
}

pub fn validate_channel_id(channel_id: Option<&str>) -> Result<&str> {
    match channel_id {
        Some(id) if id.chars().count() >= MIN_CHANNEL_ID_LEN => Ok(id),
        Some(id) => Err(AppError::Validation(format!("Invalid channel ID: {}", id))),
        None => Err(AppError::Validation("Missing channelId in request body".to_string())),
    }
}
