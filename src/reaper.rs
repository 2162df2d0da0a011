use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn, error, debug};
use crate::aliyun_client::{AliyunClient, CloudFile};

/// Parse the drive's `created_at` (`2024-01-01T08:00:00.123Z`).
pub fn parse_created_at(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whole hours elapsed since `created_at`, truncated.
pub fn age_hours(created_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - created_at).num_hours()
}

/// Files whose age meets or exceeds `max_hours`, paired with that age.
/// Entries with unreadable timestamps are kept.
pub fn stale_files(files: &[CloudFile], now: DateTime<Utc>, max_hours: i64) -> Vec<(&CloudFile, i64)> {
    files
        .iter()
        .filter_map(|file| match parse_created_at(&file.created_at) {
            Some(created) => {
                let hours = age_hours(created, now);
                debug!("Cloud file '{}' created at {} ({}h old)", file.name, file.created_at, hours);
                (hours >= max_hours).then_some((file, hours))
            }
            None => {
                warn!("Cannot parse creation time '{}' of '{}', keeping it", file.created_at, file.name);
                None
            }
        })
        .collect()
}

/// Delete every registered file older than `max_hours`. Returns how many
/// deletions succeeded.
pub async fn clean_stale_uploads(aliyun: &AliyunClient, max_hours: i64) -> usize {
    if !aliyun.is_configured() {
        warn!("Cloud drive id or parent folder is not configured, skipping cleanup");
        return 0;
    }

    let files = match aliyun.list_files().await {
        Ok(files) => files,
        Err(e) => {
            error!("Failed to list uploaded files: {}", e);
            return 0;
        }
    };

    let mut deleted = 0;
    for (file, hours) in stale_files(&files, Utc::now(), max_hours) {
        match aliyun.delete_file(&file.file_id).await {
            Ok(()) => {
                warn!("'{}' is {}h old, deleted", file.name, hours);
                deleted += 1;
            }
            Err(e) => error!("'{}' is {}h old, delete failed: {}", file.name, hours, e),
        }
    }

    info!("Upload cleanup: {} of {} files deleted", deleted, files.len());
    deleted
}
