use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use crate::error::AppError;
use crate::tasks::Schedule;
use crate::transfer::TransferMode;

pub const DEFAULT_ALIYUN_HOST: &str = "https://openapi.aliyundrive.com";
pub const DEFAULT_MAX_HOURS: i64 = 24;
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// What the lister does when a directory listing comes back empty or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyDirPolicy {
    /// Skip that directory and keep draining the queue.
    #[default]
    Skip,
    /// Stop the whole traversal and return what was gathered so far.
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct AlistConfig {
    pub host: Option<String>,
    pub token: Option<String>,
    pub password: Option<String>,
    pub sync_folder: Option<String>,
    pub storage_id: Option<u64>,
    pub empty_dir_policy: EmptyDirPolicy,
}

#[derive(Debug, Clone)]
pub struct AliyunConfig {
    pub host: String,
    pub drive_id: Option<String>,
    pub parent_file_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub max_hours: i64,
}

impl Default for AliyunConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ALIYUN_HOST.to_string(),
            drive_id: None,
            parent_file_id: None,
            client_id: None,
            client_secret: None,
            max_hours: DEFAULT_MAX_HOURS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeTransferConfig {
    pub enabled: bool,
    pub sync_schedule: Option<Schedule>,
    pub clean_schedule: Schedule,
    pub manual_transfer_path: Option<String>,
    pub temp_path: PathBuf,
    pub library_path: PathBuf,
    pub transfer_mode: TransferMode,
}

impl Default for FakeTransferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sync_schedule: None,
            clean_schedule: Schedule::Every(DEFAULT_CLEAN_INTERVAL),
            manual_transfer_path: None,
            temp_path: PathBuf::from("./temp"),
            library_path: PathBuf::from("./library"),
            transfer_mode: TransferMode::Move,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AntiSpoilConfig {
    pub enabled: bool,
    pub delay: Duration,
}

/// Immutable service configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub alist: AlistConfig,
    pub aliyun: AliyunConfig,
    pub fake_transfer: FakeTransferConfig,
    pub anti_spoil: AntiSpoilConfig,
    pub api_key: Option<String>,
    pub listen_addr: SocketAddr,
    pub db_path: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Blank values
    /// count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let alist = AlistConfig {
            host: get("ALIST_HOST").map(|h| h.trim_end_matches('/').to_string()),
            token: get("ALIST_TOKEN"),
            password: get("ALIST_PASSWORD"),
            sync_folder: get("ALIST_SYNC_FOLDER"),
            storage_id: get("ALIST_STORAGE_ID")
                .map(|v| parse_number::<u64>("ALIST_STORAGE_ID", &v))
                .transpose()?,
            empty_dir_policy: match get("ALIST_EMPTY_DIR_POLICY").as_deref() {
                None => EmptyDirPolicy::default(),
                Some(v) if v.eq_ignore_ascii_case("skip") => EmptyDirPolicy::Skip,
                Some(v) if v.eq_ignore_ascii_case("abort") => EmptyDirPolicy::Abort,
                Some(v) => {
                    return Err(AppError::Config(format!(
                        "ALIST_EMPTY_DIR_POLICY must be 'skip' or 'abort', got '{}'",
                        v
                    )))
                }
            },
        };

        let aliyun = AliyunConfig {
            host: get("ALIYUN_HOST")
                .map(|h| h.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ALIYUN_HOST.to_string()),
            drive_id: get("ALIYUN_DRIVE_ID"),
            parent_file_id: get("ALIYUN_PARENT_FILE_ID"),
            client_id: get("ALIYUN_CLIENT_ID"),
            client_secret: get("ALIYUN_CLIENT_SECRET"),
            max_hours: get("MAX_HOURS")
                .map(|v| parse_number::<i64>("MAX_HOURS", &v))
                .transpose()?
                .filter(|h| *h > 0)
                .unwrap_or(DEFAULT_MAX_HOURS),
        };

        let defaults = FakeTransferConfig::default();
        let fake_transfer = FakeTransferConfig {
            enabled: get("FAKE_TRANSFER_ENABLED").is_some_and(|v| parse_bool(&v)),
            sync_schedule: get("SYNC_INTERVAL").map(|v| Schedule::parse(&v)).transpose()?,
            clean_schedule: get("CLEAN_INTERVAL")
                .map(|v| Schedule::parse(&v))
                .transpose()?
                .unwrap_or(defaults.clean_schedule),
            manual_transfer_path: get("MANUAL_TRANSFER_PATH"),
            temp_path: get("TEMP_PATH").map(PathBuf::from).unwrap_or(defaults.temp_path),
            library_path: get("LIBRARY_PATH").map(PathBuf::from).unwrap_or(defaults.library_path),
            transfer_mode: get("TRANSFER_MODE")
                .map(|v| TransferMode::parse(&v))
                .transpose()?
                .unwrap_or(defaults.transfer_mode),
        };

        let anti_spoil = AntiSpoilConfig {
            enabled: get("ANTISPOIL_ENABLED").is_some_and(|v| parse_bool(&v)),
            delay: Duration::from_secs(
                get("ANTISPOIL_DELAY_SECS")
                    .map(|v| parse_number::<u64>("ANTISPOIL_DELAY_SECS", &v))
                    .transpose()?
                    .unwrap_or(0),
            ),
        };

        let listen_addr = match get("LISTEN_ADDR") {
            Some(v) => v.parse::<SocketAddr>().map_err(|e| {
                AppError::Config(format!("LISTEN_ADDR '{}' is not a socket address: {}", v, e))
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 3001)),
        };

        Ok(Self {
            alist,
            aliyun,
            fake_transfer,
            anti_spoil,
            api_key: get("API_KEY"),
            listen_addr,
            db_path: get("DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("faketransfer.db")),
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .parse::<T>()
        .map_err(|_| AppError::Config(format!("{} must be a number, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, AppError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert!(config.alist.host.is_none());
        assert_eq!(config.alist.empty_dir_policy, EmptyDirPolicy::Skip);
        assert_eq!(config.aliyun.host, DEFAULT_ALIYUN_HOST);
        assert_eq!(config.aliyun.max_hours, 24);
        assert!(!config.fake_transfer.enabled);
        assert!(config.fake_transfer.sync_schedule.is_none());
        assert_eq!(config.fake_transfer.clean_schedule, Schedule::Every(DEFAULT_CLEAN_INTERVAL));
        assert_eq!(config.fake_transfer.transfer_mode, TransferMode::Move);
        assert!(!config.anti_spoil.enabled);
        assert_eq!(config.anti_spoil.delay, Duration::ZERO);
        assert_eq!(config.listen_addr.port(), 3001);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[("ALIST_HOST", "   "), ("ALIYUN_DRIVE_ID", "")]).unwrap();
        assert!(config.alist.host.is_none());
        assert!(config.aliyun.drive_id.is_none());
    }

    #[test]
    fn hosts_lose_trailing_slash() {
        let config = config_from(&[
            ("ALIST_HOST", "http://alist:5244/"),
            ("ALIYUN_HOST", "http://aliyun/"),
        ])
        .unwrap();
        assert_eq!(config.alist.host.as_deref(), Some("http://alist:5244"));
        assert_eq!(config.aliyun.host, "http://aliyun");
    }

    #[test]
    fn parses_full_configuration() {
        let config = config_from(&[
            ("FAKE_TRANSFER_ENABLED", "true"),
            ("ALIST_STORAGE_ID", "7"),
            ("ALIST_EMPTY_DIR_POLICY", "Abort"),
            ("SYNC_INTERVAL", "30m"),
            ("CLEAN_INTERVAL", "2h"),
            ("MAX_HOURS", "12"),
            ("TRANSFER_MODE", "copy"),
            ("ANTISPOIL_ENABLED", "1"),
            ("ANTISPOIL_DELAY_SECS", "5"),
            ("LISTEN_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();
        assert!(config.fake_transfer.enabled);
        assert_eq!(config.alist.storage_id, Some(7));
        assert_eq!(config.alist.empty_dir_policy, EmptyDirPolicy::Abort);
        assert_eq!(config.fake_transfer.sync_schedule, Some(Schedule::Every(Duration::from_secs(1800))));
        assert_eq!(config.fake_transfer.clean_schedule, Schedule::Every(Duration::from_secs(7200)));
        assert_eq!(config.aliyun.max_hours, 12);
        assert_eq!(config.fake_transfer.transfer_mode, TransferMode::Copy);
        assert!(config.anti_spoil.enabled);
        assert_eq!(config.anti_spoil.delay, Duration::from_secs(5));
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn non_positive_max_hours_falls_back_to_default() {
        let config = config_from(&[("MAX_HOURS", "0")]).unwrap();
        assert_eq!(config.aliyun.max_hours, DEFAULT_MAX_HOURS);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config_from(&[("ALIST_STORAGE_ID", "abc")]).is_err());
        assert!(config_from(&[("ALIST_EMPTY_DIR_POLICY", "maybe")]).is_err());
        assert!(config_from(&[("LISTEN_ADDR", "nowhere")]).is_err());
        assert!(config_from(&[("TRANSFER_MODE", "teleport")]).is_err());
    }
}
