use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{warn, debug};
use crate::config::AliyunConfig;
use crate::error::AppError;
use crate::token_cache::TokenCache;

const MAX_ATTEMPTS: u32 = 3;
const LIST_PAGE_SIZE: u32 = 100;
/// Proof accepted by the open API for hash-only registrations.
const PROOF_CODE: &str = "DA76";

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedFile {
    pub file_id: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub rapid_upload: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DownloadUrl {
    #[serde(default)]
    url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudFile {
    pub file_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
struct FileListPage {
    #[serde(default)]
    items: Vec<CloudFile>,
    #[serde(default)]
    next_marker: Option<String>,
}

/// Client for the cloud-drive open API. Every call is a bearer-authenticated
/// JSON POST whose only success status is 200.
#[derive(Debug)]
pub struct AliyunClient {
    client: reqwest::Client,
    base_url: String,
    drive_id: Option<String>,
    parent_file_id: Option<String>,
    tokens: Arc<TokenCache>,
}

impl AliyunClient {
    pub fn new(config: &AliyunConfig, tokens: Arc<TokenCache>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("faketransfer/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
            drive_id: config.drive_id.clone(),
            parent_file_id: config.parent_file_id.clone(),
            tokens,
        })
    }

    /// Drive id and target folder are both required for every call.
    pub fn is_configured(&self) -> bool {
        self.drive_id.is_some() && self.parent_file_id.is_some()
    }

    fn target(&self) -> Result<(&str, &str), AppError> {
        match (self.drive_id.as_deref(), self.parent_file_id.as_deref()) {
            (Some(drive), Some(parent)) => Ok((drive, parent)),
            _ => Err(AppError::Config("cloud drive id or parent folder is not configured".to_string())),
        }
    }

    fn should_retry_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
            || status == reqwest::StatusCode::BAD_GATEWAY
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
    }

    /// Bearer POST. A 401 drops the cached token and retries once with a
    /// fresh one.
    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<String, AppError> {
        let token = self.tokens.get_token().await?;
        let (mut status, mut text) = self.send(path, body, &token).await?;

        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!("Cloud API {} rejected the access token, refreshing it", path);
            self.tokens.invalidate();
            let token = self.tokens.get_token().await?;
            (status, text) = self.send(path, body, &token).await?;
        }

        if status != reqwest::StatusCode::OK {
            return Err(AppError::Api(format!("{} returned {}: {}", path, status, text)));
        }
        Ok(text)
    }

    async fn send(
        &self,
        path: &str,
        body: &serde_json::Value,
        token: &str,
    ) -> Result<(reqwest::StatusCode, String), AppError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 1;
        loop {
            let resp = self.client.post(&url).bearer_auth(token).json(body).send().await?;
            let status = resp.status();

            if Self::should_retry_status(status) && attempt < MAX_ATTEMPTS {
                let backoff = Duration::from_millis(500 * 2u64.pow(attempt - 1));
                let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                warn!(
                    "Cloud API {} returned {} (attempt {}/{}), retrying in {}ms",
                    path,
                    status,
                    attempt,
                    MAX_ATTEMPTS,
                    (backoff + jitter).as_millis()
                );
                tokio::time::sleep(backoff + jitter).await;
                attempt += 1;
                continue;
            }

            return Ok((status, resp.text().await?));
        }
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &serde_json::Value) -> Result<T, AppError> {
        let text = self.post(path, body).await?;
        serde_json::from_str(&text).map_err(|e| {
            AppError::Api(format!("cannot decode {} response: {}. Body: {}", path, e, text))
        })
    }

    /// Register a file by content hash only, refusing name collisions.
    pub async fn create_file(&self, name: &str, size: u64, sha1: &str) -> Result<CreatedFile, AppError> {
        let (drive_id, parent_file_id) = self.target()?;
        let body = json!({
            "drive_id": drive_id,
            "parent_file_id": parent_file_id,
            "type": "file",
            "name": name,
            "check_name_mode": "refuse",
            "size": size,
            "content_hash": sha1,
            "content_hash_name": "sha1",
            "proof_code": PROOF_CODE,
        });
        let created: CreatedFile = self.post_json("/adrive/v1.0/openFile/create", &body).await?;
        if created.file_id.is_empty() {
            return Err(AppError::Api("openFile/create returned no file_id".to_string()));
        }
        debug!("Registered '{}' as {} (rapid: {})", name, created.file_id, created.rapid_upload);
        Ok(created)
    }

    pub async fn get_download_url(&self, file_id: &str) -> Result<String, AppError> {
        let (drive_id, _) = self.target()?;
        let body = json!({ "drive_id": drive_id, "file_id": file_id });
        let resp: DownloadUrl = self.post_json("/adrive/v1.0/openFile/getDownloadUrl", &body).await?;
        if resp.url.is_empty() {
            return Err(AppError::Api(format!("no download url for {}", file_id)));
        }
        Ok(resp.url)
    }

    /// All files under the target folder, oldest first.
    pub async fn list_files(&self) -> Result<Vec<CloudFile>, AppError> {
        let (drive_id, parent_file_id) = self.target()?;
        let mut files = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut body = json!({
                "drive_id": drive_id,
                "parent_file_id": parent_file_id,
                "order_by": "created_at",
                "limit": LIST_PAGE_SIZE,
            });
            if let Some(m) = &marker {
                body["marker"] = json!(m);
            }
            let page: FileListPage = self.post_json("/adrive/v1.0/openFile/list", &body).await?;
            files.extend(page.items);
            match page.next_marker.filter(|m| !m.is_empty()) {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(files)
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), AppError> {
        let (drive_id, _) = self.target()?;
        let body = json!({ "drive_id": drive_id, "file_id": file_id });
        self.post("/adrive/v1.0/openFile/delete", &body).await?;
        Ok(())
    }
}
