use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use tracing::{info, warn, debug};
use crate::config::{AlistConfig, EmptyDirPolicy};
use crate::error::AppError;
use crate::media::is_media_file;

/// Remote media files grouped by the directory that directly contains them.
pub type RemoteListing = BTreeMap<String, Vec<RemoteFile>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub sha1: Option<String>,
    /// Full remote path, `<dir>/<name>`.
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct AlistResponse<T> {
    code: Option<i64>,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct FsListData {
    #[serde(default)]
    content: Option<Vec<FsEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
struct FsEntry {
    name: String,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    hash_info: Option<HashInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct HashInfo {
    sha1: Option<String>,
}

/// Storage entry returned by the admin storage API. `addition` is itself a
/// JSON document encoded as a string.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageInfo {
    #[serde(default)]
    pub driver: String,
    #[serde(default)]
    pub addition: String,
}

#[derive(Debug, Serialize)]
struct FsListRequest<'a> {
    path: &'a str,
    password: &'a str,
    page: u32,
    per_page: u32,
    refresh: bool,
}

#[derive(Debug)]
pub struct AlistClient {
    client: reqwest::Client,
    host: Option<String>,
    has_token: bool,
    password: Option<String>,
    empty_dir_policy: EmptyDirPolicy,
}

impl AlistClient {
    pub fn new(config: &AlistConfig) -> Result<Self, AppError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            // Alist expects the raw token, without a "Bearer" scheme.
            let mut auth_header = HeaderValue::from_str(token)
                .map_err(|e| AppError::Config(format!("Invalid Alist token for HTTP header: {}", e)))?;
            auth_header.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_header);
        }
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("faketransfer/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            host: config.host.clone(),
            has_token: config.token.is_some(),
            password: config.password.clone(),
            empty_dir_policy: config.empty_dir_policy,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }

    fn host(&self) -> Result<&str, AppError> {
        self.host
            .as_deref()
            .ok_or_else(|| AppError::Config("Alist host is not configured".to_string()))
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<FsEntry>, AppError> {
        let url = format!("{}/api/fs/list", self.host()?);
        let body = FsListRequest {
            path,
            password: "",
            page: 1,
            per_page: 0,
            refresh: self.has_token,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(pwd) = &self.password {
            request = request.header(COOKIE, format!("browser-password={}", pwd));
        }

        let resp = request.send().await?.error_for_status()?;
        let parsed: AlistResponse<FsListData> = resp.json().await?;
        let data = check_code(parsed)?;
        Ok(data.content.unwrap_or_default())
    }

    /// Breadth-first walk from `root`, collecting media files per directory.
    ///
    /// Listing failures never surface as errors: a directory that fails to
    /// list is treated like an empty one and handled per the configured
    /// [`EmptyDirPolicy`].
    pub async fn list_media(&self, root: &str) -> RemoteListing {
        let mut listing = RemoteListing::new();
        if !self.is_configured() {
            warn!("Alist host is not configured, nothing to list");
            return listing;
        }

        let mut queue = VecDeque::from([root.to_string()]);
        let mut visited = 0usize;

        while let Some(dir) = queue.pop_front() {
            visited += 1;
            let entries = match self.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to list Alist directory '{}': {}", dir, e);
                    Vec::new()
                }
            };

            if entries.is_empty() {
                match self.empty_dir_policy {
                    EmptyDirPolicy::Skip => {
                        debug!("Alist directory '{}' is empty, skipping", dir);
                        continue;
                    }
                    EmptyDirPolicy::Abort => {
                        if !queue.is_empty() {
                            warn!(
                                "Alist directory '{}' is empty, aborting traversal and dropping {} queued directories",
                                dir,
                                queue.len()
                            );
                        }
                        break;
                    }
                }
            }

            for entry in entries {
                let path = join_remote_path(&dir, &entry.name);
                if entry.is_dir {
                    queue.push_back(path);
                } else if is_media_file(&entry.name) {
                    listing.entry(dir.clone()).or_default().push(RemoteFile {
                        name: entry.name,
                        size: entry.size,
                        sha1: entry.hash_info.and_then(|h| h.sha1).filter(|s| !s.is_empty()),
                        path,
                    });
                } else {
                    debug!("Ignoring non-media file '{}'", path);
                }
            }
        }

        info!(
            "Listed {} media files in {} directories ({} visited) under '{}'",
            listing.values().map(Vec::len).sum::<usize>(),
            listing.len(),
            visited,
            root
        );
        listing
    }

    pub async fn get_storage(&self, storage_id: u64) -> Result<StorageInfo, AppError> {
        let url = format!("{}/api/admin/storage/get", self.host()?);
        let resp = self
            .client
            .get(&url)
            .query(&[("id", storage_id)])
            .send()
            .await?
            .error_for_status()?;
        let parsed: AlistResponse<StorageInfo> = resp.json().await?;
        check_code(parsed)
    }
}

fn check_code<T>(resp: AlistResponse<T>) -> Result<T, AppError> {
    if let Some(code) = resp.code {
        if code != 200 {
            return Err(AppError::Api(format!("Alist returned code {}: {}", code, resp.message)));
        }
    }
    resp.data
        .ok_or_else(|| AppError::Api(format!("Alist response has no data: {}", resp.message)))
}

pub fn join_remote_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}
