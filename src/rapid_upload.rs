use std::path::Path;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn, error};
use crate::aliyun_client::AliyunClient;
use crate::placeholder::Placeholder;

/// Body of `POST /rapid_upload`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RapidUploadRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_size")]
    pub size: Option<u64>,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub abs_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RapidUploadData {
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RapidUploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: RapidUploadData,
}

impl RapidUploadResponse {
    fn invalid_parameters() -> Self {
        Self {
            success: false,
            message: Some("invalid parameters".to_string()),
            data: RapidUploadData { url: None },
        }
    }

    fn from_url(url: Option<String>) -> Self {
        Self {
            success: url.is_some(),
            message: None,
            data: RapidUploadData { url },
        }
    }
}

/// Accepts `123`, `"123"`, `null` or an empty string.
fn lenient_size<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Text(String),
    }

    match Option::<Size>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Size::Number(n)) => Ok(Some(n)),
        Some(Size::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Size::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// What gets registered with the cloud drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub file_name: String,
    pub size: u64,
    pub sha1: String,
}

/// Work out name, size and hash from the request, reading the placeholder at
/// `abs_path` when it exists. `None` means the parameters are unusable.
pub async fn resolve_target(req: &RapidUploadRequest) -> Option<UploadTarget> {
    let placeholder_path = req
        .abs_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(Path::new)
        .filter(|p| p.is_file());

    let (file_name, size, sha1) = match placeholder_path {
        Some(path) => {
            let placeholder = match Placeholder::read(path).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("Cannot read placeholder '{}': {}", path.display(), e);
                    return None;
                }
            };
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
            (name, Some(placeholder.size), placeholder.sha1)
        }
        None => (req.file_name.clone(), req.size, req.sha1.clone()),
    };

    let size = size.filter(|s| *s > 0)?;
    let sha1 = sha1.filter(|s| !s.is_empty())?;
    let file_name = file_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{}.mkv", chrono::Local::now().format("%Y%m%d%H%M%S%6f")));

    Some(UploadTarget { file_name, size, sha1 })
}

/// Register the file by hash and return a direct download link, or `None` if
/// anything along the way fails.
pub async fn download_url(aliyun: &AliyunClient, target: &UploadTarget) -> Option<String> {
    if !aliyun.is_configured() {
        warn!("Cloud drive id or parent folder is not configured, cannot resolve '{}'", target.file_name);
        return None;
    }

    let created = match aliyun.create_file(&target.file_name, target.size, &target.sha1).await {
        Ok(created) => created,
        Err(e) => {
            error!("Rapid upload of '{}' failed: {}", target.file_name, e);
            return None;
        }
    };

    match aliyun.get_download_url(&created.file_id).await {
        Ok(url) => {
            info!("Resolved download url for '{}'", target.file_name);
            Some(url)
        }
        Err(e) => {
            error!("Cannot get download url for '{}': {}", target.file_name, e);
            None
        }
    }
}

pub async fn rapid_upload(aliyun: &AliyunClient, req: &RapidUploadRequest) -> RapidUploadResponse {
    match resolve_target(req).await {
        Some(target) => RapidUploadResponse::from_url(download_url(aliyun, &target).await),
        None => RapidUploadResponse::invalid_parameters(),
    }
}
