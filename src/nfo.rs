use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use regex::{NoExpand, Regex};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{info, error, debug};
use crate::config::AntiSpoilConfig;
use crate::error::AppError;

static PLOT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<plot>.*?</plot>").unwrap());
static OUTLINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<outline>.*?</outline>").unwrap());
static TITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<title>.*?</title>").unwrap());
static SORTTITLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<sorttitle>.*?</sorttitle>").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Movie,
    Tv,
    Other(String),
}

impl From<String> for MediaType {
    fn from(value: String) -> Self {
        let v = value.trim();
        if v == "电视剧" || v.eq_ignore_ascii_case("tv") || v.eq_ignore_ascii_case("show") {
            Self::Tv
        } else if v == "电影" || v.eq_ignore_ascii_case("movie") {
            Self::Movie
        } else {
            Self::Other(value)
        }
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(String::deserialize(deserializer)?.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMediaInfo {
    #[serde(rename = "type")]
    pub media_type: Option<MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTransferInfo {
    #[serde(default)]
    pub file_list_new: Vec<String>,
}

/// Notification sent after the organizer files new media.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferCompleteEvent {
    pub mediainfo: EventMediaInfo,
    #[serde(default)]
    pub transferinfo: EventTransferInfo,
}

impl TransferCompleteEvent {
    pub fn is_tv(&self) -> bool {
        self.mediainfo.media_type == Some(MediaType::Tv)
    }
}

/// Episode title from a stem like `Show (2020) - S01E01 - Episode Title`.
pub fn title_from_stem(stem: &str) -> String {
    stem.rsplit('-').next().unwrap_or(stem).trim().to_string()
}

pub fn nfo_path_for(media: &Path) -> PathBuf {
    media.with_extension("nfo")
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Blank plot and outline, and replace title and sort title with `title`.
/// Everything else is left untouched.
pub fn sanitize_nfo(nfo: &str, title: &str) -> String {
    let title = xml_escape(title);
    let nfo = PLOT_RE.replace_all(nfo, "<plot />");
    let nfo = OUTLINE_RE.replace_all(&nfo, "<outline />");
    let nfo = TITLE_RE.replace_all(&nfo, NoExpand(&format!("<title>{}</title>", title)));
    SORTTITLE_RE
        .replace_all(&nfo, NoExpand(&format!("<sorttitle>{}</sorttitle>", title)))
        .into_owned()
}

/// Rewrite an NFO file in place. Not atomic.
pub async fn sanitize_nfo_file(path: &Path, title: &str) -> Result<(), AppError> {
    let mut file = tokio::fs::OpenOptions::new().read(true).write(true).open(path).await?;
    let mut nfo = String::new();
    file.read_to_string(&mut nfo).await?;
    let sanitized = sanitize_nfo(&nfo, title);
    file.seek(std::io::SeekFrom::Start(0)).await?;
    file.write_all(sanitized.as_bytes()).await?;
    file.set_len(sanitized.len() as u64).await?;
    file.flush().await?;
    Ok(())
}

/// Strip spoilers from the NFOs next to every newly transferred TV file.
/// Returns how many NFOs were rewritten.
pub async fn handle_transfer_complete(config: &AntiSpoilConfig, event: &TransferCompleteEvent) -> usize {
    if !config.enabled || !event.is_tv() {
        return 0;
    }

    if !config.delay.is_zero() {
        info!("Waiting {}s before hiding spoilers...", config.delay.as_secs());
        tokio::time::sleep(config.delay).await;
    }

    let mut rewritten = 0;
    for media in &event.transferinfo.file_list_new {
        let media = Path::new(media);
        let nfo_path = nfo_path_for(media);
        if !tokio::fs::try_exists(&nfo_path).await.unwrap_or(false) {
            debug!("No NFO next to '{}'", media.display());
            continue;
        }
        let stem = media.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let title = title_from_stem(&stem);

        info!("Hiding plot in '{}'", nfo_path.display());
        match sanitize_nfo_file(&nfo_path, &title).await {
            Ok(()) => rewritten += 1,
            Err(e) => error!("Failed to hide plot in '{}': {}", nfo_path.display(), e),
        }
    }
    rewritten
}
