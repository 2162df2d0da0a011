use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::alist_client::RemoteFile;
use crate::error::AppError;

/// Contents of a local stand-in for a remote-only media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub src: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha1: Option<String>,
}

impl From<&RemoteFile> for Placeholder {
    fn from(file: &RemoteFile) -> Self {
        Self {
            src: file.path.clone(),
            size: file.size,
            sha1: file.sha1.clone(),
        }
    }
}

impl Placeholder {
    pub async fn write(&self, path: &Path) -> Result<(), AppError> {
        let bytes = serde_json::to_vec(self)?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn read(path: &Path) -> Result<Self, AppError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Local directory mirroring a remote directory under `temp_root`.
pub fn local_dir(temp_root: &Path, remote_dir: &str) -> PathBuf {
    let mut dir = temp_root.to_path_buf();
    for component in remote_dir.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            continue;
        }
        dir.push(component);
    }
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_dir_mirrors_remote_structure() {
        let root = Path::new("/tmp/fake");
        assert_eq!(local_dir(root, "/"), PathBuf::from("/tmp/fake"));
        assert_eq!(local_dir(root, "/TV/Show/Season 1"), PathBuf::from("/tmp/fake/TV/Show/Season 1"));
        assert_eq!(local_dir(root, "TV/"), PathBuf::from("/tmp/fake/TV"));
    }

    #[test]
    fn local_dir_never_escapes_the_root() {
        let root = Path::new("/tmp/fake");
        assert_eq!(local_dir(root, "/../../etc"), PathBuf::from("/tmp/fake/etc"));
    }

    #[tokio::test]
    async fn write_then_read_keeps_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Episode.mkv");
        let placeholder = Placeholder {
            src: "/TV/Show/Episode.mkv".to_string(),
            size: 1_234_567,
            sha1: Some("DA39A3EE5E6B4B0D3255BFEF95601890AFD80709".to_string()),
        };
        placeholder.write(&path).await.unwrap();
        assert_eq!(Placeholder::read(&path).await.unwrap(), placeholder);
    }

    #[tokio::test]
    async fn read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("real.mkv");
        tokio::fs::write(&path, b"\x1a\x45\xdf\xa3 not json").await.unwrap();
        assert!(Placeholder::read(&path).await.is_err());
    }
}
