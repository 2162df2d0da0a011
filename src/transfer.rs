use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{info, error, debug, warn};
use crate::error::AppError;

const HISTORY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("transfer_history");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

impl TransferMode {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            other => Err(AppError::Config(format!(
                "TRANSFER_MODE must be 'move' or 'copy', got '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Move => f.write_str("move"),
            Self::Copy => f.write_str("copy"),
        }
    }
}

/// Ledger of placeholders that were already handed to the pipeline.
pub trait TransferHistory: Send + Sync {
    fn has_record(&self, path: &Path) -> bool;
}

/// Something that files placeholders (single files or whole directories)
/// into a media library.
pub trait TransferPipeline: Send + Sync {
    fn transfer(&self, path: &Path, mode: TransferMode) -> impl Future<Output = Result<(), String>> + Send;
}

/// Run the pipeline and log the outcome. Never retries.
pub async fn trigger_transfer<P: TransferPipeline>(pipeline: &P, path: &Path, mode: TransferMode) -> bool {
    match pipeline.transfer(path, mode).await {
        Ok(()) => {
            info!("Transferred '{}' ({})", path.display(), mode);
            true
        }
        Err(msg) => {
            error!("Transfer of '{}' failed: {}", path.display(), msg);
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub dest: String,
    pub transferred_at: i64,
}

#[derive(Debug, Clone)]
pub struct RedbTransferHistory {
    db: Arc<Database>,
}

impl RedbTransferHistory {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, path: &Path) -> Result<Option<HistoryEntry>, redb::Error> {
        let key = path.to_string_lossy();
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(HISTORY_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let Some(entry) = table.get(key.as_ref())? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(entry.value()).ok())
    }

    pub fn record(&self, path: &Path, entry: &HistoryEntry) -> Result<(), AppError> {
        let bytes = serde_json::to_vec(entry)?;
        self.write(&path.to_string_lossy(), &bytes)?;
        Ok(())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), redb::Error> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(HISTORY_TABLE)?;
            table.insert(key, bytes)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

impl TransferHistory for RedbTransferHistory {
    fn has_record(&self, path: &Path) -> bool {
        match self.get(path) {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                error!("Failed to read transfer history for '{}': {}", path.display(), e);
                false
            }
        }
    }
}

/// Files placeholders from the temp root into a library root, keeping the
/// relative layout, and records each one in the transfer history.
#[derive(Debug, Clone)]
pub struct LibraryTransfer {
    temp_root: PathBuf,
    library_root: PathBuf,
    history: Arc<RedbTransferHistory>,
}

impl LibraryTransfer {
    pub fn new(temp_root: PathBuf, library_root: PathBuf, history: Arc<RedbTransferHistory>) -> Self {
        Self {
            temp_root,
            library_root,
            history,
        }
    }

    fn destination_for(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.temp_root) {
            Ok(relative) => self.library_root.join(relative),
            Err(_) => self
                .library_root
                .join(path.file_name().unwrap_or(path.as_os_str())),
        }
    }

    async fn transfer_file(&self, path: &Path, mode: TransferMode) -> Result<(), String> {
        let dest = self.destination_for(path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot create '{}': {}", parent.display(), e))?;
        }

        match mode {
            TransferMode::Move => {
                if let Err(e) = tokio::fs::rename(path, &dest).await {
                    debug!("Rename of '{}' failed ({}), falling back to copy", path.display(), e);
                    copy_file(path, &dest).await?;
                    tokio::fs::remove_file(path)
                        .await
                        .map_err(|e| format!("cannot remove '{}': {}", path.display(), e))?;
                }
            }
            TransferMode::Copy => copy_file(path, &dest).await?,
        }

        let entry = HistoryEntry {
            dest: dest.to_string_lossy().into_owned(),
            transferred_at: chrono::Utc::now().timestamp(),
        };
        self.history
            .record(path, &entry)
            .map_err(|e| format!("cannot record history for '{}': {}", path.display(), e))?;
        debug!("Filed '{}' as '{}'", path.display(), dest.display());
        Ok(())
    }
}

async fn copy_file(from: &Path, to: &Path) -> Result<(), String> {
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| format!("cannot copy '{}' to '{}': {}", from.display(), to.display(), e))
}

impl TransferPipeline for LibraryTransfer {
    async fn transfer(&self, path: &Path, mode: TransferMode) -> Result<(), String> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| format!("cannot stat '{}': {}", path.display(), e))?;
        if !metadata.is_dir() {
            return self.transfer_file(path, mode).await;
        }

        let mut read_dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
        let mut errors = Vec::new();
        let mut filed = 0usize;
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?
        {
            let child = entry.path();
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file || self.history.has_record(&child) {
                continue;
            }
            match self.transfer_file(&child, mode).await {
                Ok(()) => filed += 1,
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            debug!("Filed {} placeholders from '{}'", filed, path.display());
            Ok(())
        } else {
            warn!("Filed {} placeholders from '{}' with {} failures", filed, path.display(), errors.len());
            Err(errors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db(dir: &Path) -> Arc<Database> {
        Arc::new(Database::create(dir.join("history.db")).unwrap())
    }

    #[test]
    fn transfer_mode_parses_case_insensitively() {
        assert_eq!(TransferMode::parse("MOVE").unwrap(), TransferMode::Move);
        assert_eq!(TransferMode::parse(" copy ").unwrap(), TransferMode::Copy);
        assert!(TransferMode::parse("link").is_err());
    }

    #[test]
    fn history_is_empty_before_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let history = RedbTransferHistory::new(open_db(dir.path()));
        assert!(!history.has_record(Path::new("/tmp/temp/a.mkv")));
    }

    #[test]
    fn history_remembers_recorded_paths() {
        let dir = tempfile::tempdir().unwrap();
        let history = RedbTransferHistory::new(open_db(dir.path()));
        let entry = HistoryEntry {
            dest: "/library/a.mkv".to_string(),
            transferred_at: 1_700_000_000,
        };
        history.record(Path::new("/tmp/temp/a.mkv"), &entry).unwrap();
        assert!(history.has_record(Path::new("/tmp/temp/a.mkv")));
        assert!(!history.has_record(Path::new("/tmp/temp/b.mkv")));
        assert_eq!(history.get(Path::new("/tmp/temp/a.mkv")).unwrap(), Some(entry));
    }

    #[test]
    fn history_entries_are_stored_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let history = RedbTransferHistory::new(open_db(dir.path()));
        let entry = HistoryEntry { dest: "/library/b.mkv".to_string(), transferred_at: 7 };
        history.record(Path::new("/tmp/temp/b.mkv"), &entry).unwrap();

        let read_txn = history.db.begin_read().unwrap();
        let table = read_txn.open_table(HISTORY_TABLE).unwrap();
        let raw = table.get("/tmp/temp/b.mkv").unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<HistoryEntry>(raw.value()).unwrap(), entry);
    }

    #[tokio::test]
    async fn library_transfer_moves_single_file_and_records_it() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = dir.path().join("temp");
        let library_root = dir.path().join("library");
        let history = Arc::new(RedbTransferHistory::new(open_db(dir.path())));
        let pipeline = LibraryTransfer::new(temp_root.clone(), library_root.clone(), history.clone());

        let source = temp_root.join("Movies/Film (2020)/Film.mkv");
        tokio::fs::create_dir_all(source.parent().unwrap()).await.unwrap();
        tokio::fs::write(&source, b"{}").await.unwrap();

        assert!(trigger_transfer(&pipeline, &source, TransferMode::Move).await);
        assert!(!source.exists());
        assert!(library_root.join("Movies/Film (2020)/Film.mkv").exists());
        assert!(history.has_record(&source));
    }

    #[tokio::test]
    async fn library_transfer_copies_directory_skipping_recorded_files() {
        let dir = tempfile::tempdir().unwrap();
        let temp_root = dir.path().join("temp");
        let library_root = dir.path().join("library");
        let history = Arc::new(RedbTransferHistory::new(open_db(dir.path())));
        let pipeline = LibraryTransfer::new(temp_root.clone(), library_root.clone(), history.clone());

        let season = temp_root.join("TV/Show/Season 1");
        tokio::fs::create_dir_all(&season).await.unwrap();
        for name in ["E01.mkv", "E02.mkv", "E03.mkv"] {
            tokio::fs::write(season.join(name), b"{}").await.unwrap();
        }
        history
            .record(
                &season.join("E01.mkv"),
                &HistoryEntry { dest: "elsewhere".to_string(), transferred_at: 0 },
            )
            .unwrap();

        assert!(trigger_transfer(&pipeline, &season, TransferMode::Copy).await);
        let target = library_root.join("TV/Show/Season 1");
        assert!(!target.join("E01.mkv").exists());
        assert!(target.join("E02.mkv").exists());
        assert!(target.join("E03.mkv").exists());
        assert!(season.join("E02.mkv").exists(), "copy keeps the source");
        assert!(history.has_record(&season.join("E03.mkv")));
    }

    #[tokio::test]
    async fn missing_path_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(RedbTransferHistory::new(open_db(dir.path())));
        let pipeline = LibraryTransfer::new(dir.path().join("temp"), dir.path().join("library"), history);
        assert!(!trigger_transfer(&pipeline, &dir.path().join("temp/nope.mkv"), TransferMode::Move).await);
    }

    #[test]
    fn destination_outside_temp_root_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(RedbTransferHistory::new(open_db(dir.path())));
        let pipeline = LibraryTransfer::new(PathBuf::from("/temp"), PathBuf::from("/library"), history);
        assert_eq!(pipeline.destination_for(Path::new("/other/x.mkv")), PathBuf::from("/library/x.mkv"));
        assert_eq!(pipeline.destination_for(Path::new("/temp/a/x.mkv")), PathBuf::from("/library/a/x.mkv"));
    }
}
