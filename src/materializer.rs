use std::path::{Path, PathBuf};
use tracing::{info, warn, error, debug};
use crate::alist_client::RemoteListing;
use crate::placeholder::{local_dir, Placeholder};
use crate::transfer::{trigger_transfer, TransferHistory, TransferMode, TransferPipeline};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Placeholders written during this run.
    pub created: usize,
    /// Files skipped because their placeholder already has a history record.
    pub skipped: usize,
    /// Pipeline invocations that succeeded.
    pub transfers: usize,
    pub failed_transfers: usize,
}

/// Write placeholders for every listed file that has not been transferred yet
/// and hand each directory's new placeholders to the pipeline.
///
/// One new placeholder in a directory transfers just that file; several
/// transfer the directory as a unit; none skips the directory.
pub async fn materialize<H, P>(
    listing: &RemoteListing,
    temp_root: &Path,
    history: &H,
    pipeline: &P,
    mode: TransferMode,
) -> MaterializeReport
where
    H: TransferHistory,
    P: TransferPipeline,
{
    let mut report = MaterializeReport::default();

    for (remote_dir, files) in listing {
        let dir = local_dir(temp_root, remote_dir);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!("Cannot create placeholder directory '{}': {}", dir.display(), e);
            continue;
        }

        let mut pending: Vec<PathBuf> = Vec::new();
        for file in files {
            let placeholder_path = dir.join(&file.name);
            if history.has_record(&placeholder_path) {
                debug!("'{}' was already transferred, not transferring again", file.path);
                report.skipped += 1;
                continue;
            }
            match Placeholder::from(file).write(&placeholder_path).await {
                Ok(()) => pending.push(placeholder_path),
                Err(e) => error!("Cannot write placeholder '{}': {}", placeholder_path.display(), e),
            }
        }
        report.created += pending.len();

        let target = match pending.len() {
            0 => {
                warn!("No new files in '{}', skipping transfer", remote_dir);
                continue;
            }
            1 => pending.swap_remove(0),
            _ => dir,
        };

        if trigger_transfer(pipeline, &target, mode).await {
            report.transfers += 1;
        } else {
            report.failed_transfers += 1;
        }
    }

    info!(
        "Materialized {} placeholders ({} already transferred), {} transfers, {} failed",
        report.created, report.skipped, report.transfers, report.failed_transfers
    );
    report
}
