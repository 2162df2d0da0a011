pub mod error;
pub mod config;
pub mod media;
pub mod alist_client;
pub mod aliyun_client;
pub mod token_cache;
pub mod placeholder;
pub mod transfer;
pub mod materializer;
pub mod rapid_upload;
pub mod reaper;
pub mod nfo;
pub mod tasks;
pub mod server;

use std::path::Path;
use tracing::info;
use crate::alist_client::AlistClient;
use crate::materializer::{materialize, MaterializeReport};
use crate::transfer::{TransferHistory, TransferMode, TransferPipeline};

/// List `root` on Alist and fake-transfer every media file not seen before.
pub async fn run_fake_transfer<H, P>(
    alist: &AlistClient,
    root: &str,
    temp_root: &Path,
    history: &H,
    pipeline: &P,
    mode: TransferMode,
) -> MaterializeReport
where
    H: TransferHistory,
    P: TransferPipeline,
{
    info!("Starting fake transfer of '{}'...", root);
    let listing = alist.list_media(root).await;
    if listing.is_empty() {
        info!("Nothing to transfer under '{}'", root);
        return MaterializeReport::default();
    }
    materialize(&listing, temp_root, history, pipeline, mode).await
}
