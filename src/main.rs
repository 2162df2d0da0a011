use std::sync::Arc;
use tracing::{info, warn};
use faketransfer::alist_client::AlistClient;
use faketransfer::aliyun_client::AliyunClient;
use faketransfer::config::Config;
use faketransfer::server::{self, AppState};
use faketransfer::tasks::prepare_jobs;
use faketransfer::token_cache::{RedbTokenStore, TokenCache};
use faketransfer::transfer::{LibraryTransfer, RedbTransferHistory};
use redb::Database;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Arc::new(Config::from_env()?);
    info!(
        "Fake transfer {}, anti-spoil {}",
        if config.fake_transfer.enabled { "enabled" } else { "disabled" },
        if config.anti_spoil.enabled { "enabled" } else { "disabled" }
    );
    if config.api_key.is_none() {
        warn!("API_KEY is not set, every HTTP request will be rejected");
    }

    let db = Arc::new(Database::create(&config.db_path)?);
    let alist = Arc::new(AlistClient::new(&config.alist)?);
    let tokens = Arc::new(TokenCache::new(
        alist.clone(),
        config.alist.storage_id,
        &config.aliyun.host,
        config.aliyun.client_id.clone(),
        config.aliyun.client_secret.clone(),
        Arc::new(RedbTokenStore::new(db.clone())),
    )?);
    let aliyun = Arc::new(AliyunClient::new(&config.aliyun, tokens)?);
    let history = Arc::new(RedbTransferHistory::new(db.clone()));
    let pipeline = Arc::new(LibraryTransfer::new(
        config.fake_transfer.temp_path.clone(),
        config.fake_transfer.library_path.clone(),
        history.clone(),
    ));

    let scheduler = prepare_jobs(config.clone(), alist, aliyun.clone(), history, pipeline).await;
    let _jobs = scheduler.spawn();

    let state = Arc::new(AppState {
        config: config.clone(),
        aliyun,
    });
    server::serve(config.listen_addr, state).await?;
    Ok(())
}
