use std::sync::Arc;
use std::time::Duration;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use crate::aliyun_client::AliyunClient;
use crate::alist_client::AlistClient;
use crate::config::Config;
use crate::error::AppError;
use crate::reaper::clean_stale_uploads;
use crate::transfer::{LibraryTransfer, RedbTransferHistory};

pub const FAKE_TRANSFER_JOB: &str = "FakeTransfer";
pub const CLEAN_UPLOAD_JOB: &str = "CleanRapidUpload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
}

impl Schedule {
    /// Parse a humantime interval (`30s`, `15m`, `1h30m`, `1d`) or a bare
    /// number of seconds. Cron expressions are rejected.
    pub fn parse(expr: &str) -> Result<Self, AppError> {
        let expr = expr.trim();
        let looks_like_cron = expr.contains(&['*', '/', '?'][..])
            || (expr.contains(char::is_whitespace)
                && expr.split_whitespace().all(|t| t.parse::<u64>().is_ok()));
        if looks_like_cron {
            return Err(AppError::Config(format!(
                "cron expressions are not supported, use an interval such as '6h' (got '{}')",
                expr
            )));
        }
        let interval = match expr.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => humantime::parse_duration(expr)
                .map_err(|e| AppError::Config(format!("invalid schedule '{}': {}", expr, e)))?,
        };
        if interval.is_zero() {
            return Err(AppError::Config(format!("schedule '{}' must be greater than zero", expr)));
        }
        Ok(Self::Every(interval))
    }

    pub fn interval(&self) -> Duration {
        match self {
            Self::Every(d) => *d,
        }
    }
}

pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Job {
    pub id: &'static str,
    pub name: String,
    pub schedule: Schedule,
    handler: JobHandler,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .finish()
    }
}

impl Job {
    pub fn new(id: &'static str, name: impl Into<String>, schedule: Schedule, handler: JobHandler) -> Self {
        Self {
            id,
            name: name.into(),
            schedule,
            handler,
        }
    }

    pub async fn run_once(&self) {
        (self.handler)().await;
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    jobs: Vec<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job: Job) {
        info!("Registered job '{}' ({}) every {}s", job.id, job.name, job.schedule.interval().as_secs());
        self.jobs.push(job);
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// Start one task per job. Each runs immediately, then once per interval.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        self.jobs.into_iter().map(|job| tokio::spawn(run_job_loop(job))).collect()
    }
}

async fn run_job_loop(job: Job) {
    let interval = job.schedule.interval();
    loop {
        info!("Job '{}': running", job.id);
        job.run_once().await;
        info!("Job '{}': sleeping {}s until next run", job.id, interval.as_secs());
        tokio::time::sleep(interval).await;
    }
}

/// Run the configured one-off transfer to completion, then declare the
/// periodic jobs. Nothing is spawned, so the one-off run never overlaps a sync.
pub async fn prepare_jobs(
    config: Arc<Config>,
    alist: Arc<AlistClient>,
    aliyun: Arc<AliyunClient>,
    history: Arc<RedbTransferHistory>,
    pipeline: Arc<LibraryTransfer>,
) -> Scheduler {
    if let Some(path) = &config.fake_transfer.manual_transfer_path {
        warn!("Running one-off transfer of '{}' before scheduling jobs...", path);
        let report = crate::run_fake_transfer(
            &alist,
            path,
            &config.fake_transfer.temp_path,
            history.as_ref(),
            pipeline.as_ref(),
            config.fake_transfer.transfer_mode,
        )
        .await;
        info!("One-off transfer of '{}' finished: {} transfers", path, report.transfers);
    }
    register_jobs(config, alist, aliyun, history, pipeline)
}

/// Declare the periodic jobs the configuration asks for.
pub fn register_jobs(
    config: Arc<Config>,
    alist: Arc<AlistClient>,
    aliyun: Arc<AliyunClient>,
    history: Arc<RedbTransferHistory>,
    pipeline: Arc<LibraryTransfer>,
) -> Scheduler {
    let mut scheduler = Scheduler::new();
    if !config.fake_transfer.enabled {
        return scheduler;
    }

    if let Some(schedule) = config.fake_transfer.sync_schedule {
        match config.alist.sync_folder.clone() {
            Some(folder) => {
                let config = config.clone();
                let handler: JobHandler = Arc::new(move || {
                    let config = config.clone();
                    let alist = alist.clone();
                    let history = history.clone();
                    let pipeline = pipeline.clone();
                    let folder = folder.clone();
                    async move {
                        crate::run_fake_transfer(
                            &alist,
                            &folder,
                            &config.fake_transfer.temp_path,
                            history.as_ref(),
                            pipeline.as_ref(),
                            config.fake_transfer.transfer_mode,
                        )
                        .await;
                    }
                    .boxed()
                });
                scheduler.register(Job::new(FAKE_TRANSFER_JOB, "Fake transfer sync", schedule, handler));
            }
            None => warn!("SYNC_INTERVAL is set but ALIST_SYNC_FOLDER is not, sync job not registered"),
        }
    }

    let max_hours = config.aliyun.max_hours;
    let handler: JobHandler = Arc::new(move || {
        let aliyun = aliyun.clone();
        async move {
            clean_stale_uploads(&aliyun, max_hours).await;
        }
        .boxed()
    });
    scheduler.register(Job::new(
        CLEAN_UPLOAD_JOB,
        "Clean rapid-upload files",
        config.fake_transfer.clean_schedule,
        handler,
    ));

    scheduler
}
