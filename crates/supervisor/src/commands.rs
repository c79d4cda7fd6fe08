use serde::Serialize;
use tokio::sync::oneshot;

/// Where the pipeline currently is. Only one stage process is ever alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Scraping,
    Processing,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    #[error("scraper already running")]
    AlreadyRunning,
    #[error("a processing pass is in flight")]
    Busy,
    #[error("scraper is not running")]
    NotRunning,
    #[error("failed to launch stage: {0}")]
    Spawn(String),
    #[error("supervisor is gone")]
    ChannelClosed,
}

#[derive(Debug)]
pub enum SupervisorCommand {
    StartScraper(oneshot::Sender<Result<u32, SupervisorError>>),
    StopScraper(oneshot::Sender<Result<(), SupervisorError>>),
    GetStatus(oneshot::Sender<ScraperStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScraperStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub state: PipelineState,
}
