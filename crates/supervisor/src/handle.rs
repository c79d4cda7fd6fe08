use crate::commands::{ScraperStatus, SupervisorCommand, SupervisorError};
use tokio::sync::{mpsc, oneshot};

/// Clone-able handle for sending commands to the supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<SupervisorCommand>) -> Self {
        Self { tx }
    }

    /// Starts the scraper stage. Returns the child pid.
    ///
    /// # Errors
    /// Returns `AlreadyRunning`/`Busy` while a stage is alive, `Spawn` when
    /// the child cannot be launched.
    pub async fn start_scraper(&self) -> Result<u32, SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::StartScraper(reply_tx))
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Stops a running scraper stage; processing then runs over whatever
    /// was persisted. A stop during processing is a no-op.
    ///
    /// # Errors
    /// Returns `NotRunning` when the pipeline is idle.
    pub async fn stop_scraper(&self) -> Result<(), SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::StopScraper(reply_tx))
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Current scraper status.
    ///
    /// # Errors
    /// Fails only when the supervisor is gone.
    pub async fn status(&self) -> Result<ScraperStatus, SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SupervisorCommand::GetStatus(reply_tx))
            .await
            .map_err(|_| SupervisorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    /// Shuts the supervisor down, killing any running stage.
    ///
    /// # Errors
    /// Fails only when the supervisor is already gone.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        self.tx
            .send(SupervisorCommand::Shutdown)
            .await
            .map_err(|_| SupervisorError::ChannelClosed)
    }
}
