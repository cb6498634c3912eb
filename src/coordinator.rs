use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::api::{ApiClient, ApiError, MinimResult};

/// Setup-time failures. `NotReady` means the cloud produced no data for the
/// configured device yet; the daemon exits nonzero and the process
/// supervisor retries with its own backoff.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("cloud not ready: no data for device {device_id}")]
    NotReady { device_id: String },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Scheduled-refresh coordinator.
///
/// Owns the cached [`MinimResult`] snapshot: the poll task is the only
/// writer, entities read via cheap clones, and subscribers are notified only
/// after a successful fetch has fully replaced the cache. A failed cycle
/// keeps the last good snapshot and notifies nobody.
pub struct Coordinator {
    client: Arc<ApiClient>,
    device_id: String,
    interval: Duration,
    updates: watch::Sender<Option<MinimResult>>,
}

impl Coordinator {
    pub fn new(client: Arc<ApiClient>, device_id: &str, interval: Duration) -> Self {
        let (updates, _) = watch::channel(None);
        Self {
            client,
            device_id: device_id.to_string(),
            interval,
            updates,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MinimResult>> {
        self.updates.subscribe()
    }

    /// Current snapshot, if any poll has succeeded yet.
    pub fn data(&self) -> Option<MinimResult> {
        self.updates.borrow().clone()
    }

    async fn fetch(&self) -> Result<MinimResult, ApiError> {
        self.client.poll(&self.device_id).await?;
        self.client.fetch_state(&self.device_id).await
    }

    /// One blocking refresh before any entity exists. Setup must not proceed
    /// unless the snapshot actually contains the configured device.
    pub async fn first_refresh(&self) -> Result<(), SetupError> {
        let result = self.fetch().await?;
        if result.device(&self.device_id).is_none() {
            return Err(SetupError::NotReady {
                device_id: self.device_id.clone(),
            });
        }
        self.updates.send_replace(Some(result));
        Ok(())
    }

    /// One poll cycle. Transient and malformed responses are skipped cycles;
    /// only an authentication rejection triggers a re-login.
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(result) => {
                debug!("poll cycle complete for device {}", self.device_id);
                self.updates.send_replace(Some(result));
            }
            Err(ApiError::Auth(reason)) => {
                warn!("cloud rejected credentials ({reason}), re-authenticating");
                if let Err(err) = self.client.login().await {
                    warn!("re-authentication failed: {err}");
                }
            }
            Err(err) => {
                warn!("poll cycle skipped: {err}");
            }
        }
    }

    /// Poll on the configured interval until the task is dropped. Cycles
    /// with no subscribers fetch nothing.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately and first_refresh already ran.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.updates.receiver_count() == 0 {
                debug!("no subscribers, skipping poll");
                continue;
            }
            self.refresh().await;
        }
    }
}
