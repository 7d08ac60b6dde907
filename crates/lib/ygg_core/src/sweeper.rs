//! Periodic removal of expired tokens and sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{SessionStore, TokenStore};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Run one sweep over both stores. Failures are logged, not returned.
pub async fn sweep_once(tokens: &dyn TokenStore, sessions: &dyn SessionStore) {
    match tokens.cleanup_expired().await {
        Ok(removed) => debug!(removed, "token sweep done"),
        Err(e) => warn!(error = %e, "token sweep failed"),
    }
    match sessions.cleanup_expired().await {
        Ok(removed) => debug!(removed, "session sweep done"),
        Err(e) => warn!(error = %e, "session sweep failed"),
    }
}

/// Sweep both stores every `interval` until `cancel` fires.
pub fn spawn_sweeper(
    tokens: Arc<dyn TokenStore>,
    sessions: Arc<dyn SessionStore>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sweeper stopped");
                    return;
                }
                _ = ticker.tick() => sweep_once(tokens.as_ref(), sessions.as_ref()).await,
            }
        }
    })
}
