//! Optional periodic refresh ahead of expiry.
//!
//! Purely a latency optimization: `get_valid_access_token` refreshes on
//! demand anyway. The timer goes through the same single-flight path, so it
//! never races a request-triggered refresh.

use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::manager::{AuthStatus, TokenLifecycleManager};

/// Refresh when the access token expires within this window.
pub const DEFAULT_REFRESH_LEAD_SECS: i64 = 300;

/// Handle to the background refresh task. Dropping it stops the task.
pub struct BackgroundRefresh {
    handle: JoinHandle<()>,
}

impl BackgroundRefresh {
    pub fn spawn(manager: TokenLifecycleManager, interval: StdDuration, lead: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if manager.status() == AuthStatus::Unauthenticated {
                    continue;
                }
                match manager.refresh_if_expiring(lead).await {
                    Ok(true) => debug!("Background refresh completed"),
                    Ok(false) => {}
                    Err(e) => debug!(error = %e, "Background refresh did not produce a token"),
                }
            }
        });

        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for BackgroundRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
