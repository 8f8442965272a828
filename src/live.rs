//! Realtime change feed loop.
//!
//! [`LiveConfig`] tunes reconnection behaviour and [`LiveHandle`] controls a
//! running loop started by
//! [`AssignmentStore::start_live`](crate::AssignmentStore::start_live).
//! Every change notification, whatever table or row it names, triggers a full
//! re-fetch of the canonical assignment map.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_stream::StreamExt;

use crate::backend::ChangeFeed;
use crate::error::{BackendError, FeedError};
use crate::store::AssignmentStore;

/// Configuration for the realtime feed loop.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use dispatch_board::LiveConfig;
///
/// let config = LiveConfig {
///     reconnect_base_delay: Duration::from_millis(250),
///     ..LiveConfig::default()
/// };
/// assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Base delay for exponential backoff on reconnection.
    ///
    /// After the feed drops or a re-fetch fails, the loop waits
    /// `reconnect_base_delay`, then twice that, and so on up to
    /// [`reconnect_max_delay`](LiveConfig::reconnect_max_delay). A
    /// successful full refresh resets the backoff.
    ///
    /// Default: 1 second.
    pub reconnect_base_delay: Duration,

    /// Maximum delay between reconnection attempts.
    ///
    /// Default: 30 seconds.
    pub reconnect_max_delay: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

/// Handle for controlling the realtime feed loop.
///
/// Dropping the handle does **not** stop the loop; call
/// [`shutdown`](LiveHandle::shutdown).
///
/// `Clone` is cheap: all fields are `Arc`-wrapped.
#[derive(Clone)]
pub struct LiveHandle {
    /// Sends `true` to signal the loop to stop.
    pub(crate) shutdown_tx: tokio::sync::watch::Sender<bool>,
    /// Set once a full refresh has completed after subscribing.
    pub(crate) synced: Arc<AtomicBool>,
    /// Taken and awaited exactly once by [`shutdown`](LiveHandle::shutdown).
    pub(crate) task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<io::Result<()>>>>>,
}

impl LiveHandle {
    /// `true` once the loop has subscribed and published at least one full
    /// refresh.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Signal the loop to stop and wait for it to exit.
    ///
    /// Calling `shutdown` more than once is safe -- subsequent calls
    /// return `Ok(())` immediately.
    ///
    /// # Errors
    ///
    /// Returns `io::Error` if the task panicked.
    pub async fn shutdown(&self) -> io::Result<()> {
        // Receiver may already be gone if the task exited.
        let _ = self.shutdown_tx.send(true);

        let task = self.task.lock().await.take();
        if let Some(join_handle) = task {
            join_handle
                .await
                .map_err(|e| io::Error::other(format!("live loop task panicked: {e}")))?
        } else {
            Ok(())
        }
    }
}

/// How a single feed subscription finished.
enum StreamOutcome {
    /// The backend closed the feed.
    Ended,
    /// A re-fetch failed; reconnect after backoff.
    Error(BackendError),
}

/// Run the realtime feed loop until shutdown is signaled.
///
/// Subscribes first and then performs a full refresh, so a change landing
/// between the two is still observed. Feed closure or a failed re-fetch
/// leads to reconnection with exponential backoff.
///
/// # Arguments
///
/// * `store` - The store whose canonical map is re-fetched.
/// * `config` - Reconnection tuning.
/// * `synced` - Set to `true` after the first successful full refresh.
/// * `shutdown_rx` - Watch receiver that signals the loop to stop.
pub(crate) async fn run_live_loop(
    store: AssignmentStore,
    config: LiveConfig,
    synced: Arc<AtomicBool>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> io::Result<()> {
    let mut backoff_delay = config.reconnect_base_delay;

    loop {
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        tracing::info!("live loop: subscribing to change feed");
        let feed = store.backend.subscribe();

        let outcome = match store.refresh().await {
            Ok(_) => {
                synced.store(true, Ordering::Release);
                backoff_delay = config.reconnect_base_delay;
                let feed_fut = follow_feed(&store, feed);
                tokio::pin!(feed_fut);
                tokio::select! {
                    outcome = &mut feed_fut => outcome,
                    _ = shutdown_rx.changed() => return Ok(()),
                }
            }
            Err(e) => StreamOutcome::Error(e),
        };

        match outcome {
            StreamOutcome::Ended => {
                tracing::warn!("live loop: change feed closed, will reconnect");
            }
            StreamOutcome::Error(e) => {
                tracing::error!(error = %e, "live loop: refresh failed, will reconnect");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff_delay) => {}
            _ = shutdown_rx.changed() => return Ok(()),
        }
        backoff_delay = (backoff_delay * 2).min(config.reconnect_max_delay);
    }
}

/// Re-fetch on every notification until the feed ends or a re-fetch fails.
async fn follow_feed(store: &AssignmentStore, mut feed: ChangeFeed) -> StreamOutcome {
    while let Some(item) = feed.next().await {
        match item {
            Ok(event) => {
                tracing::debug!(
                    table = ?event.table,
                    kind = ?event.kind,
                    key = %event.key,
                    "live loop: change received"
                );
            }
            Err(FeedError::Lagged(missed)) => {
                tracing::warn!(missed, "live loop: feed lagged, re-fetching");
            }
        }
        if let Err(e) = store.refresh().await {
            return StreamOutcome::Error(e);
        }
    }
    StreamOutcome::Ended
}
