//! Periodic removal of expired cache entries.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::bounded::BoundedCache;

/// Run the expiry sweep until shutdown is signalled.
///
/// Ticks every `sweep_interval` from the cache config, starting one interval
/// after the call. Returns the total number of entries removed.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_sweep_task(Arc::clone(&cache), shutdown_rx));
///
/// let _ = shutdown_tx.send(true);
/// let removed = handle.await?;
/// ```
pub async fn cache_sweep_task(
    cache: Arc<BoundedCache>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> u64 {
    let period = cache.config().sweep_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        sweep_interval = ?period,
        capacity = cache.capacity(),
        "Cache sweeper started"
    );

    let mut total_removed = 0u64;
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let removed = cache.remove_expired();
                total_removed += removed as u64;
                if removed > 0 {
                    tracing::debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                } else {
                    tracing::trace!("Cache sweep found nothing to remove");
                }
            }
        }
    }

    tracing::info!(total_removed, "Cache sweeper stopped");
    total_removed
}
